//! Ring of submitted fields.
//!
//! Slots live in an arena and are linked by index into a circle. `head` is
//! the slot the next submission writes to, `first..=last` are the queued
//! fields in arrival order. The ring only ever grows: when the head is about
//! to run into the oldest queued field a fresh slot is spliced in between,
//! so there is always at least one free slot. Slots and their metric arrays
//! are reused for the life of the context.

use crate::error::{PullupError, Result};
use crate::metrics::{MetricFn, MetricGrid, MetricSet};
use crate::pool::{BufferId, BufferLock, BufferPool, Parity, SisterField};

/// Slots created with the ring.
pub const INITIAL_RING_SLOTS: usize = 9;

/// How far classification of a field has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Classification {
    #[default]
    Unclassified,
    BreaksComputed,
    AffinityComputed,
    FullyClassified,
}

impl Classification {
    pub fn has_breaks(self) -> bool {
        matches!(self, Self::BreaksComputed | Self::FullyClassified)
    }

    pub fn has_affinity(self) -> bool {
        matches!(self, Self::AffinityComputed | Self::FullyClassified)
    }

    pub fn with_breaks(self) -> Self {
        if self.has_affinity() {
            Self::FullyClassified
        } else {
            Self::BreaksComputed
        }
    }

    pub fn with_affinity(self) -> Self {
        if self.has_breaks() {
            Self::FullyClassified
        } else {
            Self::AffinityComputed
        }
    }
}

/// Cadence discontinuities on either side of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Breaks {
    /// Break between this field and the previous one.
    pub left: bool,
    /// Break between this field and the next one.
    pub right: bool,
}

/// Which neighbour a field pairs with best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Affinity {
    Previous,
    #[default]
    Neither,
    Next,
}

impl Affinity {
    /// -1, 0 or +1.
    pub fn offset(self) -> isize {
        match self {
            Affinity::Previous => -1,
            Affinity::Neither => 0,
            Affinity::Next => 1,
        }
    }
}

/// One ring slot.
#[derive(Debug)]
pub struct Field {
    pub(crate) parity: Parity,
    /// Queue's lock on the field's buffer; `None` for free slots.
    pub(crate) lock: Option<BufferLock>,
    pub(crate) class: Classification,
    pub(crate) breaks: Breaks,
    pub(crate) affinity: Affinity,
    pub(crate) diffs: Vec<i32>,
    pub(crate) comb: Vec<i32>,
    pub(crate) var: Vec<i32>,
    prev: usize,
    next: usize,
}

impl Field {
    fn new(metric_len: usize, prev: usize, next: usize) -> Self {
        Self {
            parity: Parity::Top,
            lock: None,
            class: Classification::Unclassified,
            breaks: Breaks::default(),
            affinity: Affinity::Neither,
            diffs: vec![0; metric_len],
            comb: vec![0; metric_len],
            var: vec![0; metric_len],
            prev,
            next,
        }
    }

    /// Buffer the field lives in.
    pub fn buffer(&self) -> Option<BufferId> {
        self.lock.as_ref().map(BufferLock::id)
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    pub fn breaks(&self) -> Breaks {
        self.breaks
    }

    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    pub fn classification(&self) -> Classification {
        self.class
    }

    pub fn diffs(&self) -> &[i32] {
        &self.diffs
    }

    pub fn comb(&self) -> &[i32] {
        &self.comb
    }

    pub fn var(&self) -> &[i32] {
        &self.var
    }
}

/// Pixel source for one side of a metric: a buffer and a frame line offset
/// from the block origin.
#[derive(Debug, Clone, Copy)]
struct Source {
    buffer: BufferId,
    line: isize,
}

/// Circular queue of fields.
#[derive(Debug)]
pub struct FieldRing {
    slots: Vec<Field>,
    head: usize,
    first: Option<usize>,
    last: Option<usize>,
    metric_len: usize,
}

impl FieldRing {
    /// Create the initial ring with metric arrays of `metric_len` blocks.
    pub fn new(metric_len: usize) -> Self {
        let n = INITIAL_RING_SLOTS;
        let slots = (0..n)
            .map(|i| Field::new(metric_len, (i + n - 1) % n, (i + 1) % n))
            .collect();
        Self {
            slots,
            head: 0,
            first: None,
            last: None,
            metric_len,
        }
    }

    /// Number of slots in the ring.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn first(&self) -> Option<usize> {
        self.first
    }

    pub fn last(&self) -> Option<usize> {
        self.last
    }

    pub fn next(&self, slot: usize) -> usize {
        self.slots[slot].next
    }

    pub fn prev(&self, slot: usize) -> usize {
        self.slots[slot].prev
    }

    /// Slot `n` steps after `slot`.
    pub fn advance(&self, slot: usize, n: usize) -> usize {
        (0..n).fold(slot, |s, _| self.next(s))
    }

    pub fn field(&self, slot: usize) -> &Field {
        &self.slots[slot]
    }

    pub(crate) fn field_mut(&mut self, slot: usize) -> &mut Field {
        &mut self.slots[slot]
    }

    /// Number of queued fields.
    pub fn len(&self) -> usize {
        match (self.first, self.last) {
            (Some(first), Some(last)) => {
                let mut count = 1;
                let mut slot = first;
                while slot != last {
                    slot = self.next(slot);
                    count += 1;
                }
                count
            }
            _ => 0,
        }
    }

    /// Whether no fields are queued.
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Queued slots, oldest first.
    pub fn queued(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = self.first;
        let last = self.last;
        std::iter::from_fn(move || {
            let slot = cursor?;
            cursor = if Some(slot) == last {
                None
            } else {
                Some(self.next(slot))
            };
            Some(slot)
        })
    }

    /// The most recently submitted field.
    pub fn sister(&self) -> Option<SisterField> {
        let last = &self.slots[self.last?];
        last.buffer().map(|buffer| SisterField {
            buffer,
            parity: last.parity,
        })
    }

    /// Splice in a new slot if the head's successor is the oldest field.
    ///
    /// Returns whether the ring grew.
    pub fn ensure_free_slot(&mut self) -> bool {
        let Some(first) = self.first else {
            return false;
        };
        if self.next(self.head) != first {
            return false;
        }

        let slot = self.slots.len();
        self.slots.push(Field::new(self.metric_len, self.head, first));
        self.slots[self.head].next = slot;
        self.slots[first].prev = slot;
        tracing::trace!(capacity = self.slots.len(), "field ring grown");
        true
    }

    /// Queue a field in the head slot and compute its metrics.
    ///
    /// The caller has already checked the parity sequence and taken the
    /// field's lock.
    pub(crate) fn push(
        &mut self,
        lock: BufferLock,
        parity: Parity,
        pool: &BufferPool,
        kernels: &MetricSet,
        grid: &MetricGrid,
        metric_plane: usize,
    ) {
        let slot = self.head;
        let prev = self.prev(slot);
        let prev2 = self.prev(prev);
        let buffer = lock.id();

        {
            let field = &mut self.slots[slot];
            field.parity = parity;
            field.lock = Some(lock);
            field.class = Classification::Unclassified;
            field.breaks = Breaks::default();
            field.affinity = Affinity::Neither;
        }

        let line = parity.index() as isize;
        let here = Some(Source { buffer, line });
        let run = |kernel, a, b, dest: &mut Vec<i32>| {
            measure(dest, kernel, a, b, pool, grid, metric_plane);
        };

        // Temporal difference against the previous field of this parity.
        let mut diffs = std::mem::take(&mut self.slots[slot].diffs);
        match self.slots[prev2].buffer() {
            Some(older) if older == buffer => diffs.fill(0),
            older => run(
                kernels.diff,
                here,
                older.map(|buffer| Source { buffer, line }),
                &mut diffs,
            ),
        }

        // Combing between this field and the previous one, even lines
        // against the odd lines around them.
        let mut comb = std::mem::take(&mut self.slots[slot].comb);
        let other = self.slots[prev].buffer();
        let (top, bottom) = match parity {
            Parity::Top => (Some(buffer), other),
            Parity::Bottom => (other, Some(buffer)),
        };
        run(
            kernels.comb,
            top.map(|buffer| Source { buffer, line: 0 }),
            bottom.map(|buffer| Source { buffer, line: -1 }),
            &mut comb,
        );

        let mut var = std::mem::take(&mut self.slots[slot].var);
        run(kernels.var, here, here, &mut var);

        let field = &mut self.slots[slot];
        field.diffs = diffs;
        field.comb = comb;
        field.var = var;

        if self.first.is_none() {
            self.first = Some(slot);
        }
        self.last = Some(slot);
        self.head = self.next(slot);
    }

    /// Remove the oldest field, handing its lock to the caller.
    pub(crate) fn pop_front(&mut self) -> Option<(BufferLock, Parity)> {
        let first = self.first?;
        if Some(first) == self.last {
            self.first = None;
            self.last = None;
        } else {
            self.first = Some(self.next(first));
        }
        let field = &mut self.slots[first];
        field.lock.take().map(|lock| (lock, field.parity))
    }

    /// Release every queued field and empty the queue.
    pub fn flush(&mut self, pool: &mut BufferPool) {
        let mut slot = self.first;
        while let Some(s) = slot {
            if s == self.head {
                break;
            }
            if let Some(lock) = self.slots[s].lock.take() {
                pool.release(lock);
            }
            slot = Some(self.next(s));
        }
        self.first = None;
        self.last = None;
    }
}

/// Run `kernel` over every grid block; zeroes `dest` when a side is missing.
fn measure(
    dest: &mut [i32],
    kernel: MetricFn,
    a: Option<Source>,
    b: Option<Source>,
    pool: &BufferPool,
    grid: &MetricGrid,
    plane: usize,
) {
    let (Some(a), Some(b)) = (a, b) else {
        dest.fill(0);
        return;
    };
    let (Some(pa), Some(pb)) = (
        pool.planes(a.buffer).get(plane),
        pool.planes(b.buffer).get(plane),
    ) else {
        dest.fill(0);
        return;
    };

    let s = grid.field_stride();
    let stride = grid.line_stride as isize;
    for (out, origin) in dest.iter_mut().zip(grid.block_origins()) {
        let oa = (origin as isize + a.line * stride) as usize;
        let ob = (origin as isize + b.line * stride) as usize;
        *out = kernel(&pa[oa..], &pb[ob..], s);
    }
}

/// Validate the parity sequence for a new submission.
pub(crate) fn check_parity(ring: &FieldRing, parity: Parity) -> Result<()> {
    match ring.last.map(|slot| ring.slots[slot].parity) {
        Some(last) if last == parity => Err(PullupError::repeated_parity(parity)),
        _ => Ok(()),
    }
}
