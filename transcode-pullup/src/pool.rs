//! Lock-counted pool of field buffers.
//!
//! A buffer holds every plane of one full frame, but the two fields inside it
//! are owned separately: each buffer carries one lock counter per parity. A
//! decoder writes a frame into a buffer locked for both fields, the queue
//! then takes one lock per submitted field, and output frames take their own
//! locks again. A buffer goes back into rotation only when both counters
//! reach zero.
//!
//! Locks are handed out as [`BufferLock`] tickets. A ticket is not `Clone`
//! and [`BufferPool::release`] consumes it, so every release matches exactly
//! one acquisition. A ticket dropped without release logs a warning, and
//! tickets carry the identity of their pool so a lock from another context
//! is never counted against this one.

use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::PlaneGeometry;
use crate::error::{PullupError, Result};

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Field parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parity {
    /// Even frame lines (0, 2, 4, ...).
    Top,
    /// Odd frame lines (1, 3, 5, ...).
    Bottom,
}

impl Parity {
    /// Both parities in index order.
    pub const ALL: [Parity; 2] = [Parity::Top, Parity::Bottom];

    /// 0 for top, 1 for bottom.
    pub fn index(self) -> usize {
        match self {
            Parity::Top => 0,
            Parity::Bottom => 1,
        }
    }

    /// Parity from an index; any odd value is bottom.
    pub fn from_index(index: usize) -> Self {
        if index & 1 == 0 {
            Parity::Top
        } else {
            Parity::Bottom
        }
    }

    /// Get the opposite parity.
    pub fn opposite(self) -> Self {
        match self {
            Parity::Top => Parity::Bottom,
            Parity::Bottom => Parity::Top,
        }
    }
}

impl std::fmt::Display for Parity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Parity::Top => write!(f, "top"),
            Parity::Bottom => write!(f, "bottom"),
        }
    }
}

/// Which counters a lock covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockParity {
    /// One field.
    Field(Parity),
    /// Both fields at once.
    Both,
}

impl LockParity {
    /// Whether this lock holds the counter of `parity`.
    pub fn covers(self, parity: Parity) -> bool {
        match self {
            LockParity::Field(p) => p == parity,
            LockParity::Both => true,
        }
    }
}

impl From<Parity> for LockParity {
    fn from(parity: Parity) -> Self {
        LockParity::Field(parity)
    }
}

/// Index of a buffer in its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(usize);

impl BufferId {
    /// Position in the pool.
    pub fn index(self) -> usize {
        self.0
    }
}

/// One held lock on a pool buffer.
#[must_use = "buffer locks must be returned to the pool"]
#[derive(Debug, PartialEq, Eq)]
pub struct BufferLock {
    pool: u32,
    id: BufferId,
    parity: LockParity,
}

impl BufferLock {
    /// Locked buffer.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Counters held by this lock.
    pub fn parity(&self) -> LockParity {
        self.parity
    }

    /// Consume the ticket without touching any counter.
    pub(crate) fn disarm(self) -> (BufferId, LockParity) {
        let lock = ManuallyDrop::new(self);
        (lock.id, lock.parity)
    }
}

impl Drop for BufferLock {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            tracing::warn!(
                buffer = self.id.0,
                parity = ?self.parity,
                "buffer lock dropped without release, counter leaked"
            );
        }
    }
}

/// Most recently submitted field, used to keep both fields of a frame in one
/// buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SisterField {
    pub buffer: BufferId,
    pub parity: Parity,
}

#[derive(Debug, Default)]
struct Buffer {
    /// Empty until the buffer is first handed out.
    planes: Vec<Vec<u8>>,
    locks: [u32; 2],
}

impl Buffer {
    fn is_free(&self, parity: LockParity) -> bool {
        Parity::ALL
            .iter()
            .all(|&p| !parity.covers(p) || self.locks[p.index()] == 0)
    }
}

/// Fixed-size pool of frame buffers.
#[derive(Debug)]
pub struct BufferPool {
    id: u32,
    buffers: Vec<Buffer>,
    geometry: Vec<PlaneGeometry>,
}

impl BufferPool {
    /// Create a pool of `count` buffers; planes are allocated on first use.
    pub fn new(count: usize, geometry: Vec<PlaneGeometry>) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            buffers: (0..count).map(|_| Buffer::default()).collect(),
            geometry,
        }
    }

    /// Number of buffers in the pool.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the pool has no buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Whether `lock` was handed out by this pool.
    pub fn owns(&self, lock: &BufferLock) -> bool {
        lock.pool == self.id
    }

    /// Plane geometry shared by every buffer.
    pub fn geometry(&self) -> &[PlaneGeometry] {
        &self.geometry
    }

    /// Find a buffer for `parity` and lock it.
    ///
    /// Preference order: the sister buffer of the last submitted field when it
    /// has the other parity and the requested half is free, then any fully
    /// free buffer, then (single field requests only) any buffer whose
    /// requested half is free.
    pub fn acquire(
        &mut self,
        parity: LockParity,
        sister: Option<SisterField>,
    ) -> Result<BufferLock> {
        if let (LockParity::Field(p), Some(sister)) = (parity, sister) {
            if sister.parity != p && self.buffers[sister.buffer.0].locks[p.index()] == 0 {
                tracing::trace!(buffer = sister.buffer.0, %p, "reusing sister buffer");
                return Ok(self.take(sister.buffer, parity));
            }
        }

        if let Some(i) = self.buffers.iter().position(|b| b.is_free(LockParity::Both)) {
            return Ok(self.take(BufferId(i), parity));
        }

        if parity != LockParity::Both {
            if let Some(i) = self.buffers.iter().position(|b| b.is_free(parity)) {
                return Ok(self.take(BufferId(i), parity));
            }
        }

        Err(PullupError::pool_exhausted(self.buffers.len()))
    }

    fn take(&mut self, id: BufferId, parity: LockParity) -> BufferLock {
        self.allocate(id);
        tracing::trace!(buffer = id.0, ?parity, "buffer acquired");
        self.lock(id, parity)
    }

    fn allocate(&mut self, id: BufferId) {
        let buffer = &mut self.buffers[id.0];
        if buffer.planes.is_empty() {
            buffer.planes = self
                .geometry
                .iter()
                .map(|g| vec![g.background; g.size()])
                .collect();
        }
    }

    /// Take another lock on a buffer already held by someone.
    pub fn lock(&mut self, id: BufferId, parity: LockParity) -> BufferLock {
        let buffer = &mut self.buffers[id.0];
        for p in Parity::ALL {
            if parity.covers(p) {
                buffer.locks[p.index()] += 1;
            }
        }
        BufferLock {
            pool: self.id,
            id,
            parity,
        }
    }

    /// Return a lock to the pool.
    ///
    /// Locks from another pool are consumed without touching any counter.
    pub fn release(&mut self, lock: BufferLock) {
        if !self.owns(&lock) {
            tracing::warn!(buffer = lock.id.0, "ignoring release of a foreign buffer lock");
            lock.disarm();
            return;
        }
        let (id, parity) = lock.disarm();
        self.unlock(id, parity);
    }

    /// Decrement counters for a lock whose ticket is gone.
    pub(crate) fn unlock(&mut self, id: BufferId, parity: LockParity) {
        let buffer = &mut self.buffers[id.0];
        for p in Parity::ALL {
            if parity.covers(p) {
                let count = &mut buffer.locks[p.index()];
                debug_assert!(*count > 0, "unbalanced release of buffer {}", id.0);
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Current `[top, bottom]` lock counts.
    pub fn lock_counts(&self, id: BufferId) -> [u32; 2] {
        self.buffers[id.0].locks
    }

    /// Whether nobody holds the `parity` half of a buffer.
    pub fn is_free(&self, id: BufferId, parity: Parity) -> bool {
        self.buffers[id.0].locks[parity.index()] == 0
    }

    /// Sum of all lock counters.
    pub fn outstanding_locks(&self) -> u64 {
        self.buffers
            .iter()
            .map(|b| b.locks[0] as u64 + b.locks[1] as u64)
            .sum()
    }

    /// Buffers whose planes have been allocated.
    pub fn allocated(&self) -> usize {
        self.buffers.iter().filter(|b| !b.planes.is_empty()).count()
    }

    /// Planes of a buffer; empty if it was never handed out.
    pub fn planes(&self, id: BufferId) -> &[Vec<u8>] {
        &self.buffers[id.0].planes
    }

    /// Writable planes of a locked buffer; empty for a foreign lock.
    pub fn planes_mut(&mut self, lock: &BufferLock) -> &mut [Vec<u8>] {
        if !self.owns(lock) {
            return &mut [];
        }
        &mut self.buffers[lock.id.0].planes
    }

    /// Copy the `parity` lines of every plane from `src` into `dst`.
    pub fn copy_field(&mut self, dst: BufferId, src: BufferId, parity: Parity) {
        if dst == src {
            return;
        }

        let (d, s) = if dst.0 < src.0 {
            let (lo, hi) = self.buffers.split_at_mut(src.0);
            (&mut lo[dst.0], &hi[0])
        } else {
            let (lo, hi) = self.buffers.split_at_mut(dst.0);
            (&mut hi[0], &lo[src.0])
        };
        if s.planes.is_empty() || d.planes.is_empty() {
            return;
        }

        for (i, geometry) in self.geometry.iter().enumerate() {
            let stride = geometry.stride;
            for line in 0..geometry.height / 2 {
                let start = (2 * line + parity.index()) * stride;
                let end = start + stride;
                d.planes[i][start..end].copy_from_slice(&s.planes[i][start..end]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(count: usize) -> BufferPool {
        BufferPool::new(count, vec![PlaneGeometry::new(16, 8)])
    }

    #[test]
    fn test_lazy_allocation() {
        let mut pool = pool(10);
        assert_eq!(pool.allocated(), 0);

        let lock = pool.acquire(LockParity::Both, None).unwrap();
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.planes(lock.id())[0].len(), 16 * 8);
        pool.release(lock);

        // Reuse does not allocate again
        let lock = pool.acquire(LockParity::Both, None).unwrap();
        assert_eq!(pool.allocated(), 1);
        pool.release(lock);
    }

    #[test]
    fn test_background_fill() {
        let mut pool = BufferPool::new(
            10,
            vec![
                PlaneGeometry::new(16, 8),
                PlaneGeometry::new(8, 4).with_background(128),
            ],
        );
        let lock = pool.acquire(LockParity::Both, None).unwrap();
        assert!(pool.planes(lock.id())[0].iter().all(|&v| v == 0));
        assert!(pool.planes(lock.id())[1].iter().all(|&v| v == 128));
        pool.release(lock);
    }

    #[test]
    fn test_exhaustion_with_both_locks() {
        let mut pool = pool(10);
        let locks: Vec<_> = (0..10)
            .map(|_| pool.acquire(LockParity::Both, None).unwrap())
            .collect();

        assert_eq!(
            pool.acquire(LockParity::Both, None),
            Err(PullupError::pool_exhausted(10))
        );

        for lock in locks {
            pool.release(lock);
        }
        assert_eq!(pool.outstanding_locks(), 0);
    }

    #[test]
    fn test_half_free_fallback() {
        let mut pool = pool(10);
        let tops: Vec<_> = (0..10)
            .map(|_| pool.acquire(Parity::Top.into(), None).unwrap())
            .collect();

        // No fully free buffer left, but every bottom half is.
        let bottom = pool.acquire(Parity::Bottom.into(), None).unwrap();
        assert_eq!(bottom.id(), BufferId(0));
        assert_eq!(pool.lock_counts(BufferId(0)), [1, 1]);

        // Both-field requests never take a half-free buffer.
        assert!(pool.acquire(LockParity::Both, None).is_err());

        pool.release(bottom);
        for lock in tops {
            pool.release(lock);
        }
        assert_eq!(pool.outstanding_locks(), 0);
    }

    #[test]
    fn test_sister_buffer_preferred() {
        let mut pool = pool(10);
        let first = pool.acquire(Parity::Top.into(), None).unwrap();
        let _other = pool.acquire(LockParity::Both, None).unwrap();

        let sister = SisterField {
            buffer: first.id(),
            parity: Parity::Top,
        };
        let second = pool.acquire(Parity::Bottom.into(), Some(sister)).unwrap();
        assert_eq!(second.id(), first.id());
        assert_eq!(pool.lock_counts(first.id()), [1, 1]);

        for lock in [first, second, _other] {
            pool.release(lock);
        }
        assert_eq!(pool.outstanding_locks(), 0);
    }

    #[test]
    fn test_sister_ignored_for_same_parity() {
        let mut pool = pool(10);
        let first = pool.acquire(Parity::Top.into(), None).unwrap();
        let sister = SisterField {
            buffer: first.id(),
            parity: Parity::Top,
        };
        let second = pool.acquire(Parity::Top.into(), Some(sister)).unwrap();
        assert_ne!(second.id(), first.id());
        pool.release(first);
        pool.release(second);
    }

    #[test]
    fn test_sister_ignored_when_half_taken() {
        let mut pool = pool(10);
        let both = pool.acquire(LockParity::Both, None).unwrap();
        let sister = SisterField {
            buffer: both.id(),
            parity: Parity::Top,
        };
        let lock = pool.acquire(Parity::Bottom.into(), Some(sister)).unwrap();
        assert_ne!(lock.id(), both.id());
        pool.release(lock);
        pool.release(both);
    }

    #[test]
    fn test_foreign_lock_release_ignored() {
        let mut ours = pool(10);
        let mut theirs = pool(10);
        let mine = ours.acquire(LockParity::Both, None).unwrap();
        let foreign = theirs.acquire(LockParity::Both, None).unwrap();
        assert_eq!(mine.id(), foreign.id());
        assert!(!ours.owns(&foreign));
        assert!(ours.planes_mut(&foreign).is_empty());

        // Same buffer index, different pool: our counters stay put.
        ours.release(foreign);
        assert_eq!(ours.lock_counts(mine.id()), [1, 1]);

        ours.release(mine);
        assert_eq!(ours.outstanding_locks(), 0);
        assert_eq!(theirs.outstanding_locks(), 2);
    }

    #[test]
    fn test_disarm_leaves_counters() {
        let mut pool = pool(10);
        let lock = pool.acquire(Parity::Top.into(), None).unwrap();
        let (id, parity) = lock.disarm();
        assert_eq!(pool.lock_counts(id), [1, 0]);
        pool.unlock(id, parity);
        assert_eq!(pool.outstanding_locks(), 0);
    }

    #[test]
    fn test_copy_field_only_touches_parity_lines() {
        let mut pool = pool(10);
        let dst = pool.acquire(LockParity::Both, None).unwrap();
        let src = pool.acquire(LockParity::Both, None).unwrap();
        pool.planes_mut(&src)[0].fill(9);

        pool.copy_field(dst.id(), src.id(), Parity::Bottom);

        let plane = &pool.planes(dst.id())[0];
        for line in 0..8 {
            let expected = if line % 2 == 1 { 9 } else { 0 };
            assert!(plane[line * 16..(line + 1) * 16].iter().all(|&v| v == expected));
        }
    }

    #[test]
    fn test_copy_field_backwards_indices() {
        let mut pool = pool(10);
        let a = pool.acquire(LockParity::Both, None).unwrap();
        let b = pool.acquire(LockParity::Both, None).unwrap();
        pool.planes_mut(&a)[0].fill(5);

        // Destination after source in the pool.
        pool.copy_field(b.id(), a.id(), Parity::Top);
        assert_eq!(pool.planes(b.id())[0][0], 5);
        assert_eq!(pool.planes(b.id())[0][16], 0);
    }

    #[test]
    fn test_parity_helpers() {
        assert_eq!(Parity::Top.opposite(), Parity::Bottom);
        assert_eq!(Parity::from_index(3), Parity::Bottom);
        assert_eq!(Parity::Bottom.index(), 1);
        assert!(LockParity::Both.covers(Parity::Top));
        assert!(!LockParity::Field(Parity::Top).covers(Parity::Bottom));
    }
}
