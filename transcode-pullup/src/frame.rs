//! Output frames.

use std::sync::Arc;

use crate::pool::{BufferId, BufferLock, Parity};
use crate::queue::Affinity;

/// A reconstructed progressive frame handed out by
/// [`PullupContext::get_frame`](crate::PullupContext::get_frame).
///
/// The frame owns locks on every buffer it references. Give it back with
/// [`PullupContext::release_frame`](crate::PullupContext::release_frame)
/// before asking for the next one. A frame dropped instead is noticed by the
/// context, which returns its locks on the next `get_frame` or `flush`.
#[must_use = "frames must be released back to the context"]
#[derive(Debug)]
pub struct Frame {
    pub(crate) length: usize,
    pub(crate) parity: Parity,
    /// Queue locks of the consumed input fields, in order.
    pub(crate) ifields: Vec<BufferLock>,
    /// Field sources for the top and bottom lines.
    pub(crate) ofields: [Option<BufferLock>; 2],
    /// Buffer holding both output fields, once there is one.
    pub(crate) packed: Option<BufferLock>,
    /// Shared with the context while the frame is alive.
    pub(crate) token: Arc<()>,
}

impl Frame {
    /// Number of input fields consumed (1 to 3).
    pub fn length(&self) -> usize {
        self.length
    }

    /// Parity of the first consumed field.
    pub fn parity(&self) -> Parity {
        self.parity
    }

    /// Buffers of the consumed fields, oldest first.
    pub fn input_fields(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.ifields.iter().map(BufferLock::id)
    }

    /// Buffer supplying the lines of `parity`, if any.
    pub fn output_field(&self, parity: Parity) -> Option<BufferId> {
        self.ofields[parity.index()].as_ref().map(BufferLock::id)
    }

    /// Buffer holding the whole frame, if it has been packed.
    pub fn packed(&self) -> Option<BufferId> {
        self.packed.as_ref().map(BufferLock::id)
    }

    /// Whether both output fields come from one buffer.
    pub fn is_progressive_source(&self) -> bool {
        match (self.output_field(Parity::Top), self.output_field(Parity::Bottom)) {
            (Some(top), Some(bottom)) => top == bottom,
            _ => false,
        }
    }

    /// Every lock still held, emptying the frame.
    pub(crate) fn take_locks(&mut self) -> Vec<BufferLock> {
        let mut locks = std::mem::take(&mut self.ifields);
        locks.extend(self.ofields.iter_mut().filter_map(Option::take));
        locks.extend(self.packed.take());
        locks
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let locks = self.take_locks();
        if locks.is_empty() {
            return;
        }
        if !std::thread::panicking() {
            tracing::warn!(
                locks = locks.len(),
                "frame dropped without release, context will reclaim it"
            );
        }
        // The context holds the matching record and undoes the counters.
        for lock in locks {
            lock.disarm();
        }
    }
}

/// Pick the buffers supplying the `[top, bottom]` lines of a frame made of
/// the fields in `ids`, the first one having `parity`.
///
/// With three fields the middle one is always used; `affinity` of the
/// middle field chooses between the outer two. Without a preference the
/// first field wins when it shares a buffer with the middle one, the third
/// otherwise.
pub(crate) fn select_outputs(
    ids: &[BufferId],
    parity: Parity,
    affinity: Affinity,
) -> [Option<BufferId>; 2] {
    let mut sources = [None; 2];
    match *ids {
        [only] => sources[parity.index()] = Some(only),
        [a, b] => {
            sources[parity.index()] = Some(a);
            sources[parity.opposite().index()] = Some(b);
        }
        [a, b, c] => {
            let offset = match affinity.offset() {
                0 if a == b => -1,
                0 => 1,
                offset => offset,
            };
            sources[parity.index()] = Some(if offset < 0 { a } else { c });
            sources[parity.opposite().index()] = Some(b);
        }
        _ => {}
    }
    sources
}
