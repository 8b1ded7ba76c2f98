//! Pullup context: the public face of the field queue.

use std::sync::Arc;

use crate::classify::{self, ClassifierSettings};
use crate::config::PullupConfig;
use crate::error::{PullupError, Result};
use crate::frame::{self, Frame};
use crate::metrics::{MetricGrid, MetricSet};
use crate::pool::{BufferId, BufferLock, BufferPool, LockParity, Parity};
use crate::queue::{check_parity, FieldRing};

/// Pulldown detector and field reassembler.
///
/// Fields go in with [`submit_field`](Self::submit_field), progressive
/// frames come out of [`get_frame`](Self::get_frame). The context owns the
/// buffer pool; callers borrow buffers from it to hold decoded pictures.
#[derive(Debug)]
pub struct PullupContext {
    config: PullupConfig,
    settings: ClassifierSettings,
    kernels: MetricSet,
    grid: MetricGrid,
    pool: BufferPool,
    ring: FieldRing,
    live: Option<LiveFrame>,
}

/// Record of the frame currently out, so its locks can be returned if the
/// caller drops it.
#[derive(Debug)]
struct LiveFrame {
    token: Arc<()>,
    locks: Vec<(BufferId, LockParity)>,
}

impl PullupContext {
    /// Validate `config` and build a context from it.
    pub fn new(config: PullupConfig) -> Result<Self> {
        config.validate()?;

        let grid = MetricGrid::new(&config);
        let kernels = MetricSet::select(config.acceleration);
        let pool = BufferPool::new(config.effective_buffer_count(), config.planes.clone());
        let ring = FieldRing::new(grid.len());

        tracing::info!(
            kernels = kernels.name,
            blocks = grid.len(),
            buffers = pool.len(),
            "pullup context created"
        );

        Ok(Self {
            settings: ClassifierSettings {
                strict_breaks: config.strict_breaks,
                strict_pairs: config.strict_pairs,
            },
            config,
            kernels,
            grid,
            pool,
            ring,
            live: None,
        })
    }

    /// Configuration the context was built with.
    pub fn config(&self) -> &PullupConfig {
        &self.config
    }

    /// Name of the metric kernels in use.
    pub fn kernel_name(&self) -> &'static str {
        self.kernels.name
    }

    /// Lock a buffer for `parity`.
    ///
    /// Single-field requests prefer the buffer of the last submitted field
    /// so both fields of a picture end up together.
    pub fn acquire_buffer(&mut self, parity: impl Into<LockParity>) -> Result<BufferLock> {
        self.pool.acquire(parity.into(), self.ring.sister())
    }

    /// Return a lock obtained from [`acquire_buffer`](Self::acquire_buffer).
    pub fn release_buffer(&mut self, lock: BufferLock) {
        self.pool.release(lock);
    }

    /// Planes of a buffer.
    pub fn planes(&self, id: BufferId) -> &[Vec<u8>] {
        self.pool.planes(id)
    }

    /// Writable planes of a buffer the caller holds a lock on.
    pub fn planes_mut(&mut self, lock: &BufferLock) -> &mut [Vec<u8>] {
        self.pool.planes_mut(lock)
    }

    /// Queue the `parity` field of a held buffer.
    ///
    /// The queue takes its own lock, so the caller may release theirs right
    /// away. A field with the same parity as the previous one is dropped
    /// and reported as [`PullupError::RepeatedParity`].
    pub fn submit_field(&mut self, buffer: &BufferLock, parity: Parity) -> Result<()> {
        if !self.pool.owns(buffer) {
            return Err(PullupError::ForeignLock);
        }
        self.ring.ensure_free_slot();

        if let Err(err) = check_parity(&self.ring, parity) {
            tracing::warn!(%parity, buffer = buffer.id().index(), "repeated field parity, field dropped");
            return Err(err);
        }

        let lock = self.pool.lock(buffer.id(), parity.into());
        self.ring.push(
            lock,
            parity,
            &self.pool,
            &self.kernels,
            &self.grid,
            self.config.metric_plane,
        );
        Ok(())
    }

    /// Classify the queue and return the length of the next frame.
    ///
    /// 0 means more fields are needed. Repeated calls without new fields
    /// return the same answer.
    pub fn decide_frame_length(&mut self) -> usize {
        let Some(window) = classify::cadence_window(&mut self.ring, &self.settings) else {
            return 0;
        };
        let (length, rule) = classify::select_length(&window, &self.settings);

        if self.config.verbose {
            let (affinity, breaks) = classify::cadence_strip(&self.ring);
            tracing::debug!(%affinity, %breaks, length, rule, "cadence");
        }
        length
    }

    /// Take the next progressive frame off the queue.
    ///
    /// `Ok(None)` while too few fields are queued. Only one frame may be out
    /// at a time; release it before asking for another.
    pub fn get_frame(&mut self) -> Result<Option<Frame>> {
        let length = self.decide_frame_length();

        self.reclaim_dropped_frame();
        if self.live.is_some() {
            return Err(PullupError::FrameOutstanding);
        }
        if length == 0 {
            return Ok(None);
        }
        let Some(first) = self.ring.first() else {
            return Ok(None);
        };
        let affinity = self.ring.field(self.ring.next(first)).affinity();

        let mut ifields = Vec::with_capacity(length);
        let mut parity = None;
        while ifields.len() < length {
            let Some((lock, p)) = self.ring.pop_front() else {
                break;
            };
            parity.get_or_insert(p);
            ifields.push(lock);
        }
        let Some(parity) = parity else {
            return Ok(None);
        };

        let ids: Vec<BufferId> = ifields.iter().map(BufferLock::id).collect();
        let sources = frame::select_outputs(&ids, parity, affinity);

        let mut ofields = [None, None];
        for p in Parity::ALL {
            if let Some(id) = sources[p.index()] {
                ofields[p.index()] = Some(self.pool.lock(id, p.into()));
            }
        }
        let packed = match sources {
            [Some(top), Some(bottom)] if top == bottom => {
                Some(self.pool.lock(top, LockParity::Both))
            }
            _ => None,
        };

        let token = Arc::new(());
        let locks = ifields
            .iter()
            .chain(ofields.iter().flatten())
            .chain(packed.iter())
            .map(|lock| (lock.id(), lock.parity()))
            .collect();
        self.live = Some(LiveFrame {
            token: Arc::clone(&token),
            locks,
        });
        Ok(Some(Frame {
            length: ifields.len(),
            parity,
            ifields,
            ofields,
            packed,
            token,
        }))
    }

    /// Make sure both output fields of `frame` sit in one buffer.
    ///
    /// Reuses an output buffer when its other half is free, otherwise
    /// takes a fresh buffer from the pool. Frames of a single field are left
    /// alone.
    pub fn pack_frame(&mut self, frame: &mut Frame) -> Result<()> {
        if frame.packed.is_some() || frame.length < 2 {
            return Ok(());
        }
        let (Some(top), Some(bottom)) = (
            frame.output_field(Parity::Top),
            frame.output_field(Parity::Bottom),
        ) else {
            return Ok(());
        };
        let outputs = [top, bottom];

        for p in Parity::ALL {
            let target = outputs[p.index()];
            let missing = p.opposite();
            if self.pool.is_free(target, missing) {
                let lock = self.pool.lock(target, LockParity::Both);
                self.pool.copy_field(target, outputs[missing.index()], missing);
                self.set_packed(frame, lock);
                return Ok(());
            }
        }

        let lock = self.pool.acquire(LockParity::Both, None)?;
        for p in Parity::ALL {
            self.pool.copy_field(lock.id(), outputs[p.index()], p);
        }
        self.set_packed(frame, lock);
        Ok(())
    }

    fn set_packed(&mut self, frame: &mut Frame, lock: BufferLock) {
        if let Some(live) = &mut self.live {
            if Arc::ptr_eq(&live.token, &frame.token) {
                live.locks.push((lock.id(), lock.parity()));
            }
        }
        frame.packed = Some(lock);
    }

    /// Give a frame's locks back and allow the next frame out.
    pub fn release_frame(&mut self, mut frame: Frame) {
        let parity = frame.parity;
        for (i, lock) in frame.ifields.iter().enumerate() {
            debug_assert_eq!(
                lock.parity(),
                LockParity::Field(Parity::from_index(parity.index() ^ (i & 1)))
            );
        }
        for lock in frame.take_locks() {
            self.pool.release(lock);
        }
        if self
            .live
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(&live.token, &frame.token))
        {
            self.live = None;
        }
    }

    /// Return the locks of a frame the caller dropped instead of releasing.
    fn reclaim_dropped_frame(&mut self) {
        let Some(live) = &self.live else {
            return;
        };
        if Arc::strong_count(&live.token) > 1 {
            return;
        }
        if let Some(live) = self.live.take() {
            tracing::warn!(locks = live.locks.len(), "reclaiming locks of a dropped frame");
            for (id, parity) in live.locks {
                self.pool.unlock(id, parity);
            }
        }
    }

    /// Drop every queued field.
    ///
    /// A frame that is still out stays valid and must be released as usual;
    /// one that was dropped without release has its locks returned here.
    pub fn flush(&mut self) {
        self.reclaim_dropped_frame();
        self.ring.flush(&mut self.pool);
    }

    /// Whether a frame is out and still held by the caller.
    pub fn frame_outstanding(&self) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| Arc::strong_count(&live.token) > 1)
    }

    /// Number of queued fields.
    pub fn queued_fields(&self) -> usize {
        self.ring.len()
    }

    /// Current number of ring slots.
    pub fn ring_capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// The field queue, for inspection.
    pub fn queue(&self) -> &FieldRing {
        &self.ring
    }

    /// `[top, bottom]` lock counts of a buffer.
    pub fn lock_counts(&self, id: BufferId) -> [u32; 2] {
        self.pool.lock_counts(id)
    }

    /// Sum of every lock counter in the pool.
    pub fn outstanding_locks(&self) -> u64 {
        self.pool.outstanding_locks()
    }

    /// Block layout of the metrics.
    pub fn metric_grid(&self) -> &MetricGrid {
        &self.grid
    }
}

impl Drop for PullupContext {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricAcceleration;

    fn context() -> PullupContext {
        let mut config = PullupConfig::luma(64, 48);
        config.acceleration = MetricAcceleration::Scalar;
        PullupContext::new(config).unwrap()
    }

    fn picture(ctx: &mut PullupContext, value: u8) -> BufferLock {
        let lock = ctx.acquire_buffer(LockParity::Both).unwrap();
        ctx.planes_mut(&lock)[0].fill(value);
        lock
    }

    fn submit_all(ctx: &mut PullupContext, fields: &[(&BufferLock, Parity)]) {
        for (lock, parity) in fields {
            ctx.submit_field(lock, *parity).unwrap();
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = PullupConfig::luma(8, 8);
        assert!(PullupContext::new(config).is_err());
    }

    #[test]
    fn test_not_enough_fields() {
        let mut ctx = context();
        let a = picture(&mut ctx, 10);
        submit_all(&mut ctx, &[(&a, Parity::Top), (&a, Parity::Bottom)]);
        assert_eq!(ctx.decide_frame_length(), 0);
        assert!(ctx.get_frame().unwrap().is_none());
        ctx.release_buffer(a);
    }

    #[test]
    fn test_static_fields_make_pairs() {
        let mut ctx = context();
        let a = picture(&mut ctx, 80);
        let b = picture(&mut ctx, 80);
        submit_all(
            &mut ctx,
            &[
                (&a, Parity::Top),
                (&a, Parity::Bottom),
                (&b, Parity::Top),
                (&b, Parity::Bottom),
            ],
        );
        assert_eq!(ctx.decide_frame_length(), 2);
        // idempotent
        assert_eq!(ctx.decide_frame_length(), 2);

        let frame = ctx.get_frame().unwrap().unwrap();
        assert_eq!(frame.length(), 2);
        assert_eq!(frame.parity(), Parity::Top);
        assert_eq!(frame.packed(), Some(a.id()));
        ctx.release_frame(frame);
        ctx.release_buffer(a);
        ctx.release_buffer(b);
        ctx.flush();
        assert_eq!(ctx.outstanding_locks(), 0);
    }

    #[test]
    fn test_second_get_frame_fails_until_released() {
        let mut ctx = context();
        let a = picture(&mut ctx, 1);
        let b = picture(&mut ctx, 1);
        let c = picture(&mut ctx, 1);
        submit_all(
            &mut ctx,
            &[
                (&a, Parity::Top),
                (&a, Parity::Bottom),
                (&b, Parity::Top),
                (&b, Parity::Bottom),
                (&c, Parity::Top),
                (&c, Parity::Bottom),
            ],
        );

        let frame = ctx.get_frame().unwrap().unwrap();
        assert_eq!(ctx.get_frame().unwrap_err(), PullupError::FrameOutstanding);
        ctx.release_frame(frame);
        let frame = ctx.get_frame().unwrap().unwrap();
        ctx.release_frame(frame);

        for lock in [a, b, c] {
            ctx.release_buffer(lock);
        }
        ctx.flush();
        assert_eq!(ctx.outstanding_locks(), 0);
    }

    #[test]
    fn test_repeated_field_takes_three() {
        let mut ctx = context();
        let a = picture(&mut ctx, 20);
        let b = picture(&mut ctx, 220);
        submit_all(
            &mut ctx,
            &[
                (&a, Parity::Top),
                (&a, Parity::Bottom),
                (&a, Parity::Top),
                (&b, Parity::Bottom),
            ],
        );

        let queue = ctx.queue();
        let third = queue.advance(queue.first().unwrap(), 2);
        assert_eq!(ctx.decide_frame_length(), 3);
        assert!(ctx.queue().field(third).breaks().right);

        let frame = ctx.get_frame().unwrap().unwrap();
        assert_eq!(frame.length(), 3);
        assert!(frame.is_progressive_source());
        assert_eq!(frame.packed(), Some(a.id()));
        ctx.release_frame(frame);

        ctx.release_buffer(a);
        ctx.release_buffer(b);
        ctx.flush();
        assert_eq!(ctx.outstanding_locks(), 0);
    }

    #[test]
    fn test_repeated_parity_leaves_queue_untouched() {
        let mut ctx = context();
        let a = picture(&mut ctx, 5);
        ctx.submit_field(&a, Parity::Top).unwrap();
        let before = ctx.lock_counts(a.id());
        assert_eq!(
            ctx.submit_field(&a, Parity::Top),
            Err(PullupError::repeated_parity(Parity::Top))
        );
        assert_eq!(ctx.queued_fields(), 1);
        assert_eq!(ctx.lock_counts(a.id()), before);
        ctx.release_buffer(a);
        ctx.flush();
    }

    #[test]
    fn test_pack_reuses_free_half() {
        let mut ctx = context();
        let a = picture(&mut ctx, 30);
        let b = picture(&mut ctx, 30);
        let c = picture(&mut ctx, 30);
        // Fields cross picture boundaries: B bottom pairs with C top.
        submit_all(
            &mut ctx,
            &[
                (&a, Parity::Bottom),
                (&b, Parity::Top),
                (&b, Parity::Bottom),
                (&c, Parity::Top),
            ],
        );
        let (a_id, b_id) = (a.id(), b.id());
        ctx.release_buffer(a);
        ctx.release_buffer(b);
        ctx.release_buffer(c);

        let mut frame = ctx.get_frame().unwrap().unwrap();
        assert_eq!(frame.length(), 2);
        assert_eq!(frame.output_field(Parity::Bottom), Some(a_id));
        assert_eq!(frame.output_field(Parity::Top), Some(b_id));
        assert!(frame.packed().is_none());

        ctx.pack_frame(&mut frame).unwrap();
        // Buffer A's top half is free, so A receives B's top field.
        assert_eq!(frame.packed(), Some(a_id));
        ctx.release_frame(frame);
        ctx.flush();
        assert_eq!(ctx.outstanding_locks(), 0);
    }

    #[test]
    fn test_single_field_frame_is_not_packed() {
        let mut ctx = context();
        let lock = picture(&mut ctx, 0);
        ctx.submit_field(&lock, Parity::Top).unwrap();
        let mut frame = Frame {
            length: 1,
            parity: Parity::Top,
            ifields: Vec::new(),
            ofields: [Some(ctx.pool.lock(lock.id(), Parity::Top.into())), None],
            packed: None,
            token: Arc::new(()),
        };
        ctx.pack_frame(&mut frame).unwrap();
        assert!(frame.packed().is_none());
        ctx.release_frame(frame);
        ctx.release_buffer(lock);
        ctx.flush();
        assert_eq!(ctx.outstanding_locks(), 0);
    }

    #[test]
    fn test_dropped_frame_is_reclaimed_by_flush() {
        let mut ctx = context();
        let locks: Vec<_> = (0..3).map(|i| picture(&mut ctx, 40 * i)).collect();
        for lock in &locks {
            submit_all(&mut ctx, &[(lock, Parity::Top), (lock, Parity::Bottom)]);
        }
        for lock in locks {
            ctx.release_buffer(lock);
        }

        let frame = ctx.get_frame().unwrap().unwrap();
        assert!(ctx.frame_outstanding());
        drop(frame);
        assert!(!ctx.frame_outstanding());

        ctx.flush();
        assert_eq!(ctx.outstanding_locks(), 0);

        let locks: Vec<_> = (0..3).map(|_| picture(&mut ctx, 70)).collect();
        for lock in &locks {
            submit_all(&mut ctx, &[(lock, Parity::Top), (lock, Parity::Bottom)]);
        }
        for lock in locks {
            ctx.release_buffer(lock);
        }
        let frame = ctx.get_frame().unwrap().unwrap();
        ctx.release_frame(frame);
        ctx.flush();
        assert_eq!(ctx.outstanding_locks(), 0);
    }

    #[test]
    fn test_dropped_packed_frame_is_reclaimed_by_get_frame() {
        let mut ctx = context();
        let a = picture(&mut ctx, 30);
        let b = picture(&mut ctx, 30);
        let c = picture(&mut ctx, 30);
        submit_all(
            &mut ctx,
            &[
                (&a, Parity::Bottom),
                (&b, Parity::Top),
                (&b, Parity::Bottom),
                (&c, Parity::Top),
                (&c, Parity::Bottom),
            ],
        );

        // The caller still holds every buffer, so packing takes a fresh one.
        let mut frame = ctx.get_frame().unwrap().unwrap();
        ctx.pack_frame(&mut frame).unwrap();
        let packed = frame.packed().unwrap();
        assert_eq!(ctx.lock_counts(packed), [1, 1]);
        drop(frame);

        match ctx.get_frame() {
            Ok(Some(frame)) => ctx.release_frame(frame),
            Ok(None) => {}
            Err(err) => panic!("dropped frame still blocks the queue: {err}"),
        }
        assert_eq!(ctx.lock_counts(packed), [0, 0]);

        for lock in [a, b, c] {
            ctx.release_buffer(lock);
        }
        ctx.flush();
        assert_eq!(ctx.outstanding_locks(), 0);
    }

    #[test]
    fn test_foreign_lock_rejected() {
        let mut ours = context();
        let mut theirs = context();
        let foreign = picture(&mut theirs, 10);

        assert_eq!(
            ours.submit_field(&foreign, Parity::Top),
            Err(PullupError::ForeignLock)
        );
        assert_eq!(ours.queued_fields(), 0);

        ours.release_buffer(foreign);
        assert_eq!(ours.outstanding_locks(), 0);
        assert_eq!(theirs.outstanding_locks(), 2);
    }
}
