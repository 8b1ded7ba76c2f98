//! Picture-level driver.
//!
//! [`PullupFilter`] sits between a decoder that emits interlaced pictures
//! (with field order and repeat-first-field flags) and an encoder that wants
//! progressive frames. It copies each picture into the context's pool,
//! queues its fields and hands back at most one reconstructed frame per
//! picture.

use crate::config::PullupConfig;
use crate::context::PullupContext;
use crate::error::{PullupError, Result};
use crate::pool::{LockParity, Parity};

/// Field order for interlaced content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldOrder {
    /// Top field first (TFF) - even lines come first temporally.
    #[default]
    TopFieldFirst,
    /// Bottom field first (BFF) - odd lines come first temporally.
    BottomFieldFirst,
}

impl FieldOrder {
    /// Parity of the temporally first field.
    pub fn first_parity(self) -> Parity {
        match self {
            FieldOrder::TopFieldFirst => Parity::Top,
            FieldOrder::BottomFieldFirst => Parity::Bottom,
        }
    }

    /// Get the opposite field order.
    pub fn opposite(self) -> Self {
        match self {
            FieldOrder::TopFieldFirst => FieldOrder::BottomFieldFirst,
            FieldOrder::BottomFieldFirst => FieldOrder::TopFieldFirst,
        }
    }
}

/// An owned progressive frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledFrame {
    /// Plane data laid out as configured.
    pub planes: Vec<Vec<u8>>,
    /// Input fields the frame was built from.
    pub length: usize,
    /// Parity of its first input field.
    pub parity: Parity,
}

/// Counters kept by the filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub pictures_in: u64,
    pub frames_out: u64,
    /// Single-field frames thrown away.
    pub short_frames_dropped: u64,
    /// Frames dropped to free buffers when the pool ran dry.
    pub frames_discarded: u64,
}

/// Inverse telecine over whole pictures.
#[derive(Debug)]
pub struct PullupFilter {
    ctx: PullupContext,
    stats: FilterStats,
}

impl PullupFilter {
    /// Create a filter with its own context.
    pub fn new(config: PullupConfig) -> Result<Self> {
        Ok(Self {
            ctx: PullupContext::new(config)?,
            stats: FilterStats::default(),
        })
    }

    /// Underlying context.
    pub fn context(&self) -> &PullupContext {
        &self.ctx
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    /// Feed one decoded picture.
    ///
    /// `planes` must match the configured geometry (extra bytes are
    /// ignored). With `repeat_first_field` the first field is queued a
    /// second time after the other one, as soft telecine signals.
    pub fn push_frame(
        &mut self,
        planes: &[&[u8]],
        order: FieldOrder,
        repeat_first_field: bool,
    ) -> Result<Option<PulledFrame>> {
        self.check_planes(planes)?;

        let lock = match self.ctx.acquire_buffer(LockParity::Both) {
            Ok(lock) => lock,
            Err(err) => {
                if matches!(err, PullupError::PoolExhausted { .. }) {
                    self.discard_frame();
                }
                return Err(err);
            }
        };
        for (dst, src) in self.ctx.planes_mut(&lock).iter_mut().zip(planes) {
            let len = dst.len();
            dst.copy_from_slice(&src[..len]);
        }

        let first = order.first_parity();
        let mut fields = vec![first, first.opposite()];
        if repeat_first_field {
            fields.push(first);
        }
        for parity in fields {
            match self.ctx.submit_field(&lock, parity) {
                // Already logged; the remaining fields still go in.
                Ok(()) | Err(PullupError::RepeatedParity { .. }) => {}
                Err(err) => {
                    self.ctx.release_buffer(lock);
                    return Err(err);
                }
            }
        }
        self.ctx.release_buffer(lock);
        self.stats.pictures_in += 1;

        let attempts = if repeat_first_field { 3 } else { 2 };
        for _ in 0..attempts {
            let Some(mut frame) = self.ctx.get_frame()? else {
                return Ok(None);
            };
            if frame.length() < 2 {
                self.ctx.release_frame(frame);
                self.stats.short_frames_dropped += 1;
                continue;
            }

            if let Err(err) = self.ctx.pack_frame(&mut frame) {
                self.ctx.release_frame(frame);
                return Err(err);
            }
            let pulled = frame.packed().map(|id| PulledFrame {
                planes: self.ctx.planes(id).to_vec(),
                length: frame.length(),
                parity: frame.parity(),
            });
            self.ctx.release_frame(frame);

            if pulled.is_some() {
                self.stats.frames_out += 1;
            }
            return Ok(pulled);
        }
        Ok(None)
    }

    /// Pull one frame and throw it away so a retried picture finds a
    /// free buffer.
    fn discard_frame(&mut self) {
        if let Ok(Some(frame)) = self.ctx.get_frame() {
            tracing::debug!(length = frame.length(), "pool exhausted, frame discarded");
            self.ctx.release_frame(frame);
            self.stats.frames_discarded += 1;
        }
    }

    /// Drop every queued field.
    pub fn flush(&mut self) {
        self.ctx.flush();
    }

    /// Drop queued fields and clear the counters.
    pub fn reset(&mut self) {
        self.flush();
        self.stats = FilterStats::default();
    }

    fn check_planes(&self, planes: &[&[u8]]) -> Result<()> {
        for (i, geometry) in self.ctx.config().planes.iter().enumerate() {
            let needed = geometry.size();
            let available = planes.get(i).map_or(0, |p| p.len());
            if available < needed {
                return Err(PullupError::plane_mismatch(i, needed, available));
            }
        }
        Ok(())
    }
}
