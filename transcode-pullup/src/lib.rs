//! # transcode-pullup
//!
//! Inverse telecine for the transcode library: detects the pulldown cadence
//! of a stream of interlaced fields and reassembles the original progressive
//! frames.
//!
//! ## Overview
//!
//! Film at 24 frames per second is carried in 60 field per second video by
//! repeating some fields (3:2 pulldown). Edits, mixed sources and soft
//! telecine make the cadence irregular, so rather than assuming a fixed
//! pattern this crate measures every field against its neighbours and
//! decides, frame by frame, how many fields belong together.
//!
//! | Stage | Module | Role |
//! |-------|--------|------|
//! | Pool | [`pool`] | Frame buffers with per-field lock counts |
//! | Queue | [`queue`] | Ring of submitted fields and their metrics |
//! | Metrics | [`metrics`], [`simd`] | Block diff / comb / var kernels |
//! | Classifier | [`classify`] | Breaks, affinity, frame length |
//! | Assembler | [`context`] | Frame extraction and packing |
//! | Driver | [`filter`] | Whole-picture push interface |
//!
//! ## Quick Start
//!
//! ```no_run
//! use transcode_pullup::{FieldOrder, PullupConfig, PullupFilter};
//!
//! let mut filter = PullupFilter::new(PullupConfig::yuv420(720, 480))?;
//!
//! // For every decoded picture:
//! // let planes: [&[u8]; 3] = [y, u, v];
//! // if let Some(frame) = filter.push_frame(&planes, FieldOrder::TopFieldFirst, rff)? {
//! //     encode(frame.planes);
//! // }
//! # Ok::<(), transcode_pullup::PullupError>(())
//! ```
//!
//! ## Field-level interface
//!
//! [`PullupContext`] exposes the queue directly for callers that manage
//! buffers themselves:
//!
//! ```no_run
//! use transcode_pullup::{LockParity, Parity, PullupConfig, PullupContext};
//!
//! let mut ctx = PullupContext::new(PullupConfig::luma(720, 480))?;
//!
//! let buffer = ctx.acquire_buffer(LockParity::Both)?;
//! // fill ctx.planes_mut(&buffer) with a decoded picture
//! ctx.submit_field(&buffer, Parity::Top)?;
//! ctx.submit_field(&buffer, Parity::Bottom)?;
//! ctx.release_buffer(buffer);
//!
//! if let Some(mut frame) = ctx.get_frame()? {
//!     ctx.pack_frame(&mut frame)?;
//!     if let Some(id) = frame.packed() {
//!         let _planes = ctx.planes(id);
//!     }
//!     ctx.release_frame(frame);
//! }
//! # Ok::<(), transcode_pullup::PullupError>(())
//! ```

#![allow(clippy::needless_range_loop)]

pub mod classify;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod frame;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod simd;

pub use classify::{decide_frame_length, BreakSource, CadenceWindow, ClassifierSettings};
pub use config::{
    BreakStrictness, FrameFormat, JunkMargins, MetricAcceleration, PlaneGeometry, PullupConfig,
    MIN_BUFFER_COUNT,
};
pub use context::PullupContext;
pub use error::{PullupError, Result};
pub use filter::{FieldOrder, FilterStats, PulledFrame, PullupFilter};
pub use frame::Frame;
pub use metrics::{MetricGrid, MetricSet};
pub use pool::{BufferId, BufferLock, LockParity, Parity};
pub use queue::{Affinity, Breaks, Classification};
pub use simd::{detect_simd, SimdCapabilities};
