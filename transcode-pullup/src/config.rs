//! Context configuration.
//!
//! Everything here is fixed once a [`PullupContext`](crate::PullupContext) is
//! created: plane geometry, the excluded border, the classifier knobs and the
//! metric kernel selection.

use crate::error::{PullupError, Result};

/// Smallest pool the context will run with.
pub const MIN_BUFFER_COUNT: usize = 10;

/// Layout of the frames fed to the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameFormat {
    /// Planar 8-bit data; metrics run on one plane (normally luma).
    #[default]
    Planar,
    /// Packed YUYV 4:2:2.
    Yuy2,
    /// Packed UYVY 4:2:2.
    Uyvy,
    /// Packed 32-bit RGB.
    Rgb32,
}

impl std::fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameFormat::Planar => write!(f, "planar"),
            FrameFormat::Yuy2 => write!(f, "yuy2"),
            FrameFormat::Uyvy => write!(f, "uyvy"),
            FrameFormat::Rgb32 => write!(f, "rgb32"),
        }
    }
}

/// Geometry of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    /// Width in pixels.
    pub width: usize,
    /// Height in frame lines.
    pub height: usize,
    /// Bytes per frame line.
    pub stride: usize,
    /// Bits per sample.
    pub depth: u8,
    /// Fill value for freshly allocated buffers (128 for chroma).
    pub background: u8,
}

impl PlaneGeometry {
    /// Create an 8-bit plane with a tightly packed stride.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            stride: width,
            depth: 8,
            background: 0,
        }
    }

    /// Set the background fill value.
    pub fn with_background(mut self, background: u8) -> Self {
        self.background = background;
        self
    }

    /// Set the line stride in bytes.
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Bytes occupied by one sample.
    pub fn bytes_per_pixel(&self) -> usize {
        (self.depth as usize).div_ceil(8)
    }

    /// Bytes occupied by the whole plane.
    pub fn size(&self) -> usize {
        self.stride * self.height
    }
}

/// Border excluded from the metrics.
///
/// Horizontal margins count 8-pixel blocks, vertical margins count pairs of
/// frame lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JunkMargins {
    pub left: usize,
    pub right: usize,
    pub top: usize,
    pub bottom: usize,
}

impl Default for JunkMargins {
    fn default() -> Self {
        Self {
            left: 1,
            right: 1,
            top: 4,
            bottom: 4,
        }
    }
}

/// How eagerly a break directly after the oldest field is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakStrictness {
    /// Ignore a break found only at the first field boundary.
    Relaxed,
    /// Honour it unless affinities say the first two fields pair up.
    #[default]
    Normal,
    /// Always honour it.
    Strict,
}

/// Metric kernel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricAcceleration {
    /// Use SIMD kernels when the CPU has them.
    #[default]
    Auto,
    /// Always use the scalar reference kernels.
    Scalar,
}

/// Pullup context configuration.
#[derive(Debug, Clone)]
pub struct PullupConfig {
    /// Frame layout.
    pub format: FrameFormat,
    /// Plane geometry, one entry per plane.
    pub planes: Vec<PlaneGeometry>,
    /// Border excluded from the metrics.
    pub junk: JunkMargins,
    /// Log classifier decisions.
    pub verbose: bool,
    /// Treatment of a break at the first field boundary.
    pub strict_breaks: BreakStrictness,
    /// Require breaks on both sides before splitting an affine pair.
    pub strict_pairs: bool,
    /// Plane the metrics are computed on.
    pub metric_plane: usize,
    /// Number of pool buffers; raised to [`MIN_BUFFER_COUNT`].
    pub buffer_count: usize,
    /// Kernel selection.
    pub acceleration: MetricAcceleration,
}

impl Default for PullupConfig {
    fn default() -> Self {
        Self::yuv420(720, 480)
    }
}

impl PullupConfig {
    /// Single luma plane.
    pub fn luma(width: usize, height: usize) -> Self {
        Self::with_planes(vec![PlaneGeometry::new(width, height)])
    }

    /// Planar 4:2:0 with neutral chroma background.
    pub fn yuv420(width: usize, height: usize) -> Self {
        let chroma = PlaneGeometry::new(width / 2, height / 2).with_background(128);
        Self::with_planes(vec![PlaneGeometry::new(width, height), chroma, chroma])
    }

    /// Arbitrary planar layout with default classifier settings.
    pub fn with_planes(planes: Vec<PlaneGeometry>) -> Self {
        Self {
            format: FrameFormat::Planar,
            planes,
            junk: JunkMargins::default(),
            verbose: false,
            strict_breaks: BreakStrictness::Normal,
            strict_pairs: false,
            metric_plane: 0,
            buffer_count: MIN_BUFFER_COUNT,
            acceleration: MetricAcceleration::Auto,
        }
    }

    /// Pool size actually used.
    pub fn effective_buffer_count(&self) -> usize {
        self.buffer_count.max(MIN_BUFFER_COUNT)
    }

    /// Check the configuration before a context is built from it.
    pub fn validate(&self) -> Result<()> {
        if self.format != FrameFormat::Planar {
            return Err(PullupError::unsupported_format(self.format.to_string()));
        }
        if self.planes.is_empty() {
            return Err(PullupError::invalid_config("at least one plane is required"));
        }

        for (i, plane) in self.planes.iter().enumerate() {
            if plane.depth == 0 || plane.depth > 16 {
                return Err(PullupError::invalid_config(format!(
                    "plane {} has unsupported depth {}",
                    i, plane.depth
                )));
            }
            if plane.stride < plane.width * plane.bytes_per_pixel() {
                return Err(PullupError::invalid_config(format!(
                    "plane {} stride {} is shorter than its width {}",
                    i, plane.stride, plane.width
                )));
            }
        }

        let mp = self.planes.get(self.metric_plane).ok_or_else(|| {
            PullupError::invalid_config(format!(
                "metric plane {} out of range ({} planes)",
                self.metric_plane,
                self.planes.len()
            ))
        })?;
        if mp.depth != 8 {
            return Err(PullupError::unsupported_format(format!(
                "{}-bit metric plane",
                mp.depth
            )));
        }

        // The comb kernel reads one field line above and below each block.
        if self.junk.top == 0 || self.junk.bottom == 0 {
            return Err(PullupError::invalid_config(
                "top and bottom junk margins must be at least 1",
            ));
        }

        let junk_w = (self.junk.left + self.junk.right) * 8;
        let junk_h = (self.junk.top + self.junk.bottom) * 2;
        if mp.width < junk_w + 8 || mp.height < junk_h + 8 {
            return Err(PullupError::invalid_config(format!(
                "metric plane {}x{} leaves no blocks inside the junk margins",
                mp.width, mp.height
            )));
        }

        Ok(())
    }
}
