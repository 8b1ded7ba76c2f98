//! Block metrics driving the cadence classifier.
//!
//! Every kernel scores one block 8 pixels wide and 4 field lines tall. The
//! slices passed in start at the block origin and `s` is the field stride,
//! i.e. twice the frame line stride, so consecutive rows of a block belong to
//! the same field.
//!
//! | Kernel | Compares | Used for |
//! |--------|----------|----------|
//! | `diff` | same parity, two fields apart | breaks |
//! | `comb` | adjacent opposite-parity fields | affinity |
//! | `var`  | a field against itself one line down | affinity bias |
//!
//! Accelerated kernels in [`crate::simd`] return exactly the same values.

use crate::config::{MetricAcceleration, PullupConfig};
use crate::simd::{self, SimdCapabilities};

/// Block width in pixels.
pub const BLOCK_WIDTH: usize = 8;

/// Block height in field lines.
pub const BLOCK_FIELD_LINES: usize = 4;

/// Frame lines between vertically adjacent blocks.
pub const BLOCK_FRAME_LINES: usize = 8;

/// Signature shared by all metric kernels.
pub type MetricFn = fn(a: &[u8], b: &[u8], s: usize) -> i32;

/// Bytes a kernel may read past the block origin.
pub const fn block_extent(s: usize) -> usize {
    BLOCK_FIELD_LINES * s + BLOCK_WIDTH
}

/// Sum of absolute differences between two same-parity blocks.
pub fn diff_scalar(a: &[u8], b: &[u8], s: usize) -> i32 {
    let mut diff = 0i32;
    for i in 0..BLOCK_FIELD_LINES {
        let row = i * s;
        for j in 0..BLOCK_WIDTH {
            diff += (a[row + j] as i32 - b[row + j] as i32).abs();
        }
    }
    diff
}

/// Interlace combing between an even block and the odd field around it.
///
/// `b` starts on the odd line directly above `a`, so `b` row `i + 1` is the
/// odd line directly below `a` row `i`. Each pixel scores how far a line
/// sticks out of the two lines of the other field that surround it.
pub fn comb_scalar(a: &[u8], b: &[u8], s: usize) -> i32 {
    let mut comb = 0i32;
    for i in 0..BLOCK_FIELD_LINES {
        let row = i * s;
        let next = row + s;
        for j in 0..BLOCK_WIDTH {
            let a0 = a[row + j] as i32;
            let a1 = a[next + j] as i32;
            let above = b[row + j] as i32;
            let below = b[next + j] as i32;
            comb += (2 * a0 - above - below).abs() + (2 * below - a0 - a1).abs();
        }
    }
    comb
}

/// Vertical detail inside one field, scaled to match `comb`.
///
/// Only `a` is read.
pub fn var_scalar(a: &[u8], _b: &[u8], s: usize) -> i32 {
    let mut var = 0i32;
    for i in 0..BLOCK_FIELD_LINES - 1 {
        let row = i * s;
        for j in 0..BLOCK_WIDTH {
            var += (a[row + j] as i32 - a[row + s + j] as i32).abs();
        }
    }
    4 * var
}

/// The three kernels used by a context.
#[derive(Clone, Copy)]
pub struct MetricSet {
    pub diff: MetricFn,
    pub comb: MetricFn,
    pub var: MetricFn,
    /// Short name for logging.
    pub name: &'static str,
}

impl std::fmt::Debug for MetricSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSet").field("name", &self.name).finish()
    }
}

impl MetricSet {
    /// Reference kernels.
    pub fn scalar() -> Self {
        Self {
            diff: diff_scalar,
            comb: comb_scalar,
            var: var_scalar,
            name: "scalar",
        }
    }

    /// Pick kernels for the requested acceleration on this CPU.
    pub fn select(acceleration: MetricAcceleration) -> Self {
        match acceleration {
            MetricAcceleration::Scalar => Self::scalar(),
            MetricAcceleration::Auto => Self::for_capabilities(&simd::detect_simd()),
        }
    }

    /// Best kernels the given capabilities allow.
    pub fn for_capabilities(caps: &SimdCapabilities) -> Self {
        simd::metric_set(caps).unwrap_or_else(Self::scalar)
    }
}

/// Placement of the metric blocks on the metric plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricGrid {
    /// Blocks per row.
    pub width: usize,
    /// Block rows.
    pub height: usize,
    /// Byte offset of the first block (top field line).
    pub offset: usize,
    /// Bytes between horizontally adjacent blocks.
    pub x_step: usize,
    /// Bytes between vertically adjacent blocks.
    pub y_step: usize,
    /// Frame line stride of the metric plane.
    pub line_stride: usize,
}

impl MetricGrid {
    /// Lay out the grid for a validated configuration.
    pub fn new(config: &PullupConfig) -> Self {
        let plane = &config.planes[config.metric_plane];
        let junk = &config.junk;
        let bpp = plane.bytes_per_pixel();

        let width = plane
            .width
            .saturating_sub((junk.left + junk.right) * BLOCK_WIDTH)
            / BLOCK_WIDTH;
        let height = plane.height.saturating_sub((junk.top + junk.bottom) * 2) / BLOCK_FRAME_LINES;

        Self {
            width,
            height,
            offset: junk.left * BLOCK_WIDTH * bpp + junk.top * 2 * plane.stride,
            x_step: BLOCK_WIDTH * bpp,
            y_step: BLOCK_FRAME_LINES * plane.stride,
            line_stride: plane.stride,
        }
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    /// Whether the grid has no blocks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stride between lines of the same field.
    pub fn field_stride(&self) -> usize {
        self.line_stride * 2
    }

    /// Block origins in raster order, relative to the top line of the grid.
    pub fn block_origins(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.height).flat_map(move |row| {
            (0..self.width).map(move |col| self.offset + row * self.y_step + col * self.x_step)
        })
    }
}
