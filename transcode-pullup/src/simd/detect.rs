//! Runtime SIMD feature detection.

/// SIMD capabilities relevant to the metric kernels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimdCapabilities {
    /// SSE2 support (baseline on x86_64).
    pub sse2: bool,
    /// NEON support (baseline on AArch64).
    pub neon: bool,
}

impl SimdCapabilities {
    /// No acceleration at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Check if any SIMD acceleration is available.
    pub fn has_simd(&self) -> bool {
        self.sse2 || self.neon
    }

    /// Get the best available SIMD level as a string.
    pub fn best_level(&self) -> &'static str {
        if self.sse2 {
            "SSE2"
        } else if self.neon {
            "NEON"
        } else {
            "Scalar"
        }
    }
}

/// Detect SIMD capabilities at runtime.
#[cfg(target_arch = "x86_64")]
pub fn detect_simd() -> SimdCapabilities {
    SimdCapabilities {
        sse2: is_x86_feature_detected!("sse2"),
        ..Default::default()
    }
}

/// Detect SIMD capabilities at runtime (ARM).
#[cfg(target_arch = "aarch64")]
pub fn detect_simd() -> SimdCapabilities {
    // NEON is always available on AArch64
    SimdCapabilities {
        neon: true,
        ..Default::default()
    }
}

/// Fallback for unsupported architectures.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub fn detect_simd() -> SimdCapabilities {
    SimdCapabilities::default()
}
