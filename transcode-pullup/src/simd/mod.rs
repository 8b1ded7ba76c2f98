//! SIMD metric kernels with runtime CPU feature detection.
//!
//! | Kernel | SSE2 (x86_64) | NEON (aarch64) |
//! |--------|---------------|----------------|
//! | `diff` | `psadbw` per row | `vabal` accumulate |
//! | `comb` | 16-bit lanes, `pmaxsw` abs | 16-bit lanes, `vabs` |
//! | `var`  | `psadbw` per row pair | `vabal` accumulate |
//!
//! All of them return the same values as the scalar kernels in
//! [`crate::metrics`]; the classifier compares them against literal
//! thresholds, so anything else would change decisions.

mod detect;

#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "aarch64")]
mod aarch64;

pub use detect::{detect_simd, SimdCapabilities};

use crate::metrics::MetricSet;

/// Accelerated kernels for the given capabilities, if any exist.
pub(crate) fn metric_set(caps: &SimdCapabilities) -> Option<MetricSet> {
    #[cfg(target_arch = "x86_64")]
    if caps.sse2 {
        return Some(MetricSet {
            diff: x86_64::diff,
            comb: x86_64::comb,
            var: x86_64::var,
            name: "sse2",
        });
    }

    #[cfg(target_arch = "aarch64")]
    if caps.neon {
        return Some(MetricSet {
            diff: aarch64::diff,
            comb: aarch64::comb,
            var: aarch64::var,
            name: "neon",
        });
    }

    let _ = caps;
    None
}

/// Panics unless `len` bytes cover `rows` field lines of a block.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[inline]
fn check_extent(len: usize, rows: usize, s: usize) {
    assert!(
        len >= rows * s + 8,
        "block slice too short: {} bytes for {} rows at stride {}",
        len,
        rows,
        s
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{comb_scalar, diff_scalar, var_scalar};

    fn noise(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect()
    }

    #[test]
    fn test_accelerated_matches_scalar() {
        let Some(set) = metric_set(&detect_simd()) else {
            return;
        };
        let s = 64;
        for seed in 0..32 {
            let a = noise(5 * s + 8, seed);
            let b = noise(5 * s + 8, seed + 1000);
            assert_eq!((set.diff)(&a, &b, s), diff_scalar(&a, &b, s));
            assert_eq!((set.comb)(&a, &b, s), comb_scalar(&a, &b, s));
            assert_eq!((set.var)(&a, &b, s), var_scalar(&a, &b, s));
        }
    }

    #[test]
    fn test_accelerated_extremes() {
        let Some(set) = metric_set(&detect_simd()) else {
            return;
        };
        let s = 16;
        let white = vec![255u8; 5 * s + 8];
        let black = vec![0u8; 5 * s + 8];
        assert_eq!((set.diff)(&white, &black, s), diff_scalar(&white, &black, s));
        assert_eq!((set.comb)(&white, &black, s), comb_scalar(&white, &black, s));
        assert_eq!((set.comb)(&black, &white, s), comb_scalar(&black, &white, s));
    }

    #[test]
    fn test_no_caps_no_kernels() {
        assert!(metric_set(&SimdCapabilities::none()).is_none());
    }

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    #[should_panic(expected = "block slice too short")]
    fn test_extent_check() {
        check_extent(10, 4, 16);
    }
}
