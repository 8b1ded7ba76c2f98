//! AArch64 metric kernels using NEON.

use std::arch::aarch64::*;

/// NEON `diff`.
pub fn diff(a: &[u8], b: &[u8], s: usize) -> i32 {
    super::check_extent(a.len(), 3, s);
    super::check_extent(b.len(), 3, s);
    // SAFETY: extents checked above, NEON is part of the AArch64 baseline.
    unsafe { diff_neon(a.as_ptr(), b.as_ptr(), s) }
}

/// NEON `comb`.
pub fn comb(a: &[u8], b: &[u8], s: usize) -> i32 {
    super::check_extent(a.len(), 4, s);
    super::check_extent(b.len(), 4, s);
    // SAFETY: extents checked above, NEON is part of the AArch64 baseline.
    unsafe { comb_neon(a.as_ptr(), b.as_ptr(), s) }
}

/// NEON `var`.
pub fn var(a: &[u8], _b: &[u8], s: usize) -> i32 {
    super::check_extent(a.len(), 3, s);
    // SAFETY: extent checked above, NEON is part of the AArch64 baseline.
    unsafe { var_neon(a.as_ptr(), s) }
}

#[inline]
#[target_feature(enable = "neon")]
unsafe fn load8_wide(p: *const u8) -> int16x8_t {
    vreinterpretq_s16_u16(vmovl_u8(vld1_u8(p)))
}

/// # Safety
///
/// * `a` and `b` must be readable for `3 * s + 8` bytes.
#[target_feature(enable = "neon")]
unsafe fn diff_neon(a: *const u8, b: *const u8, s: usize) -> i32 {
    let mut acc = vdupq_n_u16(0);
    for i in 0..4 {
        acc = vabal_u8(acc, vld1_u8(a.add(i * s)), vld1_u8(b.add(i * s)));
    }
    vaddlvq_u16(acc) as i32
}

/// # Safety
///
/// * `a` and `b` must be readable for `4 * s + 8` bytes.
#[target_feature(enable = "neon")]
unsafe fn comb_neon(a: *const u8, b: *const u8, s: usize) -> i32 {
    let mut acc = vdupq_n_s16(0);
    for i in 0..4 {
        let a0 = load8_wide(a.add(i * s));
        let a1 = load8_wide(a.add((i + 1) * s));
        let above = load8_wide(b.add(i * s));
        let below = load8_wide(b.add((i + 1) * s));

        let t1 = vsubq_s16(vsubq_s16(vaddq_s16(a0, a0), above), below);
        let t2 = vsubq_s16(vsubq_s16(vaddq_s16(below, below), a0), a1);
        acc = vaddq_s16(acc, vaddq_s16(vabsq_s16(t1), vabsq_s16(t2)));
    }
    vaddlvq_s16(acc)
}

/// # Safety
///
/// * `a` must be readable for `3 * s + 8` bytes.
#[target_feature(enable = "neon")]
unsafe fn var_neon(a: *const u8, s: usize) -> i32 {
    let mut acc = vdupq_n_u16(0);
    for i in 0..3 {
        acc = vabal_u8(acc, vld1_u8(a.add(i * s)), vld1_u8(a.add((i + 1) * s)));
    }
    4 * vaddlvq_u16(acc) as i32
}
