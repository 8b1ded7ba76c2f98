//! x86_64 metric kernels using SSE2.
//!
//! The `unsafe` kernels require SSE2, which every x86_64 CPU has. The safe
//! wrappers check slice extents before handing raw pointers to the loads.

use std::arch::x86_64::*;

/// SSE2 `diff`.
pub fn diff(a: &[u8], b: &[u8], s: usize) -> i32 {
    super::check_extent(a.len(), 3, s);
    super::check_extent(b.len(), 3, s);
    // SAFETY: extents checked above, SSE2 is part of the x86_64 baseline.
    unsafe { diff_sse2(a.as_ptr(), b.as_ptr(), s) }
}

/// SSE2 `comb`.
pub fn comb(a: &[u8], b: &[u8], s: usize) -> i32 {
    super::check_extent(a.len(), 4, s);
    super::check_extent(b.len(), 4, s);
    // SAFETY: extents checked above, SSE2 is part of the x86_64 baseline.
    unsafe { comb_sse2(a.as_ptr(), b.as_ptr(), s) }
}

/// SSE2 `var`.
pub fn var(a: &[u8], _b: &[u8], s: usize) -> i32 {
    super::check_extent(a.len(), 3, s);
    // SAFETY: extent checked above, SSE2 is part of the x86_64 baseline.
    unsafe { var_sse2(a.as_ptr(), s) }
}

/// Load 8 bytes into the low half of a register.
#[inline]
#[target_feature(enable = "sse2")]
unsafe fn load8(p: *const u8) -> __m128i {
    _mm_loadl_epi64(p as *const __m128i)
}

/// Load 8 bytes widened to 16-bit lanes.
#[inline]
#[target_feature(enable = "sse2")]
unsafe fn load8_wide(p: *const u8) -> __m128i {
    _mm_unpacklo_epi8(load8(p), _mm_setzero_si128())
}

#[inline]
#[target_feature(enable = "sse2")]
unsafe fn abs_epi16(x: __m128i) -> __m128i {
    _mm_max_epi16(x, _mm_sub_epi16(_mm_setzero_si128(), x))
}

/// # Safety
///
/// * The CPU must support SSE2.
/// * `a` and `b` must be readable for `3 * s + 8` bytes.
#[target_feature(enable = "sse2")]
unsafe fn diff_sse2(a: *const u8, b: *const u8, s: usize) -> i32 {
    let mut acc = _mm_setzero_si128();
    for i in 0..4 {
        let pa = load8(a.add(i * s));
        let pb = load8(b.add(i * s));
        acc = _mm_add_epi64(acc, _mm_sad_epu8(pa, pb));
    }
    _mm_cvtsi128_si32(acc)
}

/// # Safety
///
/// * The CPU must support SSE2.
/// * `a` and `b` must be readable for `4 * s + 8` bytes.
#[target_feature(enable = "sse2")]
unsafe fn comb_sse2(a: *const u8, b: *const u8, s: usize) -> i32 {
    // Per lane at most 4 * 1020, well inside i16.
    let mut acc = _mm_setzero_si128();
    for i in 0..4 {
        let a0 = load8_wide(a.add(i * s));
        let a1 = load8_wide(a.add((i + 1) * s));
        let above = load8_wide(b.add(i * s));
        let below = load8_wide(b.add((i + 1) * s));

        let t1 = _mm_sub_epi16(_mm_sub_epi16(_mm_add_epi16(a0, a0), above), below);
        let t2 = _mm_sub_epi16(_mm_sub_epi16(_mm_add_epi16(below, below), a0), a1);
        acc = _mm_add_epi16(acc, _mm_add_epi16(abs_epi16(t1), abs_epi16(t2)));
    }

    let pairs = _mm_madd_epi16(acc, _mm_set1_epi16(1));
    let sum = _mm_add_epi32(pairs, _mm_shuffle_epi32(pairs, 0x4E));
    let sum = _mm_add_epi32(sum, _mm_shuffle_epi32(sum, 0xB1));
    _mm_cvtsi128_si32(sum)
}

/// # Safety
///
/// * The CPU must support SSE2.
/// * `a` must be readable for `3 * s + 8` bytes.
#[target_feature(enable = "sse2")]
unsafe fn var_sse2(a: *const u8, s: usize) -> i32 {
    let mut acc = _mm_setzero_si128();
    for i in 0..3 {
        let p0 = load8(a.add(i * s));
        let p1 = load8(a.add((i + 1) * s));
        acc = _mm_add_epi64(acc, _mm_sad_epu8(p0, p1));
    }
    4 * _mm_cvtsi128_si32(acc)
}
