pub mod avx2;
pub mod distance;
pub mod int8;

pub type DistanceFunc = unsafe fn(&[f32], &[f32]) -> f32;
pub type QuantDistanceFunc = unsafe fn(&[u8], &[u8]) -> f32;

pub fn get_l2_sq() -> DistanceFunc {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return avx2::l2_sq_avx2;
        }
    }

    // Fallback
    wrapper_scalar
}

pub fn get_l2_sq_u8() -> QuantDistanceFunc {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if is_x86_feature_detected!("avx2") {
            return int8::l2_sq_u8_avx2;
        }
    }

    // Fallback
    wrapper_scalar_u8
}

unsafe fn wrapper_scalar(a: &[f32], b: &[f32]) -> f32 {
    distance::l2_sq(a, b)
}

unsafe fn wrapper_scalar_u8(a: &[u8], b: &[u8]) -> f32 {
    distance::l2_sq_u8(a, b)
}

/// Hint the prefetcher at the start of a float row. No-op off x86.
#[inline(always)]
pub fn prefetch_row_f32(data: &[f32], row: usize, dim: usize) {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    unsafe {
        use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
        _mm_prefetch(data.as_ptr().add(row * dim) as *const i8, _MM_HINT_T0);
    }
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    {
        let _ = (data, row, dim);
    }
}

/// Hint the prefetcher at the start of a quantized row. No-op off x86.
#[inline(always)]
pub fn prefetch_row_u8(data: &[u8], row: usize, dim: usize) {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    unsafe {
        use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
        _mm_prefetch(data.as_ptr().add(row * dim) as *const i8, _MM_HINT_T0);
    }
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    {
        let _ = (data, row, dim);
    }
}
