#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
use std::arch::x86_64::*;

/// Squared L2 over quantized u8 rows (AVX2).
///
/// Logic:
/// 1. Widen 16 bytes of each operand to i16 lanes (`cvtepu8_epi16`)
/// 2. Subtract: diffs fit i16 (range -255..255)
/// 3. `madd_epi16(diff, diff)` squares and sums adjacent pairs into i32
/// 4. Accumulate i32 lanes; each madd lane is at most 2 * 255^2, so a lane
///    would need ~16k iterations (260k dimensions) to overflow i32
///
/// Returns the sum widened to f32, matching the scalar path.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[target_feature(enable = "avx2")]
pub unsafe fn l2_sq_u8_avx2(a: &[u8], b: &[u8]) -> f32 {
    let n = a.len();
    debug_assert_eq!(n, b.len());

    let mut acc = _mm256_setzero_si256();
    let mut i = 0;
    let ptr_a = a.as_ptr();
    let ptr_b = b.as_ptr();

    // Process 16 bytes at a time
    while i + 16 <= n {
        let va = _mm256_cvtepu8_epi16(_mm_loadu_si128(ptr_a.add(i) as *const _));
        let vb = _mm256_cvtepu8_epi16(_mm_loadu_si128(ptr_b.add(i) as *const _));
        let diff = _mm256_sub_epi16(va, vb);
        acc = _mm256_add_epi32(acc, _mm256_madd_epi16(diff, diff));
        i += 16;
    }

    // Horizontal sum of the 8 i32 lanes
    let sum128 = _mm_add_epi32(_mm256_castsi256_si128(acc), _mm256_extracti128_si256(acc, 1));
    let sum64 = _mm_hadd_epi32(sum128, sum128);
    let sum32 = _mm_hadd_epi32(sum64, sum64);
    let mut total = i64::from(_mm_cvtsi128_si32(sum32));

    // Scalar tail
    while i < n {
        let diff = i32::from(*a.get_unchecked(i)) - i32::from(*b.get_unchecked(i));
        total += i64::from(diff * diff);
        i += 1;
    }

    total as f32
}

#[cfg(test)]
mod tests {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[test]
    fn matches_scalar() {
        use crate::simd::distance::l2_sq_u8;

        if !is_x86_feature_detected!("avx2") {
            println!("Skipping AVX2 test (instruction set not supported)");
            return;
        }

        for n in [1usize, 15, 16, 17, 48, 100, 256, 300] {
            let a: Vec<u8> = (0..n).map(|i| (i * 31 % 256) as u8).collect();
            let b: Vec<u8> = (0..n).map(|i| (i * 57 % 256) as u8).collect();
            let simd = unsafe { super::l2_sq_u8_avx2(&a, &b) };
            assert_eq!(simd, l2_sq_u8(&a, &b), "n={n}");
        }
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[test]
    fn extreme_values() {
        use crate::simd::distance::l2_sq_u8;

        if !is_x86_feature_detected!("avx2") {
            println!("Skipping AVX2 test (instruction set not supported)");
            return;
        }

        // Worst case per term: (255 - 0)^2
        let a = vec![255u8; 1024];
        let b = vec![0u8; 1024];
        let expected = 1024.0 * 255.0 * 255.0;
        let simd = unsafe { super::l2_sq_u8_avx2(&a, &b) };
        assert_eq!(simd, expected);
        assert_eq!(simd, l2_sq_u8(&a, &b));
    }
}
