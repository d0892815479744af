#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
use std::arch::x86_64::*;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[target_feature(enable = "avx2", enable = "fma")]
pub unsafe fn l2_sq_avx2(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len();
    let mut sum256 = _mm256_setzero_ps();
    let mut i = 0;

    // Process 8 floats at a time
    while i + 8 <= n {
        let a_vec = _mm256_loadu_ps(a.as_ptr().add(i));
        let b_vec = _mm256_loadu_ps(b.as_ptr().add(i));
        let diff = _mm256_sub_ps(a_vec, b_vec);
        // FMA: sum = sum + diff * diff
        sum256 = _mm256_fmadd_ps(diff, diff, sum256);
        i += 8;
    }

    // Horizontal sum: reduce to 128 bits, then two hadds
    let sum128 = _mm_add_ps(_mm256_castps256_ps128(sum256), _mm256_extractf128_ps(sum256, 1));
    let sum128 = _mm_hadd_ps(sum128, sum128);
    let sum128 = _mm_hadd_ps(sum128, sum128);
    let mut sum = _mm_cvtss_f32(sum128);

    // Scalar tail for dimensions not divisible by 8
    while i < n {
        let diff = a[i] - b[i];
        sum += diff * diff;
        i += 1;
    }

    sum
}

#[cfg(test)]
mod tests {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[test]
    fn matches_scalar_with_tail() {
        use crate::simd::distance::l2_sq;

        if !is_x86_feature_detected!("avx2") || !is_x86_feature_detected!("fma") {
            println!("Skipping AVX2 test (instruction set not supported)");
            return;
        }

        // Deliberately awkward lengths to exercise the tail path
        for n in [1usize, 7, 8, 9, 16, 33, 128, 131] {
            let a: Vec<f32> = (0..n).map(|i| (i as f32) * 0.37 - 3.0).collect();
            let b: Vec<f32> = (0..n).map(|i| (i as f32) * -0.11 + 1.5).collect();
            let simd = unsafe { super::l2_sq_avx2(&a, &b) };
            let scalar = l2_sq(&a, &b);
            assert!(
                (simd - scalar).abs() <= scalar.abs() * 1e-5 + 1e-4,
                "n={n}: simd={simd} scalar={scalar}"
            );
        }
    }
}
