/// Squared Euclidean distance, scalar reference path.
///
/// No square root: every comparison in the engine is between two squared
/// distances, and sqrt is monotonic.
pub fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
}

/// Squared Euclidean distance between two quantized rows.
///
/// Each term is at most 255^2, accumulated in i64 so no practical dimension
/// count can overflow, then widened to f32 for heap comparisons.
pub fn l2_sq_u8(a: &[u8], b: &[u8]) -> f32 {
    assert_eq!(a.len(), b.len());
    let mut sum: i64 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = i32::from(*x) - i32::from(*y);
        sum += i64::from(diff * diff);
    }
    sum as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_sq_basic() {
        let a = [1.0, 2.0, 3.0];
        let b = [1.0, 0.0, 6.0];
        // 0 + 4 + 9
        assert_eq!(l2_sq(&a, &b), 13.0);
    }

    #[test]
    fn l2_sq_identical_is_zero() {
        let a = [0.25f32; 17];
        assert_eq!(l2_sq(&a, &a), 0.0);
    }

    #[test]
    fn l2_sq_u8_basic() {
        let a = [0u8, 255, 10];
        let b = [255u8, 0, 10];
        let expected = (255 * 255 * 2) as f32;
        assert_eq!(l2_sq_u8(&a, &b), expected);
    }

    #[test]
    fn l2_sq_u8_matches_wide_reference() {
        let a: Vec<u8> = (0..333).map(|i| (i * 7 % 256) as u8).collect();
        let b: Vec<u8> = (0..333).map(|i| (i * 13 % 256) as u8).collect();
        let reference: i64 = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| {
                let d = i64::from(*x) - i64::from(*y);
                d * d
            })
            .sum();
        assert_eq!(l2_sq_u8(&a, &b), reference as f32);
    }
}
