use rayon::prelude::*;

/// Below this value range the u8 grid is meaningless and the quantized
/// path falls back to exact distances.
const MIN_RANGE: f32 = 1e-6;

/// Global scalar quantizer (SQ8).
///
/// A single affine map shared by every dimension:
/// `q = clamp(round((v - global_min) * scale_inv), 0, 255)` with
/// `scale_inv = 255 / (global_max - global_min)`.
#[derive(Debug, Clone)]
pub struct ScalarQuantizer {
    pub global_min: f32,
    pub scale_inv: f32,
    pub enabled: bool,
}

impl ScalarQuantizer {
    pub fn disabled() -> Self {
        Self {
            global_min: 0.0,
            scale_inv: 0.0,
            enabled: false,
        }
    }

    /// Scan the full base buffer for the global value range.
    pub fn fit(base: &[f32]) -> Self {
        if base.is_empty() {
            return Self::disabled();
        }

        let mut min_val = f32::MAX;
        let mut max_val = f32::MIN;
        for &v in base {
            if v < min_val {
                min_val = v;
            }
            if v > max_val {
                max_val = v;
            }
        }

        if max_val - min_val < MIN_RANGE {
            Self {
                global_min: min_val,
                scale_inv: 0.0,
                enabled: false,
            }
        } else {
            Self {
                global_min: min_val,
                scale_inv: 255.0 / (max_val - min_val),
                enabled: true,
            }
        }
    }

    /// Encode one vector into `dst`. Rounding is half-up. No-op when the
    /// quantizer is disabled.
    pub fn encode_into(&self, src: &[f32], dst: &mut [u8]) {
        debug_assert_eq!(src.len(), dst.len());
        if !self.enabled {
            return;
        }
        for (d, &v) in dst.iter_mut().zip(src.iter()) {
            let q = ((v - self.global_min) * self.scale_inv + 0.5) as i32;
            *d = q.clamp(0, 255) as u8;
        }
    }

    /// Encode the whole base buffer, one row per node, in parallel.
    pub fn encode_base(&self, base: &[f32], dim: usize) -> Vec<u8> {
        let mut out = vec![0u8; base.len()];
        if !self.enabled {
            return out;
        }
        out.par_chunks_mut(dim)
            .zip(base.par_chunks(dim))
            .for_each(|(dst, src)| self.encode_into(src, dst));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_finds_global_range() {
        let base = [0.5, -2.0, 3.0, 1.0];
        let sq = ScalarQuantizer::fit(&base);
        assert!(sq.enabled);
        assert_eq!(sq.global_min, -2.0);
        assert_eq!(sq.scale_inv, 255.0 / 5.0);
    }

    #[test]
    fn degenerate_range_disables() {
        let base = [7.0; 64];
        let sq = ScalarQuantizer::fit(&base);
        assert!(!sq.enabled);
        assert_eq!(sq.scale_inv, 0.0);

        // Disabled encode leaves the destination untouched
        let mut dst = [9u8; 64];
        sq.encode_into(&base, &mut dst);
        assert_eq!(dst, [9u8; 64]);
    }

    #[test]
    fn rounding_is_half_up() {
        // min 0, max 1 -> scale_inv 255; 0.1 * 255 = 25.5 rounds to 26
        let base = [0.0, 1.0];
        let sq = ScalarQuantizer::fit(&base);
        let mut dst = [0u8; 3];
        sq.encode_into(&[0.1, 0.0, 1.0], &mut dst);
        assert_eq!(dst, [26, 0, 255]);
    }

    #[test]
    fn round_trip_error_is_bounded() {
        let base: Vec<f32> = (0..512).map(|i| ((i * 37) % 100) as f32 / 7.0 - 4.0).collect();
        let sq = ScalarQuantizer::fit(&base);
        assert!(sq.enabled);

        let mut dst = vec![0u8; base.len()];
        sq.encode_into(&base, &mut dst);

        // Half-up rounding keeps each coordinate within half a grid step
        let step = 1.0 / sq.scale_inv;
        for (&v, &q) in base.iter().zip(dst.iter()) {
            let back = f32::from(q) / sq.scale_inv + sq.global_min;
            assert!(
                (back - v).abs() <= step * 0.5 + 1e-5,
                "v={v} back={back} step={step}"
            );
        }
    }

    #[test]
    fn encode_base_matches_per_row_encode() {
        let dim = 7;
        let base: Vec<f32> = (0..dim * 9).map(|i| (i as f32).sin() * 3.0).collect();
        let sq = ScalarQuantizer::fit(&base);
        let all = sq.encode_base(&base, dim);

        let mut row = vec![0u8; dim];
        for i in 0..9 {
            sq.encode_into(&base[i * dim..(i + 1) * dim], &mut row);
            assert_eq!(&all[i * dim..(i + 1) * dim], &row[..]);
        }
    }
}
