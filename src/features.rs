// ============================================================================
// FEATURE EXTRACTION — pixel coordinate → numeric feature vector
// ============================================================================

use image::RgbaImage;

use crate::raster::ScalarLayer;

/// Number of color-derived features: normalized R, G, B plus H, S, L.
const COLOR_FEATURES: usize = 6;

/// Turns a pixel coordinate into a fixed-length feature vector from the
/// master raster and the auxiliary layers.  Pure and lock-free, so whole
/// rasters can be classified with a rayon fan-out.
///
/// Coordinates are the caller's responsibility to bounds-check; layer order
/// fixes the vector layout for the life of the session.
pub struct FeatureExtractor<'a> {
    master: &'a RgbaImage,
    layers: &'a [(String, ScalarLayer)],
    patch: bool,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(master: &'a RgbaImage, layers: &'a [(String, ScalarLayer)], patch: bool) -> Self {
        Self { master, layers, patch }
    }

    /// Feature vector length, constant for a session.
    pub fn len(&self) -> usize {
        let base = if self.patch { COLOR_FEATURES * 2 } else { COLOR_FEATURES };
        base + self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Features at (x, y).  In patch mode the color block is replaced by
    /// 3×3-neighborhood mean and standard deviation per channel.
    pub fn features(&self, x: u32, y: u32) -> Vec<f64> {
        let mut fv = Vec::with_capacity(self.len());
        if self.patch {
            self.push_patch_stats(x, y, &mut fv);
        } else {
            push_color(self.master, x, y, &mut fv);
        }
        for (_, layer) in self.layers {
            fv.push(layer.get_pixel(x, y).0[0] as f64);
        }
        fv
    }

    /// 3×3 per-channel mean + sample std-dev of the color features, edge
    /// pixels using whatever neighbors exist.
    fn push_patch_stats(&self, x: u32, y: u32, fv: &mut Vec<f64>) {
        let (w, h) = self.master.dimensions();
        let mut sums = [0.0f64; COLOR_FEATURES];
        let mut sq_sums = [0.0f64; COLOR_FEATURES];
        let mut n = 0.0f64;
        let mut scratch = Vec::with_capacity(COLOR_FEATURES);

        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                scratch.clear();
                push_color(self.master, nx as u32, ny as u32, &mut scratch);
                for (k, v) in scratch.iter().enumerate() {
                    sums[k] += v;
                    sq_sums[k] += v * v;
                }
                n += 1.0;
            }
        }

        for k in 0..COLOR_FEATURES {
            fv.push(sums[k] / n);
        }
        for k in 0..COLOR_FEATURES {
            let mean = sums[k] / n;
            let var = if n > 1.0 {
                ((sq_sums[k] - n * mean * mean) / (n - 1.0)).max(0.0)
            } else {
                0.0
            };
            fv.push(var.sqrt());
        }
    }
}

fn push_color(master: &RgbaImage, x: u32, y: u32, fv: &mut Vec<f64>) {
    let p = master.get_pixel(x, y).0;
    let r = p[0] as f64 / 255.0;
    let g = p[1] as f64 / 255.0;
    let b = p[2] as f64 / 255.0;
    let (h, s, l) = rgb_to_hsl(r, g, b);
    fv.extend_from_slice(&[r, g, b, h, s, l]);
}

/// RGB (0..1) → HSL (H: 0..1, S: 0..1, L: 0..1).
pub fn rgb_to_hsl(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;

    if (max - min).abs() < 1e-9 {
        return (0.0, 0.0, l);
    }

    let d = max - min;
    let s = if l > 0.5 { d / (2.0 - max - min) } else { d / (max + min) };

    let h = if (max - r).abs() < 1e-9 {
        let mut h = (g - b) / d;
        if h < 0.0 {
            h += 6.0;
        }
        h / 6.0
    } else if (max - g).abs() < 1e-9 {
        ((b - r) / d + 2.0) / 6.0
    } else {
        ((r - g) / d + 4.0) / 6.0
    };

    (h, s, l)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn hsl_of_primaries() {
        let (h, s, l) = rgb_to_hsl(1.0, 0.0, 0.0);
        assert!(close(h, 0.0) && close(s, 1.0) && close(l, 0.5));

        let (h, _, _) = rgb_to_hsl(0.0, 1.0, 0.0);
        assert!(close(h, 1.0 / 3.0));

        let (h, s, l) = rgb_to_hsl(0.5, 0.5, 0.5);
        assert!(close(h, 0.0) && close(s, 0.0) && close(l, 0.5));
    }

    #[test]
    fn vector_layout_appends_layers_in_order() {
        let master = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let mut dem: ScalarLayer = ScalarLayer::new(4, 4);
        dem.put_pixel(1, 1, Luma([321.5f32]));
        let mut slope: ScalarLayer = ScalarLayer::new(4, 4);
        slope.put_pixel(1, 1, Luma([0.25f32]));
        let layers = vec![("dem".to_string(), dem), ("slope".to_string(), slope)];

        let fx = FeatureExtractor::new(&master, &layers, false);
        assert_eq!(fx.len(), 8);
        let fv = fx.features(1, 1);
        assert!(close(fv[0], 1.0)); // red channel
        assert!(close(fv[6], 321.5));
        assert!(close(fv[7], 0.25));
    }

    #[test]
    fn patch_stats_flat_region_has_zero_stddev() {
        let master = RgbaImage::from_pixel(5, 5, Rgba([64, 128, 192, 255]));
        let layers = Vec::new();
        let fx = FeatureExtractor::new(&master, &layers, true);
        assert_eq!(fx.len(), 12);
        let fv = fx.features(2, 2);
        for k in 6..12 {
            assert!(close(fv[k], 0.0), "flat patch must have zero spread");
        }
    }
}
