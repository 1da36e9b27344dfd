use image::{GrayImage, RgbImage};

/// Flat `f32` raster with interleaved channels, the working format of the
/// correlation kernels.
#[derive(Debug, Clone)]
pub struct Plane {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn from_gray(img: &GrayImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            channels: 1,
            data: img.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    pub fn from_rgb(img: &RgbImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            channels: 3,
            data: img.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    fn value(&self, x: u32, y: u32, c: u32) -> f32 {
        self.data[((y * self.width + x) * self.channels + c) as usize]
    }
}

/// A template reduced to its masked pixels, zero-meaned, ready for a sliding
/// normalized cross-correlation.
#[derive(Debug, Clone)]
pub struct MaskedTemplate {
    width: u32,
    height: u32,
    channels: u32,
    /// `(dx, dy, channel, value - mean)` for every masked sample.
    taps: Vec<(u32, u32, u32, f64)>,
    sum_sq: f64,
}

impl MaskedTemplate {
    /// Returns `None` when the mask is empty or the masked template is flat,
    /// since a flat template correlates with nothing.
    pub fn new(template: &Plane, mask: &GrayImage) -> Option<Self> {
        debug_assert_eq!((template.width, template.height), mask.dimensions());

        let mut raw = Vec::new();
        for (x, y, m) in mask.enumerate_pixels() {
            if m[0] == 0 {
                continue;
            }
            for c in 0..template.channels {
                raw.push((x, y, c, template.value(x, y, c) as f64));
            }
        }
        if raw.is_empty() {
            return None;
        }

        let mean = raw.iter().map(|t| t.3).sum::<f64>() / raw.len() as f64;
        let taps: Vec<_> = raw.into_iter().map(|(x, y, c, v)| (x, y, c, v - mean)).collect();
        let sum_sq: f64 = taps.iter().map(|t| t.3 * t.3).sum();
        if sum_sq < 1e-6 {
            return None;
        }

        Some(Self {
            width: template.width,
            height: template.height,
            channels: template.channels,
            taps,
            sum_sq,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Slide over every offset of `source` and return the best
    /// `(score, x, y)`, score in [-1, 1]. `None` if the source is smaller
    /// than the template or every window is flat.
    pub fn best_match(&self, source: &Plane) -> Option<(f64, u32, u32)> {
        if source.channels != self.channels
            || source.width < self.width
            || source.height < self.height
        {
            return None;
        }

        let stride = source.width as usize * source.channels as usize;
        let ch = source.channels as usize;
        let offsets: Vec<(usize, f64)> = self
            .taps
            .iter()
            .map(|&(x, y, c, t)| (y as usize * stride + x as usize * ch + c as usize, t))
            .collect();
        let n = offsets.len() as f64;
        let data = &source.data;

        let mut best: Option<(f64, u32, u32)> = None;
        for oy in 0..=(source.height - self.height) {
            for ox in 0..=(source.width - self.width) {
                let base = oy as usize * stride + ox as usize * ch;
                let mut sum = 0.0f64;
                let mut sum_sq = 0.0f64;
                let mut cross = 0.0f64;
                for &(off, t) in &offsets {
                    let v = data[base + off] as f64;
                    sum += v;
                    sum_sq += v * v;
                    cross += v * t;
                }
                let variance = sum_sq - sum * sum / n;
                if variance < 1e-3 {
                    continue;
                }
                // Σ t'·(v - mean_v) == Σ t'·v because t' is zero-mean.
                let score = cross / (self.sum_sq * variance).sqrt();
                if best.map_or(true, |(s, _, _)| score > s) {
                    best = Some((score, ox, oy));
                }
            }
        }
        best
    }
}

/// Compute mean and standard deviation of pixel values
pub fn compute_stats(img: &GrayImage) -> (f64, f64) {
    let pixels: Vec<f64> = img.pixels().map(|p| p[0] as f64).collect();
    let n = pixels.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = pixels.iter().sum::<f64>() / n;
    let variance = pixels.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Zero-mean Normalized Cross-Correlation between two same-sized images.
/// Returns a value between -1.0 (inverse) and 1.0 (perfect match).
pub fn normalized_cross_correlation(
    img: &GrayImage,
    img_mean: f64,
    img_std: f64,
    tmpl: &GrayImage,
    tmpl_mean: f64,
    tmpl_std: f64,
) -> f64 {
    debug_assert_eq!(img.dimensions(), tmpl.dimensions());

    let denom = img_std * tmpl_std;
    if denom < 1e-10 {
        return 0.0;
    }

    let n = (img.width() * img.height()) as f64;
    let cross: f64 = img
        .pixels()
        .zip(tmpl.pixels())
        .map(|(ip, tp)| (ip[0] as f64 - img_mean) * (tp[0] as f64 - tmpl_mean))
        .sum();

    cross / (n * denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn pattern(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let mut v = x
                .wrapping_mul(374_761_393)
                .wrapping_add(y.wrapping_mul(668_265_263));
            v = (v ^ (v >> 13)).wrapping_mul(1_274_126_177);
            Luma([((v ^ (v >> 16)) & 0xff) as u8])
        })
    }

    #[test]
    fn test_ncc_identical() {
        let img = pattern(48, 48);
        let (mean, std) = compute_stats(&img);
        let score = normalized_cross_correlation(&img, mean, std, &img, mean, std);
        assert!(
            (score - 1.0).abs() < 0.001,
            "Identical images should have NCC ≈ 1.0, got {}",
            score
        );
    }

    #[test]
    fn test_ncc_different() {
        let img1 = GrayImage::from_fn(48, 48, |x, _| Luma([(x % 256) as u8]));
        let img2 = GrayImage::from_fn(48, 48, |_, y| Luma([(y % 256) as u8]));
        let (m1, s1) = compute_stats(&img1);
        let (m2, s2) = compute_stats(&img2);
        let score = normalized_cross_correlation(&img1, m1, s1, &img2, m2, s2);
        assert!(score < 0.5, "Different images should have low NCC, got {}", score);
    }

    #[test]
    fn test_masked_match_finds_offset() {
        let source = pattern(60, 50);
        let tmpl = image::imageops::crop_imm(&source, 17, 9, 20, 16).to_image();
        let mask = GrayImage::from_pixel(20, 16, Luma([255]));

        let prepared = MaskedTemplate::new(&Plane::from_gray(&tmpl), &mask).unwrap();
        let (score, x, y) = prepared.best_match(&Plane::from_gray(&source)).unwrap();
        assert_eq!((x, y), (17, 9));
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mask_ignores_occluded_pixels() {
        let source = pattern(40, 40);
        let mut tmpl = image::imageops::crop_imm(&source, 5, 12, 16, 16).to_image();
        let mut mask = GrayImage::from_pixel(16, 16, Luma([255]));
        // Occlude the middle of the template and mask it out.
        for y in 6..10 {
            for x in 6..10 {
                tmpl.put_pixel(x, y, Luma([255]));
                mask.put_pixel(x, y, Luma([0]));
            }
        }
        let prepared = MaskedTemplate::new(&Plane::from_gray(&tmpl), &mask).unwrap();
        let (score, x, y) = prepared.best_match(&Plane::from_gray(&source)).unwrap();
        assert_eq!((x, y), (5, 12));
        assert!(score > 0.999);
    }

    #[test]
    fn test_flat_template_rejected() {
        let tmpl = GrayImage::from_pixel(8, 8, Luma([90]));
        let mask = GrayImage::from_pixel(8, 8, Luma([255]));
        assert!(MaskedTemplate::new(&Plane::from_gray(&tmpl), &mask).is_none());
    }

    #[test]
    fn test_color_plane_match() {
        let source = RgbImage::from_fn(30, 30, |x, y| {
            image::Rgb([(x * 8) as u8, (y * 8) as u8, ((x * y) % 200) as u8])
        });
        let tmpl = image::imageops::crop_imm(&source, 11, 4, 10, 10).to_image();
        let mask = GrayImage::from_pixel(10, 10, Luma([255]));
        let prepared = MaskedTemplate::new(&Plane::from_rgb(&tmpl), &mask).unwrap();
        let (_, x, y) = prepared.best_match(&Plane::from_rgb(&source)).unwrap();
        assert_eq!((x, y), (11, 4));
    }
}
