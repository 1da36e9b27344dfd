//! Heading extraction from the avatar arrow in the minimap center.

use crate::color::channel_distance;
use crate::imaging::{mask_count, mask_from_rgb, remove_small_blobs, rotate_about_center, window};
use crate::template::{compute_stats, normalized_cross_correlation};
use image::{GrayImage, Luma, RgbImage};
use nav_state::normalize_degrees;
use tracing::debug;

/// Number of discretized headings in the rotation bank.
pub const ANGLE_STEPS: usize = 192;
/// Angular resolution of the bank, 1.875°.
pub const ANGLE_STEP_DEG: f64 = 360.0 / ANGLE_STEPS as f64;

/// Bank index of the heading closest to `degrees`.
pub fn angle_index(degrees: f64) -> usize {
    (normalize_degrees(degrees) / ANGLE_STEP_DEG).round() as usize % ANGLE_STEPS
}

/// Arrow template pre-rotated to every discretized heading.
///
/// The bank is filled eagerly for all 192 headings at construction: the arrow
/// template is tiny, and a full bank keeps per-frame cost deterministic.
pub struct ArrowBank {
    templates: Vec<(GrayImage, f64, f64)>,
}

impl ArrowBank {
    /// `reference` is the arrow pointing up (heading 0°), set pixels > 0.
    pub fn new(reference: &GrayImage) -> Self {
        let binary = GrayImage::from_fn(reference.width(), reference.height(), |x, y| {
            if reference.get_pixel(x, y)[0] > 0 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        let templates = (0..ANGLE_STEPS)
            .map(|i| {
                let rotated = rotated_arrow(&binary, i as f64 * ANGLE_STEP_DEG);
                let (mean, std) = compute_stats(&rotated);
                (rotated, mean, std)
            })
            .collect();
        Self { templates }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.templates[0].0.dimensions()
    }

    pub fn template(&self, index: usize) -> &GrayImage {
        &self.templates[index % ANGLE_STEPS].0
    }

    /// Best `(heading, score)` for an arrow-only mask of the bank's size.
    pub fn best_angle(&self, blob: &GrayImage) -> Option<(f64, f64)> {
        if blob.dimensions() != self.dimensions() {
            return None;
        }
        let (mean, std) = compute_stats(blob);
        self.templates
            .iter()
            .enumerate()
            .map(|(i, (t, tm, ts))| {
                let score = normalized_cross_correlation(blob, mean, std, t, *tm, *ts);
                (i as f64 * ANGLE_STEP_DEG, score)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Rotate an up-pointing arrow so it points at `heading` (clockwise from up).
pub fn rotated_arrow(reference: &GrayImage, heading: f64) -> GrayImage {
    rotate_about_center(reference, normalize_degrees(360.0 - heading))
}

/// Finds the avatar arrow in a minimap crop and reads its heading.
pub struct HeadingDetector {
    bank: ArrowBank,
    arrow_color: [u8; 3],
    tolerance: u8,
    min_blob_area: usize,
    min_score: f64,
}

impl HeadingDetector {
    pub fn new(
        reference: &GrayImage,
        arrow_color: [u8; 3],
        tolerance: u8,
        min_blob_area: usize,
        min_score: f64,
    ) -> Self {
        Self {
            bank: ArrowBank::new(reference),
            arrow_color,
            tolerance,
            min_blob_area,
            min_score,
        }
    }

    pub fn bank(&self) -> &ArrowBank {
        &self.bank
    }

    /// Top-left corner of the centered arrow window inside a crop.
    pub fn window_origin(&self, crop_w: u32, crop_h: u32) -> (u32, u32) {
        let (w, h) = self.bank.dimensions();
        (crop_w.saturating_sub(w) / 2, crop_h.saturating_sub(h) / 2)
    }

    /// Arrow-colored pixels of the centered window, blobs under the noise
    /// floor removed. Sized like the bank templates.
    pub fn window_mask(&self, crop: &RgbImage) -> Option<GrayImage> {
        let (w, h) = self.bank.dimensions();
        let (x0, y0) = self.window_origin(crop.width(), crop.height());
        let win = window(crop, x0, y0, w, h)?;
        if win.dimensions() != (w, h) {
            return None;
        }
        let color = self.arrow_color;
        let tol = self.tolerance;
        let raw = mask_from_rgb(&win, |p| channel_distance(p, color) <= tol);
        Some(remove_small_blobs(&raw, self.min_blob_area))
    }

    /// Full-size arrow mask: the window mask pasted back at its crop position.
    pub fn full_mask(&self, crop: &RgbImage, window_mask: Option<&GrayImage>) -> GrayImage {
        let mut full = GrayImage::new(crop.width(), crop.height());
        if let Some(win) = window_mask {
            let (x0, y0) = self.window_origin(crop.width(), crop.height());
            image::imageops::replace(&mut full, win, x0 as i64, y0 as i64);
        }
        full
    }

    /// Heading in degrees, or `None` when no arrow blob survives or the best
    /// bank correlation is too weak.
    pub fn detect(&self, window_mask: &GrayImage) -> Option<f64> {
        if mask_count(window_mask) < self.min_blob_area {
            return None;
        }
        let (angle, score) = self.bank.best_angle(window_mask)?;
        debug!("Heading candidate {:.3}° (score {:.3})", angle, score);
        (score >= self.min_score).then_some(angle)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Up-pointing isosceles triangle used as the arrow reference.
    pub(crate) fn arrow_reference(size: u32) -> GrayImage {
        let c = (size as f64 - 1.0) / 2.0;
        GrayImage::from_fn(size, size, |x, y| {
            let top = 1.0;
            let bottom = size as f64 - 2.0;
            let yf = y as f64;
            let half = (yf - top) / (bottom - top) * (c - 1.0);
            if yf >= top && yf <= bottom && (x as f64 - c).abs() <= half {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    /// Paint an arrow at `heading` into the center of `crop`.
    pub(crate) fn paint_arrow(crop: &mut RgbImage, reference: &GrayImage, heading: f64, color: [u8; 3]) {
        let rotated = rotated_arrow(reference, heading);
        let x0 = (crop.width() - rotated.width()) / 2;
        let y0 = (crop.height() - rotated.height()) / 2;
        for (x, y, p) in rotated.enumerate_pixels() {
            if p[0] > 0 {
                crop.put_pixel(x0 + x, y0 + y, image::Rgb(color));
            }
        }
    }

    fn detector(reference: &GrayImage) -> HeadingDetector {
        HeadingDetector::new(reference, crate::color::ARROW_COLOR, 40, 8, 0.5)
    }

    #[test]
    fn test_angle_index_wraps() {
        assert_eq!(angle_index(0.0), 0);
        assert_eq!(angle_index(90.0), 48);
        assert_eq!(angle_index(359.5), 0);
        assert_eq!(angle_index(-1.875), 191);
    }

    #[test]
    fn test_bank_points_clockwise() {
        let reference = arrow_reference(15);
        let bank = ArrowBank::new(&reference);
        // Heading 90° points right: mass on the right half.
        let east = bank.template(angle_index(90.0));
        let right: usize = east.enumerate_pixels().filter(|(x, _, p)| *x > 7 && p[0] > 0).count();
        let left: usize = east.enumerate_pixels().filter(|(x, _, p)| *x < 7 && p[0] > 0).count();
        assert!(right > left);
    }

    #[test]
    fn test_detects_painted_heading() {
        let reference = arrow_reference(15);
        let det = detector(&reference);
        for heading in [0.0, 90.0, 202.5, 300.0] {
            let mut crop = RgbImage::from_pixel(60, 60, image::Rgb([40, 90, 60]));
            paint_arrow(&mut crop, &reference, heading, crate::color::ARROW_COLOR);
            let win = det.window_mask(&crop).unwrap();
            let angle = det.detect(&win).expect("arrow should be found");
            let err = nav_state::turn_between(heading, angle).abs();
            assert!(err <= ANGLE_STEP_DEG, "heading {heading}: got {angle}");
        }
    }

    #[test]
    fn test_no_arrow_gives_none() {
        let reference = arrow_reference(15);
        let det = detector(&reference);
        let crop = RgbImage::from_pixel(60, 60, image::Rgb([40, 90, 60]));
        let win = det.window_mask(&crop).unwrap();
        assert!(det.detect(&win).is_none());
    }

    #[test]
    fn test_full_mask_placement() {
        let reference = arrow_reference(15);
        let det = detector(&reference);
        let mut crop = RgbImage::from_pixel(61, 61, image::Rgb([40, 90, 60]));
        paint_arrow(&mut crop, &reference, 0.0, crate::color::ARROW_COLOR);
        let win = det.window_mask(&crop);
        let full = det.full_mask(&crop, win.as_ref());
        assert_eq!(full.dimensions(), (61, 61));
        assert_eq!(mask_count(&full), mask_count(&reference));
        assert_eq!(full.get_pixel(0, 0)[0], 0);
    }
}
