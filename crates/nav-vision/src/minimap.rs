use crate::cache::LruCache;
use crate::color::{self, ARROW_COLOR};
use crate::features::{self, FeatureSet};
use crate::heading::{angle_index, HeadingDetector, ANGLE_STEP_DEG};
use crate::imaging::{
    circle_mask, disc_mask, mask_and, mask_count, mask_from_rgb, mask_or, rotate_about_center,
    saturating_sub,
};
use anyhow::{Context, Result};
use image::{GrayImage, RgbImage};
use nav_state::{normalize_degrees, MatchResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

/// Reference images of the minimap decoration.
#[derive(Debug, Clone)]
pub struct MinimapAssets {
    /// Arrow pointing up (heading 0°), set pixels > 0.
    pub arrow: GrayImage,
    /// Radar sweep alone on black, drawn for heading 0°.
    pub radar: RgbImage,
}

impl MinimapAssets {
    /// Load `arrow.png` and `radar.png` from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let arrow_path = dir.join("arrow.png");
        let radar_path = dir.join("radar.png");
        let arrow = image::open(&arrow_path)
            .with_context(|| format!("Failed to open {}", arrow_path.display()))?
            .to_luma8();
        let radar = image::open(&radar_path)
            .with_context(|| format!("Failed to open {}", radar_path.display()))?
            .to_rgb8();
        Ok(Self { arrow, radar })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimapConfig {
    pub arrow_color: [u8; 3],
    /// Max per-channel distance to `arrow_color`.
    pub arrow_tolerance: u8,
    /// Noise floor for arrow blobs, in pixels.
    pub min_arrow_blob: usize,
    pub min_heading_score: f64,
    /// Pixels trimmed from the minimap circle border.
    pub circle_margin: f64,
    /// Rotated radar references kept in memory.
    pub radar_cache_size: usize,
    /// Radius around the avatar, as a fraction of the minimap radius, in which
    /// enemy markers count as an attacker lock.
    pub enemy_alert_radius: f64,
    pub enemy_alert_min_pixels: usize,
}

impl Default for MinimapConfig {
    fn default() -> Self {
        Self {
            arrow_color: ARROW_COLOR,
            arrow_tolerance: 40,
            min_arrow_blob: 8,
            min_heading_score: 0.5,
            circle_margin: 2.0,
            radar_cache_size: 32,
            enemy_alert_radius: 0.35,
            enemy_alert_min_pixels: 6,
        }
    }
}

/// Road segmentation of one minimap.
#[derive(Debug, Clone)]
pub struct RoadMasks {
    /// Semantic "is this a road" answer.
    pub strict: GrayImage,
    /// `strict` plus the light-gray road border, for matching tolerance only.
    pub with_edge: GrayImage,
    pub enemy: GrayImage,
}

/// A landmark template prepared for feature matching.
#[derive(Debug, Clone)]
pub struct LandmarkTemplate {
    pub id: String,
    pub image: RgbImage,
    pub features: FeatureSet,
    /// Map pixels per template pixel.
    pub map_scale: f64,
}

impl LandmarkTemplate {
    pub fn new(id: impl Into<String>, image: RgbImage, map_scale: f64) -> Self {
        let features = features::extract(&image, None);
        Self {
            id: id.into(),
            image,
            features,
            map_scale,
        }
    }
}

/// Turns raw minimap crops into the signals localization needs. Shared by all
/// ticks of a session; per-frame results live in [`MiniMapInfo`].
pub struct MiniMapPreprocessor {
    config: MinimapConfig,
    heading: HeadingDetector,
    radar: RgbImage,
    radar_cache: Mutex<LruCache<(usize, u32, u32), Arc<RgbImage>>>,
}

impl MiniMapPreprocessor {
    pub fn new(assets: MinimapAssets, config: MinimapConfig) -> Self {
        let heading = HeadingDetector::new(
            &assets.arrow,
            config.arrow_color,
            config.arrow_tolerance,
            config.min_arrow_blob,
            config.min_heading_score,
        );
        Self {
            radar_cache: Mutex::new(LruCache::new(config.radar_cache_size)),
            config,
            heading,
            radar: assets.radar,
        }
    }

    pub fn config(&self) -> &MinimapConfig {
        &self.config
    }

    pub fn heading_detector(&self) -> &HeadingDetector {
        &self.heading
    }

    pub fn circle_mask(&self, width: u32, height: u32) -> GrayImage {
        circle_mask(width, height, self.config.circle_margin)
    }

    /// Heading of the avatar arrow, or `None` when the arrow is not found.
    pub fn extract_heading(&self, crop: &RgbImage) -> Option<f64> {
        let win = self.heading.window_mask(crop)?;
        self.heading.detect(&win)
    }

    /// Whether arrow-colored pixels survive the noise floor in the centered
    /// window. No bank correlation.
    pub fn arrow_visible(&self, crop: &RgbImage) -> bool {
        self.heading
            .window_mask(crop)
            .is_some_and(|win| mask_count(&win) >= self.config.min_arrow_blob)
    }

    /// Subtract the radar sweep for `angle` from the crop (saturating). An
    /// unresolved angle returns the raw crop.
    pub fn remove_radar_overlay(&self, crop: &RgbImage, angle: Option<f64>) -> RgbImage {
        let Some(angle) = angle else {
            return crop.clone();
        };
        let reference = self.rotated_radar(angle, crop.width(), crop.height());
        saturating_sub(crop, &reference)
    }

    fn rotated_radar(&self, angle: f64, width: u32, height: u32) -> Arc<RgbImage> {
        let idx = angle_index(angle);
        let build = || {
            let sized = if self.radar.dimensions() == (width, height) {
                self.radar.clone()
            } else {
                image::imageops::resize(
                    &self.radar,
                    width,
                    height,
                    image::imageops::FilterType::Triangle,
                )
            };
            let degrees = normalize_degrees(360.0 - idx as f64 * ANGLE_STEP_DEG);
            Arc::new(rotate_about_center(&sized, degrees))
        };
        match self.radar_cache.lock() {
            Ok(mut cache) => cache.get_or_insert_with((idx, width, height), build),
            // A poisoned cache only costs the memoization.
            Err(_) => build(),
        }
    }

    /// Segment roads (and enemies) inside the circular valid area.
    pub fn build_road_mask(
        &self,
        crop: &RgbImage,
        circle: &GrayImage,
        another_floor_possible: bool,
    ) -> RoadMasks {
        let mut road = mask_from_rgb(crop, color::is_road);
        if another_floor_possible {
            road = mask_or(&road, &mask_from_rgb(crop, color::is_other_floor_road));
        }
        let enemy = mask_and(&mask_from_rgb(crop, color::is_enemy), circle);
        let strict = mask_and(&mask_or(&road, &enemy), circle);
        let with_edge = mask_and(&mask_or(&strict, &mask_from_rgb(crop, color::is_edge)), circle);
        RoadMasks {
            strict,
            with_edge,
            enemy,
        }
    }

    /// Feature-match each landmark template against the crop inside the
    /// circle; one result per landmark id found. No templates, no work.
    pub fn build_special_point_mask(
        &self,
        crop: &RgbImage,
        circle: &GrayImage,
        landmarks: &[Arc<LandmarkTemplate>],
    ) -> HashMap<String, Vec<MatchResult>> {
        let mut found = HashMap::new();
        if landmarks.is_empty() {
            return found;
        }
        let scene = features::extract(crop, Some(circle));
        if scene.is_empty() {
            return found;
        }
        for lm in landmarks {
            if let Some(m) = features::locate(&lm.features, &scene) {
                debug!(
                    "Landmark '{}' on minimap at ({:.1}, {:.1}) scale {:.2}",
                    lm.id, m.x, m.y, m.scale
                );
                found.entry(lm.id.clone()).or_insert_with(Vec::new).push(m);
            }
        }
        found
    }

    /// Build the per-frame info for one minimap crop.
    pub fn analyze(
        self: &Arc<Self>,
        crop: RgbImage,
        another_floor_possible: bool,
        landmarks: &[Arc<LandmarkTemplate>],
    ) -> MiniMapInfo {
        let circle = self.circle_mask(crop.width(), crop.height());
        let info = MiniMapInfo {
            prep: Arc::clone(self),
            circle,
            another_floor_possible,
            angle: OnceLock::new(),
            arrow_window: OnceLock::new(),
            arrow_mask: OnceLock::new(),
            del_radar: OnceLock::new(),
            roads: OnceLock::new(),
            special_points: HashMap::new(),
            landmark_scales: HashMap::new(),
            raw: crop,
        };
        if landmarks.is_empty() {
            return info;
        }
        let special_points =
            self.build_special_point_mask(info.origin_del_radio(), &info.circle, landmarks);
        let landmark_scales = landmarks
            .iter()
            .map(|l| (l.id.clone(), l.map_scale))
            .collect();
        MiniMapInfo {
            special_points,
            landmark_scales,
            ..info
        }
    }
}

/// Everything derived from one minimap crop. Created and dropped within a
/// single control-loop tick; expensive parts are computed lazily, once.
pub struct MiniMapInfo {
    prep: Arc<MiniMapPreprocessor>,
    raw: RgbImage,
    circle: GrayImage,
    another_floor_possible: bool,
    angle: OnceLock<Option<f64>>,
    arrow_window: OnceLock<Option<GrayImage>>,
    arrow_mask: OnceLock<GrayImage>,
    del_radar: OnceLock<RgbImage>,
    roads: OnceLock<RoadMasks>,
    special_points: HashMap<String, Vec<MatchResult>>,
    landmark_scales: HashMap<String, f64>,
}

impl MiniMapInfo {
    pub fn width(&self) -> u32 {
        self.raw.width()
    }

    pub fn height(&self) -> u32 {
        self.raw.height()
    }

    pub fn raw(&self) -> &RgbImage {
        &self.raw
    }

    pub fn circle_mask(&self) -> &GrayImage {
        &self.circle
    }

    /// Arrow-only mask of the centered window (bank-sized).
    pub fn arrow_window_mask(&self) -> Option<&GrayImage> {
        self.arrow_window
            .get_or_init(|| self.prep.heading.window_mask(&self.raw))
            .as_ref()
    }

    /// Arrow mask at full crop size.
    pub fn arrow_mask(&self) -> &GrayImage {
        self.arrow_mask.get_or_init(|| {
            self.prep
                .heading
                .full_mask(&self.raw, self.arrow_window_mask())
        })
    }

    /// Heading in degrees (clockwise from up); computed at most once.
    pub fn angle(&self) -> Option<f64> {
        *self.angle.get_or_init(|| {
            self.arrow_window_mask()
                .and_then(|win| self.prep.heading.detect(win))
        })
    }

    /// The crop with the radar sweep removed.
    pub fn origin_del_radio(&self) -> &RgbImage {
        self.del_radar
            .get_or_init(|| self.prep.remove_radar_overlay(&self.raw, self.angle()))
    }

    fn roads(&self) -> &RoadMasks {
        self.roads.get_or_init(|| {
            self.prep.build_road_mask(
                self.origin_del_radio(),
                &self.circle,
                self.another_floor_possible,
            )
        })
    }

    pub fn road_mask(&self) -> &GrayImage {
        &self.roads().strict
    }

    pub fn road_mask_with_edge(&self) -> &GrayImage {
        &self.roads().with_edge
    }

    pub fn enemy_mask(&self) -> &GrayImage {
        &self.roads().enemy
    }

    /// Grayscale of the de-radared crop.
    pub fn gray(&self) -> GrayImage {
        image::DynamicImage::ImageRgb8(self.origin_del_radio().clone()).to_luma8()
    }

    /// Disc around the center covering the arrow window, which hides the map.
    pub fn arrow_disc(&self) -> GrayImage {
        let (w, h) = self.prep.heading.bank().dimensions();
        let r = w.max(h) as f64 / 2.0 + 1.0;
        disc_mask(
            self.width(),
            self.height(),
            (self.width() as f64 - 1.0) / 2.0,
            (self.height() as f64 - 1.0) / 2.0,
            r,
        )
    }

    pub fn special_points(&self) -> &HashMap<String, Vec<MatchResult>> {
        &self.special_points
    }

    /// Map pixels per template pixel of a landmark seen on this minimap.
    pub fn landmark_map_scale(&self, id: &str) -> Option<f64> {
        self.landmark_scales.get(id).copied()
    }

    /// Whether enemy markers crowd the avatar, the minimap's attacker-lock
    /// indication. Independent of any position fix.
    pub fn enemy_alert(&self) -> bool {
        let config = &self.prep.config;
        let r = self.width().min(self.height()) as f64 / 2.0 * config.enemy_alert_radius;
        let near = disc_mask(
            self.width(),
            self.height(),
            (self.width() as f64 - 1.0) / 2.0,
            (self.height() as f64 - 1.0) / 2.0,
            r,
        );
        mask_count(&mask_and(self.enemy_mask(), &near)) >= config.enemy_alert_min_pixels
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::heading::tests::{arrow_reference, paint_arrow};
    use image::Rgb;

    pub(crate) fn preprocessor(arrow_size: u32, radar: RgbImage) -> Arc<MiniMapPreprocessor> {
        Arc::new(MiniMapPreprocessor::new(
            MinimapAssets {
                arrow: arrow_reference(arrow_size),
                radar,
            },
            MinimapConfig::default(),
        ))
    }

    #[test]
    fn test_heading_is_memoized_and_radar_removed() {
        // Radar: a bright wedge above the center for heading 0°.
        let radar = RgbImage::from_fn(60, 60, |x, y| {
            if y < 20 && (x as i32 - 30).abs() < 10 {
                Rgb([30, 30, 30])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let prep = preprocessor(15, radar);
        let mut crop = RgbImage::from_pixel(60, 60, Rgb([100, 100, 100]));
        paint_arrow(&mut crop, &arrow_reference(15), 0.0, ARROW_COLOR);

        let info = prep.analyze(crop, false, &[]);
        assert_eq!(info.angle(), Some(0.0));
        assert_eq!(info.angle(), Some(0.0));

        let cleaned = info.origin_del_radio();
        assert_eq!(cleaned.get_pixel(30, 5).0, [70, 70, 70]);
        assert_eq!(cleaned.get_pixel(30, 55).0, [100, 100, 100]);
    }

    #[test]
    fn test_unresolved_heading_keeps_raw_crop() {
        let radar = RgbImage::from_pixel(40, 40, Rgb([50, 50, 50]));
        let prep = preprocessor(11, radar);
        let crop = RgbImage::from_pixel(40, 40, Rgb([80, 80, 80]));
        let info = prep.analyze(crop.clone(), false, &[]);
        assert_eq!(info.angle(), None);
        assert_eq!(info.origin_del_radio(), &crop);
    }

    #[test]
    fn test_road_masks() {
        let prep = preprocessor(11, RgbImage::new(40, 40));
        let crop = RgbImage::from_fn(40, 40, |x, _| match x {
            0..=9 => Rgb([80, 80, 81]),    // road
            10..=19 => Rgb([60, 61, 63]),  // other floor
            20..=29 => Rgb([170, 170, 171]), // edge
            _ => Rgb([220, 60, 64]),       // enemy
        });
        let circle = prep.circle_mask(40, 40);

        let single = prep.build_road_mask(&crop, &circle, false);
        assert_eq!(single.strict.get_pixel(8, 20)[0], 255);
        assert_eq!(single.strict.get_pixel(15, 20)[0], 0);
        assert_eq!(single.strict.get_pixel(25, 20)[0], 0);
        assert_eq!(single.with_edge.get_pixel(25, 20)[0], 255);
        assert_eq!(single.strict.get_pixel(33, 20)[0], 255);
        assert_eq!(single.enemy.get_pixel(33, 20)[0], 255);
        // Outside the circle nothing is set.
        assert_eq!(single.strict.get_pixel(0, 0)[0], 0);

        let layered = prep.build_road_mask(&crop, &circle, true);
        assert_eq!(layered.strict.get_pixel(15, 20)[0], 255);
    }

    #[test]
    fn test_enemy_alert_near_center_only() {
        let prep = preprocessor(11, RgbImage::new(60, 60));
        let mut crop = RgbImage::from_pixel(60, 60, Rgb([40, 90, 60]));
        // Enemy far from the avatar.
        for y in 5..9 {
            for x in 28..32 {
                crop.put_pixel(x, y, Rgb([220, 60, 64]));
            }
        }
        assert!(!prep.analyze(crop.clone(), false, &[]).enemy_alert());
        // Enemy right next to the avatar.
        for y in 34..38 {
            for x in 28..32 {
                crop.put_pixel(x, y, Rgb([220, 60, 64]));
            }
        }
        assert!(prep.analyze(crop, false, &[]).enemy_alert());
    }

    #[test]
    fn test_special_points_skipped_without_landmarks() {
        let prep = preprocessor(11, RgbImage::new(40, 40));
        let info = prep.analyze(RgbImage::new(40, 40), false, &[]);
        assert!(info.special_points().is_empty());
    }

    #[test]
    fn test_special_point_found() {
        let background = [40, 90, 60];
        let icon = crate::features::tests::noisy_icon(32, 4, 7, background);
        let mut crop = RgbImage::from_pixel(80, 80, Rgb(background));
        image::imageops::replace(&mut crop, &icon, 20, 24);

        let prep = preprocessor(11, RgbImage::new(80, 80));
        let templates = vec![Arc::new(LandmarkTemplate::new("shop", icon, 1.25))];
        let info = prep.analyze(crop, false, &templates);
        let hits = info.special_points().get("shop").expect("shop found");
        assert!((hits[0].x - 20.0).abs() <= 0.5);
        assert!((hits[0].y - 24.0).abs() <= 0.5);
        assert_eq!(info.landmark_map_scale("shop"), Some(1.25));
    }
}
