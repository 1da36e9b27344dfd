//! Pre-captured large maps, one per region and floor.

use crate::color;
use crate::imaging::{fill_box, mask_from_rgb};
use crate::minimap::LandmarkTemplate;
use anyhow::{bail, Context, Result};
use image::{GrayImage, Luma, RgbImage};
use nav_data::{Region, RegionTree};
use nav_state::Point;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// One region's map with everything localization reads from it. Immutable
/// once built; shared behind an `Arc` for the session.
#[derive(Debug)]
pub struct LargeMapInfo {
    pub region: Region,
    pub image: RgbImage,
    pub gray: GrayImage,
    /// Road pixels plus a box around every landmark position.
    pub mask: GrayImage,
    /// Landmark id → map-space centers.
    pub landmarks: HashMap<String, Vec<Point>>,
    pub landmark_templates: Vec<Arc<LandmarkTemplate>>,
}

impl LargeMapInfo {
    /// Build from decoded images. `road_mask` overrides the color-derived
    /// road segmentation when present.
    pub fn from_images(
        region: Region,
        image: RgbImage,
        road_mask: Option<GrayImage>,
        landmark_templates: Vec<Arc<LandmarkTemplate>>,
    ) -> Self {
        let roads = match road_mask {
            Some(m) if m.dimensions() == image.dimensions() => m,
            Some(_) => {
                debug!(
                    "Road mask of '{}' does not match its map, deriving from colors",
                    region.key()
                );
                road_mask_for_map(&image)
            }
            None => road_mask_for_map(&image),
        };

        let landmarks: HashMap<String, Vec<Point>> = region
            .data
            .landmarks
            .iter()
            .map(|l| (l.id.clone(), l.positions.clone()))
            .collect();

        let mut mask = roads;
        for tmpl in &landmark_templates {
            let w = tmpl.image.width() as f64 * tmpl.map_scale;
            let h = tmpl.image.height() as f64 * tmpl.map_scale;
            for p in landmarks.get(&tmpl.id).into_iter().flatten() {
                fill_box(
                    &mut mask,
                    (p.x - w / 2.0).round() as i64,
                    (p.y - h / 2.0).round() as i64,
                    w.round() as i64,
                    h.round() as i64,
                );
            }
        }

        let gray = image::DynamicImage::ImageRgb8(image.clone()).to_luma8();
        Self {
            region,
            image,
            gray,
            mask,
            landmarks,
            landmark_templates,
        }
    }

    pub fn key(&self) -> &str {
        self.region.key()
    }

    pub fn floor(&self) -> i32 {
        self.region.floor()
    }

    pub fn another_floor_possible(&self) -> bool {
        self.region.data.another_floor_possible
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Current-floor roads of a large map, by color.
pub fn road_mask_for_map(image: &RgbImage) -> GrayImage {
    mask_from_rgb(image, color::is_road)
}

/// Lazily loading, caching repository of large maps keyed by region id.
pub struct LargeMapIndex {
    data_dir: PathBuf,
    tree: RegionTree,
    cache: Mutex<HashMap<String, Arc<LargeMapInfo>>>,
}

impl LargeMapIndex {
    /// Read the region catalogue from `data_dir`. Map images are loaded on
    /// first use.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let tree = RegionTree::load(data_dir)?;
        Ok(Self::with_tree(data_dir, tree))
    }

    pub fn with_tree(data_dir: &Path, tree: RegionTree) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            tree,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn tree(&self) -> &RegionTree {
        &self.tree
    }

    /// Register an already-built map, replacing any cached one.
    pub fn insert(&self, info: LargeMapInfo) -> Arc<LargeMapInfo> {
        let info = Arc::new(info);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(info.key().to_string(), Arc::clone(&info));
        }
        info
    }

    pub fn get(&self, key: &str) -> Result<Arc<LargeMapInfo>> {
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(key).cloned()) {
            return Ok(hit);
        }
        let info = Arc::new(self.read_region(key)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache
                .entry(key.to_string())
                .or_insert_with(|| Arc::clone(&info));
        }
        Ok(info)
    }

    /// Where the child region's entry landmark sits in its parent's map:
    /// `(parent key, position)`.
    pub fn entry_point_in_parent(&self, key: &str) -> Option<(String, Point)> {
        let region = self.tree.find(key)?;
        let (parent, entry) = self.tree.entry_in_parent(region.id)?;
        Some((parent.key().to_string(), entry.pos))
    }

    fn read_region(&self, key: &str) -> Result<LargeMapInfo> {
        let Some(region) = self.tree.find(key) else {
            bail!("Unknown region '{}'", key);
        };

        let map_path = self.data_dir.join(&region.data.map);
        let image = image::open(&map_path)
            .with_context(|| format!("Failed to open map {}", map_path.display()))?
            .to_rgb8();

        let road_mask = match &region.data.road_mask {
            Some(file) => {
                let path = self.data_dir.join(file);
                let raw = image::open(&path)
                    .with_context(|| format!("Failed to open road mask {}", path.display()))?
                    .to_luma8();
                Some(GrayImage::from_fn(raw.width(), raw.height(), |x, y| {
                    if raw.get_pixel(x, y)[0] > 0 {
                        Luma([255])
                    } else {
                        Luma([0])
                    }
                }))
            }
            None => None,
        };

        let mut templates = Vec::with_capacity(region.data.landmarks.len());
        for lm in &region.data.landmarks {
            let path = self.data_dir.join(&lm.template);
            let img = image::open(&path)
                .with_context(|| format!("Failed to open landmark {}", path.display()))?
                .to_rgb8();
            templates.push(Arc::new(LandmarkTemplate::new(lm.id.clone(), img, lm.map_scale)));
        }

        let info = LargeMapInfo::from_images(region.clone(), image, road_mask, templates);
        info!(
            "Loaded map '{}' ({}x{}, floor {}, {} landmarks)",
            key,
            info.width(),
            info.height(),
            info.floor(),
            info.landmark_templates.len()
        );
        Ok(info)
    }
}

/// The map the controller currently localizes against.
pub struct ActiveMap {
    current: Arc<LargeMapInfo>,
}

impl ActiveMap {
    pub fn new(current: Arc<LargeMapInfo>) -> Self {
        Self { current }
    }

    pub fn current(&self) -> &Arc<LargeMapInfo> {
        &self.current
    }

    /// Swap in the map of another floor as one unit.
    pub fn switch_floor(&mut self, next: Arc<LargeMapInfo>) {
        info!(
            "Floor change {} -> {} ({})",
            self.current.floor(),
            next.floor(),
            next.key()
        );
        self.current = next;
    }

    /// The active map, which must be for `floor`. A stale floor means the
    /// caller skipped a `switch_floor` and is a bug.
    pub fn for_floor(&self, floor: i32) -> &Arc<LargeMapInfo> {
        assert_eq!(
            self.current.floor(),
            floor,
            "active map '{}' is for another floor",
            self.current.key()
        );
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use nav_data::{EntryData, LandmarkData, RegionData};

    fn region_data(id: &str, floor: i32) -> RegionData {
        RegionData {
            id: id.to_string(),
            planet: "p".into(),
            area: "a".into(),
            floor,
            sub_area: None,
            map: format!("{id}.png"),
            road_mask: None,
            parent: None,
            entry: None,
            another_floor_possible: false,
            landmarks: Vec::new(),
        }
    }

    fn single(data: RegionData) -> Region {
        let tree = RegionTree::from_regions(vec![data]).unwrap();
        let region = tree.iter().next().unwrap().clone();
        region
    }

    #[test]
    fn test_mask_has_roads_and_landmark_boxes() {
        let mut data = region_data("hall", 1);
        data.landmarks.push(LandmarkData {
            id: "shop".into(),
            template: "shop.png".into(),
            positions: vec![Point::new(50.0, 20.0)],
            map_scale: 2.0,
        });
        let image = RgbImage::from_fn(80, 40, |x, _| {
            if x < 10 {
                Rgb([80, 80, 80])
            } else {
                Rgb([30, 90, 40])
            }
        });
        let tmpl = Arc::new(LandmarkTemplate::new(
            "shop",
            RgbImage::from_pixel(5, 5, Rgb([200, 0, 0])),
            2.0,
        ));
        let info = LargeMapInfo::from_images(single(data), image, None, vec![tmpl]);

        assert_eq!(info.mask.get_pixel(5, 5)[0], 255);
        assert_eq!(info.mask.get_pixel(30, 5)[0], 0);
        // 10x10 box centered on (50, 20).
        assert_eq!(info.mask.get_pixel(46, 16)[0], 255);
        assert_eq!(info.mask.get_pixel(53, 23)[0], 255);
        assert_eq!(info.mask.get_pixel(58, 20)[0], 0);
        assert_eq!(info.landmarks["shop"], vec![Point::new(50.0, 20.0)]);
    }

    #[test]
    fn test_explicit_road_mask_wins() {
        let image = RgbImage::from_pixel(20, 20, Rgb([80, 80, 80]));
        let roads = GrayImage::new(20, 20);
        let info = LargeMapInfo::from_images(single(region_data("x", 0)), image, Some(roads), vec![]);
        assert_eq!(crate::imaging::mask_count(&info.mask), 0);
    }

    #[test]
    fn test_index_loads_and_caches() {
        let dir = std::env::temp_dir().join(format!("nav_vision_index_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        RgbImage::from_pixel(30, 30, Rgb([80, 80, 80]))
            .save(dir.join("town.png"))
            .unwrap();
        let mut child = region_data("town_b1", -1);
        child.map = "town.png".into();
        child.parent = Some("town".into());
        child.entry = Some(EntryData {
            landmark: "stairs".into(),
            pos: Point::new(12.0, 7.0),
        });
        let mut parent = region_data("town", 0);
        parent.map = "town.png".into();
        let tree = RegionTree::from_regions(vec![parent, child]).unwrap();

        let index = LargeMapIndex::with_tree(&dir, tree);
        let a = index.get("town").unwrap();
        let b = index.get("town").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.width(), 30);
        assert!(index.get("nowhere").is_err());
        assert_eq!(
            index.entry_point_in_parent("town_b1"),
            Some(("town".to_string(), Point::new(12.0, 7.0)))
        );
        assert_eq!(index.entry_point_in_parent("town"), None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_switch_floor() {
        let upper = Arc::new(LargeMapInfo::from_images(
            single(region_data("up", 1)),
            RgbImage::new(4, 4),
            None,
            vec![],
        ));
        let lower = Arc::new(LargeMapInfo::from_images(
            single(region_data("down", 0)),
            RgbImage::new(4, 4),
            None,
            vec![],
        ));
        let mut active = ActiveMap::new(upper);
        assert_eq!(active.for_floor(1).key(), "up");
        active.switch_floor(lower);
        assert_eq!(active.for_floor(0).key(), "down");
    }

    #[test]
    #[should_panic(expected = "another floor")]
    fn test_stale_floor_asserts() {
        let map = Arc::new(LargeMapInfo::from_images(
            single(region_data("up", 1)),
            RgbImage::new(4, 4),
            None,
            vec![],
        ));
        ActiveMap::new(map).for_floor(2);
    }
}
