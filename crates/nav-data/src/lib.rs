use anyhow::{bail, Context, Result};
use nav_state::Point;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Default map pixels per landmark-template pixel.
pub const DEFAULT_LANDMARK_MAP_SCALE: f64 = 1.25;

/// A landmark ("special point") catalogue entry of one region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandmarkData {
    pub id: String,
    /// Template image, relative to the data directory.
    pub template: String,
    /// Center of every instance on the large map, in map pixels.
    pub positions: Vec<Point>,
    /// Map pixels per template pixel.
    #[serde(default = "default_map_scale")]
    pub map_scale: f64,
}

fn default_map_scale() -> f64 {
    DEFAULT_LANDMARK_MAP_SCALE
}

/// Where a child region attaches to its parent region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryData {
    pub landmark: String,
    /// Entry position in the parent's map pixels.
    pub pos: Point,
}

/// One region (planet / area / floor / optional sub-area) as authored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionData {
    pub id: String,
    pub planet: String,
    pub area: String,
    pub floor: i32,
    #[serde(default)]
    pub sub_area: Option<String>,
    /// Large map PNG, relative to the data directory.
    pub map: String,
    /// Optional pre-authored road mask PNG. Derived from the map when absent.
    #[serde(default)]
    pub road_mask: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub entry: Option<EntryData>,
    /// Adjacent floors are rendered dimly on the minimap in this region.
    #[serde(default)]
    pub another_floor_possible: bool,
    #[serde(default)]
    pub landmarks: Vec<LandmarkData>,
}

/// Raw regions.json file format
#[derive(Debug, Deserialize)]
struct RegionsFile {
    #[allow(dead_code)]
    version: Option<String>,
    regions: Vec<RegionData>,
}

/// Index of a region inside its [`RegionTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub usize);

/// A region node with its parent resolved to a direct reference.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    pub parent: Option<RegionId>,
    pub data: RegionData,
}

impl Region {
    pub fn key(&self) -> &str {
        &self.data.id
    }

    pub fn floor(&self) -> i32 {
        self.data.floor
    }

    pub fn landmark_ids(&self) -> impl Iterator<Item = &str> {
        self.data.landmarks.iter().map(|l| l.id.as_str())
    }
}

/// Region hierarchy, resolved once at load time.
#[derive(Debug, Clone, Default)]
pub struct RegionTree {
    regions: Vec<Region>,
    by_key: HashMap<String, RegionId>,
}

impl RegionTree {
    /// Load the region catalogue from `data_dir/regions.json`.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("regions.json");
        if !path.exists() {
            tracing::warn!("No regions.json found at {}", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file: RegionsFile =
            serde_json::from_str(&content).context("Failed to parse regions.json")?;
        let tree = Self::from_regions(file.regions)?;
        tracing::info!("Loaded {} regions", tree.len());
        Ok(tree)
    }

    /// Build the tree, resolving parent keys and rejecting unknown parents,
    /// duplicate ids and cycles.
    pub fn from_regions(data: Vec<RegionData>) -> Result<Self> {
        let mut by_key = HashMap::with_capacity(data.len());
        for (i, r) in data.iter().enumerate() {
            if by_key.insert(r.id.clone(), RegionId(i)).is_some() {
                bail!("Duplicate region id '{}'", r.id);
            }
        }

        let mut regions = Vec::with_capacity(data.len());
        for (i, r) in data.into_iter().enumerate() {
            let parent = match &r.parent {
                Some(key) => Some(
                    *by_key
                        .get(key)
                        .with_context(|| format!("Region '{}' has unknown parent '{}'", r.id, key))?,
                ),
                None => None,
            };
            if parent.is_some() && r.entry.is_none() {
                tracing::debug!("Region '{}' has a parent but no entry point", r.id);
            }
            regions.push(Region {
                id: RegionId(i),
                parent,
                data: r,
            });
        }

        let tree = Self { regions, by_key };
        for region in &tree.regions {
            // A chain longer than the number of regions must loop.
            if tree.ancestors(region.id).count() > tree.regions.len() {
                bail!("Region '{}' is part of a parent cycle", region.key());
            }
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.0)
    }

    pub fn find(&self, key: &str) -> Option<&Region> {
        self.by_key.get(key).and_then(|id| self.get(*id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// Parent chain of `id`, nearest first. Bounded so a cycle cannot hang.
    pub fn ancestors(&self, id: RegionId) -> impl Iterator<Item = &Region> + '_ {
        let limit = self.regions.len() + 1;
        std::iter::successors(self.get(id).and_then(|r| r.parent), move |p| {
            self.get(*p).and_then(|r| r.parent)
        })
        .take(limit)
        .filter_map(move |p| self.get(p))
    }

    /// Entry landmark and parent-space position of a child region.
    pub fn entry_in_parent(&self, id: RegionId) -> Option<(&Region, &EntryData)> {
        let region = self.get(id)?;
        let parent = self.get(region.parent?)?;
        Some((parent, region.data.entry.as_ref()?))
    }
}
