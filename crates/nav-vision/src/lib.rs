//! Minimap self-localization: minimap preprocessing, large-map matching and
//! motion verification.

pub mod cache;
pub mod color;
pub mod features;
pub mod heading;
pub mod imaging;
pub mod large_map;
pub mod localize;
pub mod minimap;
pub mod pool;
pub mod strategy;
pub mod template;
pub mod verify;

pub use large_map::{ActiveMap, LargeMapIndex, LargeMapInfo};
pub use localize::{scale_candidates, LocalizationEngine, LocalizerConfig, LocateRequest, Localize};
pub use minimap::{
    LandmarkTemplate, MiniMapInfo, MiniMapPreprocessor, MinimapAssets, MinimapConfig,
};
pub use pool::ScalePool;
pub use strategy::{MatchContext, MatchStrategy};
pub use verify::{LineConstraint, MotionVerifier, Verdict, VerifyPosInfo};
