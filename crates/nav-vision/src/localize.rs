//! Where is the avatar on the large map?

use crate::large_map::LargeMapInfo;
use crate::minimap::MiniMapInfo;
use crate::pool::ScalePool;
use crate::strategy::{default_strategies, MatchContext, MatchStrategy};
use crate::verify::{MotionVerifier, VerifyPosInfo};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use nav_state::{MatchResult, Rect};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizerConfig {
    /// Nominal minimap → map scale.
    pub base_scale: f64,
    pub scale_step: f64,
    /// Extra, smaller scales tried when idle.
    pub scale_steps: usize,
    /// While moving, one extra scale is dropped per this many seconds.
    pub scale_decay_secs: f64,
    pub road_threshold: f64,
    pub gray_threshold: f64,
    pub color_threshold: f64,
    pub color_min_pixels: usize,
    pub landmark_cluster_px: f64,
    pub landmark_scale_band: (f64, f64),
    /// Two unverified results this close are trusted anyway.
    pub consensus_px: f64,
    pub workers: usize,
    pub task_timeout_ms: u64,
    /// Failing inputs are written here as PNGs when set.
    pub debug_dir: Option<PathBuf>,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            base_scale: 1.25,
            scale_step: 0.05,
            scale_steps: 5,
            scale_decay_secs: 0.6,
            road_threshold: 0.4,
            gray_threshold: 0.3,
            color_threshold: 0.3,
            color_min_pixels: 50,
            landmark_cluster_px: 10.0,
            landmark_scale_band: (0.9, 1.3),
            consensus_px: 5.0,
            workers: 4,
            task_timeout_ms: 1000,
            debug_dir: None,
        }
    }
}

/// Scales to try, largest first.
///
/// Idle: the base scale and `scale_steps` smaller ones. Moving: the longer the
/// avatar has been moving, the fewer extra scales are tried.
pub fn scale_candidates(config: &LocalizerConfig, is_moving: bool, elapsed_move_secs: f64) -> Vec<f64> {
    let steps = if is_moving {
        let dropped = (elapsed_move_secs.max(0.0) / config.scale_decay_secs).floor() as usize;
        config.scale_steps.saturating_sub(dropped)
    } else {
        config.scale_steps
    };
    (0..=steps)
        .map(|i| {
            let s = config.base_scale - i as f64 * config.scale_step;
            (s * 1000.0).round() / 1000.0
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct LocateRequest {
    pub search_rect: Option<Rect>,
    pub is_moving: bool,
    pub elapsed_move_seconds: f64,
    pub verify: Option<VerifyPosInfo>,
}

/// Position source used by the navigation controller.
pub trait Localize: Send + Sync {
    /// One localization attempt. `widen` retries without the search window
    /// when the windowed attempt fails.
    fn locate<'a>(
        &'a self,
        map: &'a Arc<LargeMapInfo>,
        minimap: &'a MiniMapInfo,
        request: &'a LocateRequest,
        widen: bool,
    ) -> BoxFuture<'a, Option<MatchResult>>;
}

pub struct LocalizationEngine {
    config: LocalizerConfig,
    strategies: Vec<Box<dyn MatchStrategy>>,
    pool: ScalePool,
    verifier: MotionVerifier,
}

impl LocalizationEngine {
    pub fn new(config: LocalizerConfig) -> Self {
        let strategies = default_strategies(
            config.road_threshold,
            config.gray_threshold,
            config.color_threshold,
            config.color_min_pixels,
            config.landmark_cluster_px,
            config.landmark_scale_band,
        );
        Self::with_strategies(config, strategies)
    }

    pub fn with_strategies(config: LocalizerConfig, strategies: Vec<Box<dyn MatchStrategy>>) -> Self {
        let pool = ScalePool::new(
            config.workers,
            Duration::from_millis(config.task_timeout_ms),
        );
        Self {
            config,
            strategies,
            pool,
            verifier: MotionVerifier,
        }
    }

    pub fn config(&self) -> &LocalizerConfig {
        &self.config
    }

    /// Run the strategy chain; the first verified result wins. Falls back to
    /// two raw results agreeing within `consensus_px`.
    pub async fn cal_character_pos(
        &self,
        map: &Arc<LargeMapInfo>,
        minimap: &MiniMapInfo,
        request: &LocateRequest,
    ) -> Option<MatchResult> {
        let scales = scale_candidates(
            &self.config,
            request.is_moving,
            request.elapsed_move_seconds,
        );
        let ctx = MatchContext {
            map,
            minimap,
            search_rect: request.search_rect,
            scales: &scales,
            pool: &self.pool,
        };

        let mut raw = Vec::new();
        for strategy in &self.strategies {
            let Some(result) = strategy.try_match(&ctx).await else {
                debug!("{}: no match", strategy.name());
                continue;
            };
            let center = result.center();
            debug!(
                "{}: ({:.1}, {:.1}) conf {:.3} scale {:.2}",
                strategy.name(),
                center.x,
                center.y,
                result.confidence,
                result.scale
            );
            if self
                .verifier
                .check(center, request.verify.as_ref())
                .is_accepted()
            {
                return Some(result);
            }
            raw.push(result);
        }

        if let Some(agreed) = consensus(&raw, self.config.consensus_px) {
            debug!("Consensus of unverified results at {:?}", agreed.center());
            return Some(agreed);
        }

        if let Some(dir) = &self.config.debug_dir {
            if let Err(e) = dump_failure(dir, map, minimap) {
                warn!("Failed to write localization debug images: {:#}", e);
            }
        }
        None
    }

    /// Like [`cal_character_pos`](Self::cal_character_pos), retrying over the
    /// whole map if the windowed search finds nothing.
    pub async fn locate_widened(
        &self,
        map: &Arc<LargeMapInfo>,
        minimap: &MiniMapInfo,
        request: &LocateRequest,
    ) -> Option<MatchResult> {
        if let Some(found) = self.cal_character_pos(map, minimap, request).await {
            return Some(found);
        }
        if request.search_rect.is_none() {
            return None;
        }
        debug!("Widening search to the whole map");
        let widened = LocateRequest {
            search_rect: None,
            ..request.clone()
        };
        self.cal_character_pos(map, minimap, &widened).await
    }
}

impl Localize for LocalizationEngine {
    fn locate<'a>(
        &'a self,
        map: &'a Arc<LargeMapInfo>,
        minimap: &'a MiniMapInfo,
        request: &'a LocateRequest,
        widen: bool,
    ) -> BoxFuture<'a, Option<MatchResult>> {
        Box::pin(async move {
            if widen {
                self.locate_widened(map, minimap, request).await
            } else {
                self.cal_character_pos(map, minimap, request).await
            }
        })
    }
}

/// First pair of results within `max_px` of each other; the more confident
/// of the two is returned.
pub fn consensus(results: &[MatchResult], max_px: f64) -> Option<MatchResult> {
    for (i, a) in results.iter().enumerate() {
        for b in &results[i + 1..] {
            if a.center().distance(&b.center()) <= max_px {
                return Some(if b.confidence > a.confidence { *b } else { *a });
            }
        }
    }
    None
}

fn dump_failure(dir: &Path, map: &LargeMapInfo, minimap: &MiniMapInfo) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let prefix = format!("{}_{}", stamp, map.key());
    let save = |name: &str, result: image::ImageResult<()>| {
        result.with_context(|| format!("Failed to save {}_{}.png", prefix, name))
    };
    save("raw", minimap.raw().save(dir.join(format!("{prefix}_raw.png"))))?;
    save(
        "no_radar",
        minimap
            .origin_del_radio()
            .save(dir.join(format!("{prefix}_no_radar.png"))),
    )?;
    save(
        "roads",
        minimap
            .road_mask()
            .save(dir.join(format!("{prefix}_roads.png"))),
    )?;
    debug!("Saved failing minimap as {}_*.png", prefix);
    Ok(())
}
