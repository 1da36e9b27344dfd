//! Matching strategies tried by the localization engine, in priority order.

use crate::imaging::{fill_box, mask_and, mask_count, mask_minus, mask_or};
use crate::large_map::LargeMapInfo;
use crate::minimap::MiniMapInfo;
use crate::pool::ScalePool;
use crate::template::{MaskedTemplate, Plane};
use futures::future::BoxFuture;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use nav_state::{MatchResult, Rect};
use std::sync::Arc;
use tracing::debug;

/// Inputs shared by every strategy for one localization attempt.
pub struct MatchContext<'a> {
    pub map: &'a Arc<LargeMapInfo>,
    pub minimap: &'a MiniMapInfo,
    /// Where the avatar (the minimap center) may be on the map.
    pub search_rect: Option<Rect>,
    pub scales: &'a [f64],
    pub pool: &'a ScalePool,
}

pub trait MatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Best candidate, or `None` if nothing passed this strategy's threshold.
    fn try_match<'a>(&'a self, ctx: &'a MatchContext<'a>) -> BoxFuture<'a, Option<MatchResult>>;
}

/// The standard chain: road mask, landmarks, grayscale, color.
pub fn default_strategies(
    road_threshold: f64,
    gray_threshold: f64,
    color_threshold: f64,
    color_min_pixels: usize,
    landmark_cluster_px: f64,
    landmark_scale_band: (f64, f64),
) -> Vec<Box<dyn MatchStrategy>> {
    vec![
        Box::new(RoadMaskCorrelation {
            threshold: road_threshold,
        }),
        Box::new(LandmarkReverseSolve {
            cluster_px: landmark_cluster_px,
            scale_band: landmark_scale_band,
        }),
        Box::new(GrayCorrelation {
            threshold: gray_threshold,
        }),
        Box::new(ColorCorrelation {
            threshold: color_threshold,
            min_pixels: color_min_pixels,
        }),
    ]
}

#[derive(Debug, Clone)]
enum Raster {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl Raster {
    fn dimensions(&self) -> (u32, u32) {
        match self {
            Raster::Gray(i) => i.dimensions(),
            Raster::Rgb(i) => i.dimensions(),
        }
    }

    fn resized(&self, w: u32, h: u32, filter: FilterType) -> Plane {
        match self {
            Raster::Gray(i) => Plane::from_gray(&imageops::resize(i, w, h, filter)),
            Raster::Rgb(i) => Plane::from_rgb(&imageops::resize(i, w, h, filter)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum MapLayer {
    Mask,
    Gray,
    Color,
}

impl MapLayer {
    fn window(self, map: &LargeMapInfo, x: u32, y: u32, w: u32, h: u32) -> Plane {
        match self {
            MapLayer::Mask => Plane::from_gray(&imageops::crop_imm(&map.mask, x, y, w, h).to_image()),
            MapLayer::Gray => Plane::from_gray(&imageops::crop_imm(&map.gray, x, y, w, h).to_image()),
            MapLayer::Color => {
                Plane::from_rgb(&imageops::crop_imm(&map.image, x, y, w, h).to_image())
            }
        }
    }
}

/// Map window `(x, y, w, h)` holding every placement of a `tw`×`th` template
/// whose center lies in `rect`. The whole map without a rect.
pub fn search_window(
    rect: Option<Rect>,
    tw: u32,
    th: u32,
    map_w: u32,
    map_h: u32,
) -> Option<(u32, u32, u32, u32)> {
    let Some(rect) = rect else {
        return (map_w >= tw && map_h >= th).then_some((0, 0, map_w, map_h));
    };
    let (hw, hh) = (tw as f64 / 2.0, th as f64 / 2.0);
    let grown = Rect::new(rect.x1 - hw, rect.y1 - hh, rect.x2 + hw, rect.y2 + hh)
        .clamp_to(map_w as f64, map_h as f64)?;
    let x0 = grown.x1.floor() as u32;
    let y0 = grown.y1.floor() as u32;
    let x1 = (grown.x2.ceil() as u32).min(map_w);
    let y1 = (grown.y2.ceil() as u32).min(map_h);
    let (w, h) = (x1 - x0, y1 - y0);
    (w >= tw && h >= th).then_some((x0, y0, w, h))
}

/// One masked correlation of a minimap-derived template against a map
/// layer, evaluated independently per scale.
struct Correlation {
    label: &'static str,
    map: Arc<LargeMapInfo>,
    layer: MapLayer,
    template: Raster,
    mask: GrayImage,
    filter: FilterType,
    search_rect: Option<Rect>,
    threshold: f64,
}

impl Correlation {
    fn at_scale(&self, scale: f64) -> Option<MatchResult> {
        let (w, h) = self.template.dimensions();
        let tw = (w as f64 * scale).round() as u32;
        let th = (h as f64 * scale).round() as u32;
        if tw < 4 || th < 4 {
            return None;
        }
        let mask = imageops::resize(&self.mask, tw, th, FilterType::Nearest);
        let prepared = MaskedTemplate::new(&self.template.resized(tw, th, self.filter), &mask)?;
        let (x0, y0, ww, wh) =
            search_window(self.search_rect, tw, th, self.map.width(), self.map.height())?;
        let source = self.layer.window(&self.map, x0, y0, ww, wh);
        let (score, x, y) = prepared.best_match(&source)?;
        debug!(
            "{} @ {:.2}: score {:.3} at ({}, {})",
            self.label,
            scale,
            score,
            x0 + x,
            y0 + y
        );
        (score >= self.threshold).then(|| {
            MatchResult {
                confidence: score,
                x: x as f64,
                y: y as f64,
                w: tw as f64,
                h: th as f64,
                scale,
            }
            .translated(x0 as f64, y0 as f64)
        })
    }

    async fn run(self, ctx: &MatchContext<'_>) -> Option<MatchResult> {
        let job = Arc::new(self);
        ctx.pool.best_of(ctx.scales, move |s| job.at_scale(s)).await
    }
}

/// Road segmentation of the minimap against the map's road+landmark mask.
#[derive(Debug, Clone)]
pub struct RoadMaskCorrelation {
    pub threshold: f64,
}

impl MatchStrategy for RoadMaskCorrelation {
    fn name(&self) -> &'static str {
        "road-mask"
    }

    fn try_match<'a>(&'a self, ctx: &'a MatchContext<'a>) -> BoxFuture<'a, Option<MatchResult>> {
        Box::pin(async move {
            let mm = ctx.minimap;
            let mut template = mask_or(mm.road_mask(), mm.arrow_mask());
            for m in mm.special_points().values().flatten() {
                fill_box(
                    &mut template,
                    m.x.round() as i64,
                    m.y.round() as i64,
                    m.w.round() as i64,
                    m.h.round() as i64,
                );
            }
            // Edge-only pixels may be road or not on the map.
            let edge_only = mask_minus(mm.road_mask_with_edge(), mm.road_mask());
            let mask = mask_minus(mm.circle_mask(), &edge_only);
            Correlation {
                label: self.name(),
                map: Arc::clone(ctx.map),
                layer: MapLayer::Mask,
                template: Raster::Gray(template),
                mask,
                filter: FilterType::Nearest,
                search_rect: ctx.search_rect,
                threshold: self.threshold,
            }
            .run(ctx)
            .await
        })
    }
}

/// Solve the minimap placement from landmarks seen on it, each landmark hit
/// voting once per known map position.
#[derive(Debug, Clone)]
pub struct LandmarkReverseSolve {
    pub cluster_px: f64,
    /// Accepted minimap → map scale factors.
    pub scale_band: (f64, f64),
}

impl LandmarkReverseSolve {
    pub fn solve(
        &self,
        map: &LargeMapInfo,
        mm: &MiniMapInfo,
        search_rect: Option<Rect>,
    ) -> Option<MatchResult> {
        let (mw, mh) = (mm.width() as f64, mm.height() as f64);
        let mut candidates = Vec::new();
        for (id, hits) in mm.special_points() {
            let (Some(map_scale), Some(positions)) =
                (mm.landmark_map_scale(id), map.landmarks.get(id))
            else {
                continue;
            };
            for hit in hits.iter().filter(|h| h.scale > 0.0) {
                let factor = map_scale / hit.scale;
                if factor < self.scale_band.0 || factor > self.scale_band.1 {
                    debug!("Landmark '{}' factor {:.2} out of band", id, factor);
                    continue;
                }
                let c = hit.center();
                for p in positions {
                    let cand = MatchResult {
                        confidence: 1.0,
                        x: p.x - c.x * factor,
                        y: p.y - c.y * factor,
                        w: mw * factor,
                        h: mh * factor,
                        scale: factor,
                    };
                    if search_rect.map_or(true, |r| r.contains(&cand.center())) {
                        candidates.push(cand);
                    }
                }
            }
        }
        self.cluster(&candidates)
    }

    fn cluster(&self, candidates: &[MatchResult]) -> Option<MatchResult> {
        let members = |seed: &MatchResult| -> Vec<MatchResult> {
            let c = seed.center();
            candidates
                .iter()
                .filter(|m| m.center().distance(&c) <= self.cluster_px)
                .copied()
                .collect()
        };
        let sizes: Vec<usize> = candidates.iter().map(|c| members(c).len()).collect();
        let best = *sizes.iter().max()?;
        let seeds: Vec<&MatchResult> = candidates
            .iter()
            .zip(&sizes)
            .filter(|&(_, &n)| n == best)
            .map(|(c, _)| c)
            .collect();
        let first = seeds[0];
        if seeds
            .iter()
            .any(|s| s.center().distance(&first.center()) > self.cluster_px)
        {
            debug!("Landmark clusters tied at {} votes, discarding", best);
            return None;
        }

        let group = members(first);
        let n = group.len() as f64;
        let mean = |f: fn(&MatchResult) -> f64| group.iter().map(f).sum::<f64>() / n;
        Some(MatchResult {
            confidence: n,
            x: mean(|m| m.x),
            y: mean(|m| m.y),
            w: mean(|m| m.w),
            h: mean(|m| m.h),
            scale: mean(|m| m.scale),
        })
    }
}

impl MatchStrategy for LandmarkReverseSolve {
    fn name(&self) -> &'static str {
        "landmarks"
    }

    fn try_match<'a>(&'a self, ctx: &'a MatchContext<'a>) -> BoxFuture<'a, Option<MatchResult>> {
        Box::pin(async move {
            if ctx.minimap.special_points().is_empty() {
                return None;
            }
            self.solve(ctx.map, ctx.minimap, ctx.search_rect)
        })
    }
}

/// De-radared grayscale against the map's grayscale, arrow hidden.
#[derive(Debug, Clone)]
pub struct GrayCorrelation {
    pub threshold: f64,
}

impl MatchStrategy for GrayCorrelation {
    fn name(&self) -> &'static str {
        "gray"
    }

    fn try_match<'a>(&'a self, ctx: &'a MatchContext<'a>) -> BoxFuture<'a, Option<MatchResult>> {
        Box::pin(async move {
            let mm = ctx.minimap;
            let mask = mask_minus(mm.circle_mask(), &mm.arrow_disc());
            Correlation {
                label: self.name(),
                map: Arc::clone(ctx.map),
                layer: MapLayer::Gray,
                template: Raster::Gray(mm.gray()),
                mask,
                filter: FilterType::Triangle,
                search_rect: ctx.search_rect,
                threshold: self.threshold,
            }
            .run(ctx)
            .await
        })
    }
}

/// Raw color restricted to road pixels (edges included).
#[derive(Debug, Clone)]
pub struct ColorCorrelation {
    pub threshold: f64,
    pub min_pixels: usize,
}

impl MatchStrategy for ColorCorrelation {
    fn name(&self) -> &'static str {
        "color"
    }

    fn try_match<'a>(&'a self, ctx: &'a MatchContext<'a>) -> BoxFuture<'a, Option<MatchResult>> {
        Box::pin(async move {
            let mm = ctx.minimap;
            let roads = mask_and(mm.road_mask_with_edge(), mm.circle_mask());
            let mask = mask_minus(&roads, &mm.arrow_disc());
            if mask_count(&mask) < self.min_pixels {
                return None;
            }
            Correlation {
                label: self.name(),
                map: Arc::clone(ctx.map),
                layer: MapLayer::Color,
                template: Raster::Rgb(mm.origin_del_radio().clone()),
                mask,
                filter: FilterType::Triangle,
                search_rect: ctx.search_rect,
                threshold: self.threshold,
            }
            .run(ctx)
            .await
        })
    }
}
