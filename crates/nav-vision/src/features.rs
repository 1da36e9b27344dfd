//! ORB-style keypoints and binary descriptors for landmark ("special point")
//! detection on the minimap.
//!
//! Keypoints are FAST-9 corners on the grayscale image with 3x3 non-maximum
//! suppression; descriptors are 256-bit BRIEF tests on a Gaussian-smoothed
//! copy. The minimap is not rotated relative to the large map, so no
//! orientation is assigned. Scale is solved from matched keypoint geometry.

use image::{GrayImage, RgbImage};
use nav_state::MatchResult;
use std::sync::OnceLock;

/// FAST-9 intensity threshold.
const FAST_THRESHOLD: i16 = 20;
/// Contiguous circle pixels required for a FAST corner.
const FAST_ARC: usize = 9;
/// BRIEF sampling radius; keypoints keep this much distance to the border.
const PATCH_RADIUS: i32 = 7;
/// Hamming distance above which a descriptor pair never matches.
const MAX_HAMMING: u32 = 64;
/// Lowe ratio between best and second-best distances.
const RATIO: f64 = 0.8;
/// Offset votes within this many pixels of the median count as inliers.
const INLIER_PX: f64 = 3.0;
const MIN_INLIERS: usize = 2;

const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Fixed BRIEF sampling pattern, generated once from a deterministic LCG.
fn brief_pattern() -> &'static [((i32, i32), (i32, i32)); 256] {
    static PATTERN: OnceLock<[((i32, i32), (i32, i32)); 256]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) % (2 * PATCH_RADIUS as u64 + 1)) as i32 - PATCH_RADIUS
        };
        let mut pattern = [((0, 0), (0, 0)); 256];
        for pair in pattern.iter_mut() {
            *pair = ((next(), next()), (next(), next()));
        }
        pattern
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: u32,
    pub y: u32,
    pub score: u32,
}

pub type Descriptor = [u64; 4];

/// Keypoints with their descriptors.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
    pub width: u32,
    pub height: u32,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Detect and describe. Keypoints outside `mask` (when given) are dropped.
pub fn extract(img: &RgbImage, mask: Option<&GrayImage>) -> FeatureSet {
    let gray = image::DynamicImage::ImageRgb8(img.clone()).to_luma8();
    let smooth = image::imageops::blur(&gray, 1.0);
    let keypoints: Vec<Keypoint> = detect_fast(&gray)
        .into_iter()
        .filter(|k| mask.map_or(true, |m| m.get_pixel(k.x, k.y)[0] > 0))
        .collect();
    let descriptors = keypoints.iter().map(|k| describe(&smooth, k)).collect();
    FeatureSet {
        keypoints,
        descriptors,
        width: img.width(),
        height: img.height(),
    }
}

fn detect_fast(gray: &GrayImage) -> Vec<Keypoint> {
    let (w, h) = gray.dimensions();
    let border = PATCH_RADIUS as u32 + 1;
    if w <= 2 * border || h <= 2 * border {
        return Vec::new();
    }

    let mut scores = vec![0u32; (w * h) as usize];
    for y in border..h - border {
        for x in border..w - border {
            scores[(y * w + x) as usize] = fast_score(gray, x, y);
        }
    }

    let mut keypoints = Vec::new();
    for y in border..h - border {
        for x in border..w - border {
            let s = scores[(y * w + x) as usize];
            if s == 0 {
                continue;
            }
            let mut is_max = true;
            'nms: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let n = scores[((y as i32 + dy) as u32 * w + (x as i32 + dx) as u32) as usize];
                    // Ties resolve towards the earlier pixel in scan order.
                    if n > s || (n == s && (dy < 0 || (dy == 0 && dx < 0))) {
                        is_max = false;
                        break 'nms;
                    }
                }
            }
            if is_max {
                keypoints.push(Keypoint { x, y, score: s });
            }
        }
    }
    keypoints
}

/// Sum of absolute contrast over the circle if a FAST-9 arc exists, else 0.
fn fast_score(gray: &GrayImage, x: u32, y: u32) -> u32 {
    let center = gray.get_pixel(x, y)[0] as i16;
    let mut brighter = [false; 16];
    let mut darker = [false; 16];
    let mut contrast = 0u32;
    for (i, (dx, dy)) in CIRCLE.iter().enumerate() {
        let v = gray.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as i16;
        brighter[i] = v > center + FAST_THRESHOLD;
        darker[i] = v < center - FAST_THRESHOLD;
        contrast += (v - center).unsigned_abs() as u32;
    }
    if has_arc(&brighter) || has_arc(&darker) {
        contrast
    } else {
        0
    }
}

fn has_arc(flags: &[bool; 16]) -> bool {
    let mut run = 0;
    // Walk the circle twice to catch arcs that wrap around index 0.
    for i in 0..32 {
        if flags[i % 16] {
            run += 1;
            if run >= FAST_ARC {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn describe(smooth: &GrayImage, k: &Keypoint) -> Descriptor {
    let mut d = [0u64; 4];
    for (i, ((ax, ay), (bx, by))) in brief_pattern().iter().enumerate() {
        let a = smooth.get_pixel((k.x as i32 + ax) as u32, (k.y as i32 + ay) as u32)[0];
        let b = smooth.get_pixel((k.x as i32 + bx) as u32, (k.y as i32 + by) as u32)[0];
        if a < b {
            d[i / 64] |= 1 << (i % 64);
        }
    }
    d
}

pub fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Ratio-tested correspondences `(template index, scene index)`.
pub fn match_descriptors(template: &FeatureSet, scene: &FeatureSet) -> Vec<(usize, usize)> {
    let mut matches = Vec::new();
    for (ti, td) in template.descriptors.iter().enumerate() {
        let mut best = (u32::MAX, usize::MAX);
        let mut second = u32::MAX;
        for (si, sd) in scene.descriptors.iter().enumerate() {
            let d = hamming(td, sd);
            if d < best.0 {
                second = best.0;
                best = (d, si);
            } else if d < second {
                second = d;
            }
        }
        if best.0 > MAX_HAMMING {
            continue;
        }
        if second != u32::MAX && best.0 as f64 >= RATIO * second as f64 {
            continue;
        }
        matches.push((ti, best.1));
    }
    matches
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Solve where (offset and scale) `template` sits inside `scene`.
///
/// Scale is the median ratio of pairwise keypoint distances (1.0 with a single
/// usable pair); offset is the median of per-match offset votes. Confidence is
/// the inlier fraction of the vote.
pub fn locate(template: &FeatureSet, scene: &FeatureSet) -> Option<MatchResult> {
    let matches = match_descriptors(template, scene);
    if matches.len() < MIN_INLIERS {
        return None;
    }
    let pairs: Vec<((f64, f64), (f64, f64))> = matches
        .iter()
        .map(|&(ti, si)| {
            let t = template.keypoints[ti];
            let s = scene.keypoints[si];
            ((t.x as f64, t.y as f64), (s.x as f64, s.y as f64))
        })
        .collect();

    let mut ratios = Vec::new();
    for i in 0..pairs.len() {
        for j in i + 1..pairs.len() {
            let (ta, sa) = pairs[i];
            let (tb, sb) = pairs[j];
            let td = (ta.0 - tb.0).hypot(ta.1 - tb.1);
            if td > 4.0 {
                ratios.push((sa.0 - sb.0).hypot(sa.1 - sb.1) / td);
            }
        }
    }
    let scale = median(&mut ratios).unwrap_or(1.0);

    let votes: Vec<(f64, f64)> = pairs
        .iter()
        .map(|((tx, ty), (sx, sy))| (sx - tx * scale, sy - ty * scale))
        .collect();
    let ox = median(&mut votes.iter().map(|v| v.0).collect::<Vec<_>>())?;
    let oy = median(&mut votes.iter().map(|v| v.1).collect::<Vec<_>>())?;
    let inliers = votes
        .iter()
        .filter(|(x, y)| (x - ox).abs() <= INLIER_PX && (y - oy).abs() <= INLIER_PX)
        .count();
    if inliers < MIN_INLIERS {
        return None;
    }

    Some(MatchResult {
        confidence: inliers as f64 / votes.len() as f64,
        x: ox,
        y: oy,
        w: template.width as f64 * scale,
        h: template.height as f64 * scale,
        scale,
    })
}
