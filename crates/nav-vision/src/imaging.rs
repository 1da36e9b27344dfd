//! Small raster helpers shared by the minimap and large-map pipelines.

use image::{GrayImage, ImageBuffer, Luma, Pixel, RgbImage};
use std::collections::VecDeque;

/// Rotate an image about its center by `degrees`, counter-clockwise as seen on
/// screen. Nearest-neighbour sampling; uncovered pixels stay zero.
pub fn rotate_about_center<P>(
    img: &ImageBuffer<P, Vec<P::Subpixel>>,
    degrees: f64,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel,
{
    let (w, h) = img.dimensions();
    let cx = (w as f64 - 1.0) / 2.0;
    let cy = (h as f64 - 1.0) / 2.0;
    let (s, c) = degrees.to_radians().sin_cos();
    let mut out = ImageBuffer::new(w, h);

    for (x, y, px) in out.enumerate_pixels_mut() {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        // Inverse mapping: find the source pixel that lands on (x, y).
        let sx = (cx + dx * c - dy * s).round();
        let sy = (cy + dx * s + dy * c).round();
        if sx >= 0.0 && sy >= 0.0 && (sx as u32) < w && (sy as u32) < h {
            *px = *img.get_pixel(sx as u32, sy as u32);
        }
    }
    out
}

/// Per-channel saturating subtraction `a - b`. Both images must match in size.
pub fn saturating_sub(a: &RgbImage, b: &RgbImage) -> RgbImage {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let mut out = a.clone();
    for (dst, sub) in out.pixels_mut().zip(b.pixels()) {
        for c in 0..3 {
            dst[c] = dst[c].saturating_sub(sub[c]);
        }
    }
    out
}

/// Filled disc covering the largest centered circle, shrunk by `margin` pixels.
pub fn circle_mask(width: u32, height: u32, margin: f64) -> GrayImage {
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    let r = (width.min(height) as f64 / 2.0 - margin).max(0.0);
    disc_mask(width, height, cx, cy, r)
}

pub fn disc_mask(width: u32, height: u32, cx: f64, cy: f64, r: f64) -> GrayImage {
    let r2 = r * r;
    GrayImage::from_fn(width, height, |x, y| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        if dx * dx + dy * dy <= r2 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Binary mask from a per-pixel predicate over an RGB image.
pub fn mask_from_rgb(img: &RgbImage, pred: impl Fn([u8; 3]) -> bool) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        if pred(img.get_pixel(x, y).0) {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

pub fn mask_or(a: &GrayImage, b: &GrayImage) -> GrayImage {
    combine(a, b, |p, q| p > 0 || q > 0)
}

pub fn mask_and(a: &GrayImage, b: &GrayImage) -> GrayImage {
    combine(a, b, |p, q| p > 0 && q > 0)
}

/// Pixels set in `a` but not in `b`.
pub fn mask_minus(a: &GrayImage, b: &GrayImage) -> GrayImage {
    combine(a, b, |p, q| p > 0 && q == 0)
}

fn combine(a: &GrayImage, b: &GrayImage, f: impl Fn(u8, u8) -> bool) -> GrayImage {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        if f(a.get_pixel(x, y)[0], b.get_pixel(x, y)[0]) {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

pub fn mask_count(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p[0] > 0).count()
}

/// Paint a filled axis-aligned box into a mask, clipped to its bounds.
pub fn fill_box(mask: &mut GrayImage, x: i64, y: i64, w: i64, h: i64) {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + w).min(mask.width() as i64);
    let y1 = (y + h).min(mask.height() as i64);
    for yy in y0..y1 {
        for xx in x0..x1 {
            mask.put_pixel(xx as u32, yy as u32, Luma([255]));
        }
    }
}

/// One 8-connected blob of set pixels.
#[derive(Debug, Clone)]
pub struct Component {
    pub pixels: Vec<(u32, u32)>,
}

impl Component {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }
}

/// 8-connected components of the set pixels of `mask`.
pub fn connected_components(mask: &GrayImage) -> Vec<Component> {
    let (w, h) = mask.dimensions();
    let mut seen = vec![false; (w * h) as usize];
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    for start_y in 0..h {
        for start_x in 0..w {
            let idx = (start_y * w + start_x) as usize;
            if seen[idx] || mask.get_pixel(start_x, start_y)[0] == 0 {
                continue;
            }
            seen[idx] = true;
            queue.push_back((start_x, start_y));
            let mut pixels = Vec::new();

            while let Some((x, y)) = queue.pop_front() {
                pixels.push((x, y));
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let nx = x as i64 + dx;
                        let ny = y as i64 + dy;
                        if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                            continue;
                        }
                        let nidx = (ny as u32 * w + nx as u32) as usize;
                        if !seen[nidx] && mask.get_pixel(nx as u32, ny as u32)[0] > 0 {
                            seen[nidx] = true;
                            queue.push_back((nx as u32, ny as u32));
                        }
                    }
                }
            }
            components.push(Component { pixels });
        }
    }
    components
}

/// Drop every blob smaller than `min_area` pixels.
pub fn remove_small_blobs(mask: &GrayImage, min_area: usize) -> GrayImage {
    let mut out = GrayImage::new(mask.width(), mask.height());
    for comp in connected_components(mask) {
        if comp.area() >= min_area {
            for &(x, y) in &comp.pixels {
                out.put_pixel(x, y, Luma([255]));
            }
        }
    }
    out
}

/// Copy a sub-window, clamped to the image. Returns `None` for an empty window.
pub fn window<P>(
    img: &ImageBuffer<P, Vec<P::Subpixel>>,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
) -> Option<ImageBuffer<P, Vec<P::Subpixel>>>
where
    P: Pixel + 'static,
{
    let x = x.min(img.width());
    let y = y.min(img.height());
    let w = w.min(img.width() - x);
    let h = h.min(img.height() - y);
    if w == 0 || h == 0 {
        return None;
    }
    Some(image::imageops::crop_imm(img, x, y, w, h).to_image())
}
