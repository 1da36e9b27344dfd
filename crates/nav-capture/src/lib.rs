use anyhow::{Context, Result};
use image::{RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use xcap::Window;

pub mod replay;

pub use replay::ReplaySource;

/// Normalized screen region (0.0-1.0 coordinates relative to the game window)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ScreenRegion {
    /// The whole frame.
    pub const FULL: ScreenRegion = ScreenRegion {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };
}

/// Well-known screen regions for a 1920x1080 reference resolution
pub mod regions {
    use super::ScreenRegion;

    /// Circular minimap in the top-left HUD corner, ~190px square at 1080p.
    pub fn minimap() -> ScreenRegion {
        ScreenRegion {
            x: 0.0406,
            y: 0.0713,
            width: 0.0990,
            height: 0.1759,
        }
    }
}

/// Game window titles to search for, lowercase
pub const DEFAULT_WINDOW_TITLES: &[&str] = &["honkai: star rail", "崩坏：星穹铁道", "starrail"];

/// Find the game window by searching window titles
fn find_game_window(titles: &[String]) -> Option<Window> {
    let windows = match Window::all() {
        Ok(w) => w,
        Err(e) => {
            warn!("Failed to enumerate windows: {}", e);
            return None;
        }
    };

    for window in windows {
        let title = match window.title() {
            Ok(t) => t.to_lowercase(),
            Err(_) => continue,
        };
        if titles.iter().any(|t| title.contains(t.as_str())) {
            debug!("Found game window: {}", title);
            return Some(window);
        }
    }
    None
}

/// Captures the client area of the game window.
pub struct WindowCapture {
    titles: Vec<String>,
}

impl WindowCapture {
    pub fn new() -> Self {
        Self::with_titles(DEFAULT_WINDOW_TITLES.iter().map(|t| t.to_string()).collect())
    }

    pub fn with_titles(titles: Vec<String>) -> Self {
        let titles = titles.into_iter().map(|t| t.to_lowercase()).collect();
        Self { titles }
    }

    /// Capture one frame. Fails when the window is gone or capture is denied.
    pub fn capture(&self) -> Result<RgbaImage> {
        let window = find_game_window(&self.titles).context("Game window not found")?;
        window
            .capture_image()
            .context("Failed to capture window image")
    }
}

impl Default for WindowCapture {
    fn default() -> Self {
        Self::new()
    }
}

/// Crop a region from a captured frame using normalized coordinates
pub fn crop_region(frame: &RgbaImage, region: &ScreenRegion) -> RgbaImage {
    let (w, h) = (frame.width(), frame.height());
    let x = (region.x * w as f64) as u32;
    let y = (region.y * h as f64) as u32;
    let rw = (region.width * w as f64) as u32;
    let rh = (region.height * h as f64) as u32;

    // Clamp to image bounds
    let x = x.min(w.saturating_sub(1));
    let y = y.min(h.saturating_sub(1));
    let rw = rw.min(w - x);
    let rh = rh.min(h - y);

    image::imageops::crop_imm(frame, x, y, rw, rh).to_image()
}

/// Crop a region and drop the alpha channel; vision code works on RGB.
pub fn crop_rgb(frame: &RgbaImage, region: &ScreenRegion) -> RgbImage {
    let rgba = crop_region(frame, region);
    image::DynamicImage::ImageRgba8(rgba).to_rgb8()
}
