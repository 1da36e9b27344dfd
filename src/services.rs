//! Collaborators the navigation controller talks to. Everything outside the
//! localization core sits behind one of these traits.

use anyhow::Result;
use futures::future::BoxFuture;
use image::RgbaImage;
use nav_capture::{crop_rgb, ReplaySource, ScreenRegion, WindowCapture};
use nav_state::Point;
use nav_vision::{LargeMapIndex, Localize, MiniMapPreprocessor};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenState {
    /// The avatar walks the world and the minimap is visible.
    InWorld,
    /// Combat, a menu or a loading screen.
    NotInWorld,
}

pub trait ScreenshotSource: Send + Sync {
    fn capture(&self) -> Result<RgbaImage>;
    fn screen_state(&self, frame: &RgbaImage) -> ScreenState;
}

/// Movement output. `turn_degrees` is the signed turn (clockwise positive)
/// from the current heading towards `target`.
pub trait InputSink: Send + Sync {
    fn move_towards(&self, target: Point, turn_degrees: f64, sprint: bool);
    fn stop_moving(&self);
    fn use_skill(&self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombatReport {
    pub success: bool,
    /// Time the avatar was busy; excluded from travel time.
    pub active: Duration,
}

pub trait CombatDelegate: Send + Sync {
    fn enter_combat(&self) -> BoxFuture<'_, Result<CombatReport>>;
}

/// Detects an incoming attack on a full frame. Slow; run off the control loop.
pub trait AttackDetector: Send + Sync {
    /// Bearing of the attacker, `None` when nobody attacks.
    fn attack_direction(&self, frame: &RgbaImage) -> Option<f64>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Everything a navigation run needs, injected by the caller.
#[derive(Clone)]
pub struct NavigationServices {
    pub screen: Arc<dyn ScreenshotSource>,
    pub input: Arc<dyn InputSink>,
    pub combat: Arc<dyn CombatDelegate>,
    pub attack: Option<Arc<dyn AttackDetector>>,
    pub clock: Arc<dyn Clock>,
    pub localizer: Arc<dyn Localize>,
    pub minimap: Arc<MiniMapPreprocessor>,
    pub maps: Arc<LargeMapIndex>,
    /// Where the minimap sits inside a captured frame.
    pub minimap_region: ScreenRegion,
}

/// Anything that yields full game frames.
pub trait FrameSource: Send + Sync {
    fn next_frame(&self) -> Result<RgbaImage>;
}

impl FrameSource for WindowCapture {
    fn next_frame(&self) -> Result<RgbaImage> {
        self.capture()
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&self) -> Result<RgbaImage> {
        ReplaySource::next_frame(self)
    }
}

/// Screenshot source over real frames. A frame counts as in-world when
/// arrow-colored pixels show in the minimap center; the heading itself is
/// left to the tick's `MiniMapInfo`.
pub struct GameScreen<F> {
    frames: F,
    minimap: Arc<MiniMapPreprocessor>,
    region: ScreenRegion,
}

impl<F: FrameSource> GameScreen<F> {
    pub fn new(frames: F, minimap: Arc<MiniMapPreprocessor>, region: ScreenRegion) -> Self {
        Self {
            frames,
            minimap,
            region,
        }
    }
}

impl<F: FrameSource> ScreenshotSource for GameScreen<F> {
    fn capture(&self) -> Result<RgbaImage> {
        self.frames.next_frame()
    }

    fn screen_state(&self, frame: &RgbaImage) -> ScreenState {
        let crop = crop_rgb(frame, &self.region);
        if self.minimap.arrow_visible(&crop) {
            ScreenState::InWorld
        } else {
            ScreenState::NotInWorld
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::tests::{arrow_asset, test_preprocessor};
    use image::{Rgb, RgbImage};
    use nav_vision::color::ARROW_COLOR;
    use nav_vision::heading::rotated_arrow;
    use std::sync::Mutex;

    struct Frames(Mutex<Vec<RgbaImage>>);

    impl FrameSource for Frames {
        fn next_frame(&self) -> Result<RgbaImage> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("out of frames"))
        }
    }

    fn frame(with_arrow: bool) -> RgbaImage {
        let mut mm = RgbImage::from_pixel(40, 40, Rgb([30, 70, 15]));
        if with_arrow {
            let arrow = rotated_arrow(&arrow_asset(11), 45.0);
            for (x, y, px) in arrow.enumerate_pixels() {
                if px[0] > 0 {
                    mm.put_pixel(14 + x, 14 + y, Rgb(ARROW_COLOR));
                }
            }
        }
        image::DynamicImage::ImageRgb8(mm).to_rgba8()
    }

    #[test]
    fn test_screen_state_follows_arrow() {
        let screen = GameScreen::new(
            Frames(Mutex::new(vec![frame(false), frame(true)])),
            test_preprocessor(40),
            ScreenRegion::FULL,
        );

        let first = screen.capture().unwrap();
        assert_eq!(screen.screen_state(&first), ScreenState::InWorld);
        let second = screen.capture().unwrap();
        assert_eq!(screen.screen_state(&second), ScreenState::NotInWorld);
        assert!(screen.capture().is_err());
    }

    #[test]
    fn test_in_world_without_readable_heading() {
        // A solid arrow-colored block over the whole window: no bank angle
        // correlates with it, but the minimap is clearly on screen.
        let mut mm = RgbImage::from_pixel(40, 40, Rgb([30, 70, 15]));
        for y in 12..28 {
            for x in 12..28 {
                mm.put_pixel(x, y, Rgb(ARROW_COLOR));
            }
        }
        let prep = test_preprocessor(40);
        assert!(prep.extract_heading(&mm).is_none());

        let frame = image::DynamicImage::ImageRgb8(mm).to_rgba8();
        let screen = GameScreen::new(
            Frames(Mutex::new(vec![frame.clone()])),
            prep,
            ScreenRegion::FULL,
        );
        assert_eq!(screen.screen_state(&frame), ScreenState::InWorld);
    }
}
