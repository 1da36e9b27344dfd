//! Minimap-driven navigation: locate the avatar on a pre-captured map and
//! steer it to a target coordinate.

pub mod config;
pub mod controller;
pub mod services;

pub use config::NavigationConfig;
pub use controller::{MoveDirectly, NavFailure, NavState, StepResult, STEP_NAME};
pub use services::{
    AttackDetector, Clock, CombatDelegate, CombatReport, FrameSource, GameScreen, InputSink,
    NavigationServices, ScreenState, ScreenshotSource, SystemClock,
};

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "minimap_nav=debug,nav_vision=debug,nav_capture=info";

/// Install the global `tracing` subscriber. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .try_init();
}
