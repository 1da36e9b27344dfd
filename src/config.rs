use anyhow::{Context, Result};
use nav_state::StuckConfig;
use nav_vision::{LocalizerConfig, MinimapConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables of a navigation run. Every field has a default, so a config file
/// only needs the values it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Walking speed in map pixels per second.
    pub walk_speed: f64,
    /// Sprinting speed in map pixels per second.
    pub run_speed: f64,
    /// Floor of the per-tick travel bound, covering localization jitter.
    pub min_max_distance: f64,
    /// Added around the travel bound when building the search window.
    pub search_margin: f64,
    pub arrival_threshold: f64,
    pub stop_on_arrival: bool,
    /// Sprint while moving. A forced stop walks until the next fix.
    pub sprint: bool,
    /// Allowed distance from the start→target line; doubled after combat or
    /// an unstuck maneuver until the next fix.
    pub max_line_distance: f64,
    pub stuck: StuckConfig,
    pub no_position_stop_at: u32,
    pub no_position_fail_at: u32,
    /// Consecutive misses after which the search covers the whole map.
    pub widen_after: u32,
    pub tick_interval_ms: u64,
    /// Length of one unstuck movement.
    pub unstuck_step_ms: u64,
    /// Distance aimed at by one unstuck movement, in map pixels.
    pub unstuck_distance: f64,
    pub attack_check: bool,
    pub localizer: LocalizerConfig,
    pub minimap: MinimapConfig,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            walk_speed: 20.0,
            run_speed: 35.0,
            min_max_distance: 15.0,
            search_margin: 10.0,
            arrival_threshold: 10.0,
            stop_on_arrival: true,
            sprint: true,
            max_line_distance: 40.0,
            stuck: StuckConfig::default(),
            no_position_stop_at: 3,
            no_position_fail_at: 10,
            widen_after: 2,
            tick_interval_ms: 100,
            unstuck_step_ms: 800,
            unstuck_distance: 30.0,
            attack_check: true,
            localizer: LocalizerConfig::default(),
            minimap: MinimapConfig::default(),
        }
    }
}

impl NavigationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn unstuck_step(&self) -> Duration {
        Duration::from_millis(self.unstuck_step_ms)
    }

    /// Travel speed for the current movement mode.
    pub fn speed(&self, sprinting: bool) -> f64 {
        if sprinting {
            self.run_speed
        } else {
            self.walk_speed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: NavigationConfig = serde_json::from_str(
            r#"{ "walk_speed": 25.0, "stuck": { "window": 8 }, "localizer": { "consensus_px": 7.5 } }"#,
        )
        .unwrap();
        assert_eq!(config.walk_speed, 25.0);
        assert_eq!(config.run_speed, 35.0);
        assert_eq!(config.stuck.window, 8);
        assert_eq!(config.stuck.threshold, 20.0);
        assert_eq!(config.localizer.consensus_px, 7.5);
        assert_eq!(config.localizer.base_scale, 1.25);
        assert_eq!(config.arrival_threshold, 10.0);
    }

    #[test]
    fn test_load_missing_file() {
        let err = NavigationConfig::load(Path::new("/nonexistent/nav.json")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read"));
    }
}
