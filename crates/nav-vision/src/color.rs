//! Color bands of the minimap / large-map rendering convention.
//!
//! All pixels are RGB. Roads are neutral gray, adjacent floors a dim bluish
//! gray ramp, enemies a saturated red with G ≈ B, road borders light gray.

/// Max channel spread of a current-floor road pixel.
pub const ROAD_MAX_DELTA: u8 = 2;
/// Brightness band of current-floor roads.
pub const ROAD_BRIGHTNESS: (u8, u8) = (45, 115);
/// Brightness band of adjacent-floor roads seen through the minimap.
pub const OTHER_FLOOR_BRIGHTNESS: (u8, u8) = (30, 110);
/// Brightness band of the light-gray road border.
pub const EDGE_BRIGHTNESS: (u8, u8) = (140, 210);
pub const EDGE_MAX_DELTA: u8 = 3;

/// Default color of the avatar arrow.
pub const ARROW_COLOR: [u8; 3] = [240, 200, 60];

fn brightness(p: [u8; 3]) -> u8 {
    ((p[0] as u16 + p[1] as u16 + p[2] as u16) / 3) as u8
}

fn spread(p: [u8; 3]) -> u8 {
    let max = p[0].max(p[1]).max(p[2]);
    let min = p[0].min(p[1]).min(p[2]);
    max - min
}

fn in_band(v: u8, band: (u8, u8)) -> bool {
    v >= band.0 && v <= band.1
}

/// Largest per-channel absolute difference.
pub fn channel_distance(a: [u8; 3], b: [u8; 3]) -> u8 {
    (0..3).map(|i| a[i].abs_diff(b[i])).max().unwrap_or(0)
}

/// Current-floor road: near-equal channels inside the road brightness band.
pub fn is_road(p: [u8; 3]) -> bool {
    spread(p) <= ROAD_MAX_DELTA && in_band(brightness(p), ROAD_BRIGHTNESS)
}

/// Adjacent-floor road: B ≥ G ≥ R with small steps, not neutral.
pub fn is_other_floor_road(p: [u8; 3]) -> bool {
    let [r, g, b] = p;
    b >= g
        && g >= r
        && b - g <= 2
        && g - r <= 2
        && b > r
        && in_band(brightness(p), OTHER_FLOOR_BRIGHTNESS)
}

/// Enemy marker: saturated red with G ≈ B.
pub fn is_enemy(p: [u8; 3]) -> bool {
    let [r, g, b] = p;
    r >= 150 && r.saturating_sub(g) >= 60 && g.abs_diff(b) <= 12
}

/// Light-gray road border, only used to relax the matching mask.
pub fn is_edge(p: [u8; 3]) -> bool {
    spread(p) <= EDGE_MAX_DELTA && in_band(brightness(p), EDGE_BRIGHTNESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_road_band() {
        assert!(is_road([80, 81, 82]));
        assert!(!is_road([80, 84, 82]));
        assert!(!is_road([20, 20, 20]));
        assert!(!is_road([180, 180, 180]));
    }

    #[test]
    fn test_other_floor_ramp() {
        assert!(is_other_floor_road([60, 61, 63]));
        assert!(!is_other_floor_road([60, 60, 60]));
        assert!(!is_other_floor_road([63, 61, 60]));
    }

    #[test]
    fn test_enemy_and_edge() {
        assert!(is_enemy([220, 60, 65]));
        assert!(!is_enemy([220, 60, 120]));
        assert!(is_edge([170, 171, 172]));
        assert!(!is_edge([80, 80, 80]));
    }

    #[test]
    fn test_channel_distance() {
        assert_eq!(channel_distance(ARROW_COLOR, [230, 210, 60]), 10);
    }
}
