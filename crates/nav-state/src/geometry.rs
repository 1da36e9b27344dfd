use serde::{Deserialize, Serialize};

/// A 2D coordinate in either screen-pixel or map-pixel space.
///
/// The two spaces are never mixed implicitly; converting between them always
/// goes through an explicit offset and scale.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }

    pub fn scale(&self, factor: f64) -> Point {
        Point::new(self.x * factor, self.y * factor)
    }

    /// Compass bearing from `self` towards `other` in degrees.
    ///
    /// 0° points to -y (up on screen and map), angles grow clockwise, so east is
    /// 90°. This is the same convention the minimap arrow uses for the heading.
    pub fn bearing_to(&self, other: &Point) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        normalize_degrees(dx.atan2(-dy).to_degrees())
    }

    /// Perpendicular distance from `self` to the infinite line through `a` and `b`.
    /// Falls back to the point distance when `a == b`.
    pub fn distance_to_line(&self, a: &Point, b: &Point) -> f64 {
        let len = a.distance(b);
        if len < f64::EPSILON {
            return self.distance(a);
        }
        ((b.x - a.x) * (a.y - self.y) - (a.x - self.x) * (b.y - a.y)).abs() / len
    }
}

/// Normalize any angle in degrees into `[0, 360)`.
pub fn normalize_degrees(angle: f64) -> f64 {
    let a = angle % 360.0;
    if a < 0.0 {
        a + 360.0
    } else {
        a
    }
}

/// Signed shortest rotation from `from` to `to`, in `(-180, 180]` degrees.
/// Positive values turn clockwise.
pub fn turn_between(from: f64, to: f64) -> f64 {
    let d = normalize_degrees(to - from);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Axis-aligned rectangle, `x1/y1` inclusive and `x2/y2` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Rect {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Square window of half-size `radius` around `center`.
    pub fn around(center: Point, radius: f64) -> Self {
        Self::new(
            center.x - radius,
            center.y - radius,
            center.x + radius,
            center.y + radius,
        )
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.x1 && p.x < self.x2 && p.y >= self.y1 && p.y < self.y2
    }

    pub fn expand(&self, margin: f64) -> Self {
        Self::new(
            self.x1 - margin,
            self.y1 - margin,
            self.x2 + margin,
            self.y2 + margin,
        )
    }

    /// Clamp to `[0, width) x [0, height)`. Returns `None` when nothing is left.
    pub fn clamp_to(&self, width: f64, height: f64) -> Option<Self> {
        let r = Self::new(
            self.x1.max(0.0),
            self.y1.max(0.0),
            self.x2.min(width),
            self.y2.min(height),
        );
        (r.width() > 0.0 && r.height() > 0.0).then_some(r)
    }
}

/// Result of a template search.
///
/// `(x, y)` is the top-left offset of the matched template inside the source
/// image, `w`/`h` are the template dimensions at the matched scale, and
/// `scale` is the factor that was applied to the template before matching.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub scale: f64,
}

impl MatchResult {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Shift the result by a window origin, e.g. after matching in a cropped
    /// search area of a larger image.
    pub fn translated(mut self, dx: f64, dy: f64) -> Self {
        self.x += dx;
        self.y += dy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearing_convention() {
        let origin = Point::new(100.0, 100.0);
        assert!((origin.bearing_to(&Point::new(100.0, 50.0)) - 0.0).abs() < 1e-9);
        assert!((origin.bearing_to(&Point::new(300.0, 100.0)) - 90.0).abs() < 1e-9);
        assert!((origin.bearing_to(&Point::new(100.0, 150.0)) - 180.0).abs() < 1e-9);
        assert!((origin.bearing_to(&Point::new(0.0, 100.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_turn_between_wraps() {
        assert_eq!(turn_between(350.0, 10.0), 20.0);
        assert_eq!(turn_between(10.0, 350.0), -20.0);
        assert_eq!(turn_between(0.0, 180.0), 180.0);
    }

    #[test]
    fn test_distance_to_line() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 0.0);
        assert_eq!(Point::new(5.0, 0.0).distance_to_line(&a, &b), 0.0);
        assert!((Point::new(5.0, 4.0).distance_to_line(&a, &b) - 4.0).abs() < 1e-9);
        assert!((Point::new(3.0, 4.0).distance_to_line(&a, &a) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_match_center() {
        let m = MatchResult {
            confidence: 0.9,
            x: 10.0,
            y: 20.0,
            w: 40.0,
            h: 30.0,
            scale: 1.25,
        };
        assert_eq!(m.center(), Point::new(30.0, 35.0));
        assert_eq!(m.translated(5.0, 5.0).center(), Point::new(35.0, 40.0));
    }

    #[test]
    fn test_rect_clamp() {
        let r = Rect::new(-5.0, -5.0, 20.0, 20.0).clamp_to(10.0, 10.0).unwrap();
        assert_eq!(r, Rect::new(0.0, 0.0, 10.0, 10.0));
        assert!(Rect::new(20.0, 20.0, 30.0, 30.0).clamp_to(10.0, 10.0).is_none());
    }
}
