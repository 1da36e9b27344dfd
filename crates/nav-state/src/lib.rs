//! Geometry value types and the per-run tracking state of a navigation:
//! rolling position history, motion clocks and failure counters.

pub mod geometry;
pub mod tracking;

pub use geometry::{normalize_degrees, turn_between, MatchResult, Point, Rect};
pub use tracking::{
    MotionClock, NoPositionAction, NoPositionCounter, PositionHistory, PositionSample,
    StuckConfig, StuckDetector, StuckVerdict,
};
