use nav_state::Point;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Candidates may overshoot the travel bound by this factor.
pub const DISTANCE_SLACK: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineConstraint {
    pub p1: Point,
    pub p2: Point,
    pub max_line_distance: f64,
}

/// What the caller knows about where the avatar can be this tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerifyPosInfo {
    pub last_pos: Point,
    pub max_distance: f64,
    pub line: Option<LineConstraint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    TooFar,
    OffLine,
}

impl Verdict {
    pub fn is_accepted(self) -> bool {
        self == Verdict::Accepted
    }
}

/// Rejects fixes the avatar could not have reached since the last one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionVerifier;

impl MotionVerifier {
    pub fn check(&self, candidate: Point, info: Option<&VerifyPosInfo>) -> Verdict {
        let Some(info) = info else {
            return Verdict::Accepted;
        };

        let moved = candidate.distance(&info.last_pos);
        if moved > info.max_distance * DISTANCE_SLACK {
            debug!(
                "Rejected ({:.1}, {:.1}): {:.1} px from last fix, limit {:.1}",
                candidate.x, candidate.y, moved, info.max_distance
            );
            return Verdict::TooFar;
        }

        if let Some(line) = &info.line {
            let off = candidate.distance_to_line(&line.p1, &line.p2);
            if off > line.max_line_distance {
                debug!(
                    "Rejected ({:.1}, {:.1}): {:.1} px off the route line, limit {:.1}",
                    candidate.x, candidate.y, off, line.max_line_distance
                );
                return Verdict::OffLine;
            }
        }
        Verdict::Accepted
    }
}
