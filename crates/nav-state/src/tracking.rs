use crate::geometry::Point;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// One accepted position fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub pos: Point,
    pub at: Instant,
}

/// Rolling, time-ordered history of accepted positions with a fixed cap.
/// Pushing past the cap evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct PositionHistory {
    samples: VecDeque<PositionSample>,
    cap: usize,
}

impl PositionHistory {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(2);
        Self {
            samples: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, pos: Point, at: Instant) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(PositionSample { pos, at });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.cap
    }

    pub fn last(&self) -> Option<&PositionSample> {
        self.samples.back()
    }

    /// Distance between the oldest and the newest sample.
    pub fn displacement(&self) -> Option<f64> {
        let first = self.samples.front()?;
        let last = self.samples.back()?;
        Some(first.pos.distance(&last.pos))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Move every timestamp forward by `d`, used to hide paused or combat time.
    pub fn shift(&mut self, d: Duration) {
        for s in &mut self.samples {
            s.at += d;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PositionSample> {
        self.samples.iter()
    }
}

/// Bookkeeping clocks of a navigation run.
///
/// Every duration derived from these clocks excludes time spent paused, in
/// combat or standing still after a forced stop, so that the kinematic bound
/// of the next fix reflects only time the avatar could actually travel.
#[derive(Debug, Clone)]
pub struct MotionClock {
    last_fix_at: Instant,
    last_battle_at: Option<Instant>,
    moving_since: Option<Instant>,
    stopped_at: Option<Instant>,
    paused_at: Option<Instant>,
}

impl MotionClock {
    pub fn new(now: Instant) -> Self {
        Self {
            last_fix_at: now,
            last_battle_at: None,
            moving_since: None,
            stopped_at: None,
            paused_at: None,
        }
    }

    /// Travel time since the last accepted fix.
    pub fn elapsed_since_fix(&self, now: Instant) -> Duration {
        let reference = self.stopped_at.unwrap_or(now);
        reference.saturating_duration_since(self.last_fix_at)
    }

    /// A fix taken while standing still restarts the stand-still interval
    /// at the fix, so the next `start_moving` only discounts what follows it.
    pub fn record_fix(&mut self, now: Instant) {
        self.last_fix_at = now;
        if let Some(stopped) = self.stopped_at.as_mut() {
            *stopped = now;
        }
    }

    pub fn last_battle_at(&self) -> Option<Instant> {
        self.last_battle_at
    }

    pub fn is_moving(&self) -> bool {
        self.moving_since.is_some() && self.stopped_at.is_none()
    }

    /// Seconds of uninterrupted movement, `0.0` when idle.
    pub fn continuous_move_secs(&self, now: Instant) -> f64 {
        match (self.moving_since, self.stopped_at) {
            (Some(since), None) => now.saturating_duration_since(since).as_secs_f64(),
            _ => 0.0,
        }
    }

    pub fn start_moving(&mut self, now: Instant) {
        if let Some(stopped) = self.stopped_at.take() {
            // The stand-still interval does not count as travel time.
            self.last_fix_at += now.saturating_duration_since(stopped);
        }
        if self.moving_since.is_none() {
            self.moving_since = Some(now);
        }
    }

    pub fn stop_moving(&mut self, now: Instant) {
        if self.moving_since.take().is_some() {
            self.stopped_at = Some(now);
        }
    }

    /// Shift the clocks after a combat handoff that kept the avatar busy for
    /// `active`.
    pub fn add_battle_time(&mut self, active: Duration, now: Instant) {
        self.shift(active);
        self.last_battle_at = Some(now);
    }

    pub fn pause(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// End a pause and return its duration; all clocks move forward by it.
    pub fn resume(&mut self, now: Instant) -> Duration {
        let Some(paused_at) = self.paused_at.take() else {
            return Duration::ZERO;
        };
        let paused = now.saturating_duration_since(paused_at);
        self.shift(paused);
        debug!("Resumed after {:?}; clocks shifted", paused);
        paused
    }

    fn shift(&mut self, d: Duration) {
        self.last_fix_at += d;
        if let Some(t) = self.moving_since.as_mut() {
            *t += d;
        }
        if let Some(t) = self.stopped_at.as_mut() {
            *t += d;
        }
    }
}

/// Tunables of stuck detection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StuckConfig {
    /// Samples in the detection window.
    pub window: usize,
    /// Displacement below which the window counts as stuck, in map pixels.
    pub threshold: f64,
    /// Minimum spacing between two recorded samples, in seconds.
    pub rec_pos_interval: f64,
    /// Highest maneuver level; one more detection is terminal.
    pub max_level: u32,
}

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            window: 6,
            threshold: 20.0,
            rec_pos_interval: 0.5,
            max_level: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckVerdict {
    Moving,
    /// Run the unstuck maneuver at this escalation level (1-based).
    Stuck { level: u32 },
    /// The escalation cap was exceeded.
    GiveUp,
}

/// Stuck detection over a throttled rolling position history.
#[derive(Debug, Clone)]
pub struct StuckDetector {
    config: StuckConfig,
    history: PositionHistory,
    consecutive: u32,
}

impl StuckDetector {
    pub fn new(config: StuckConfig) -> Self {
        Self {
            history: PositionHistory::new(config.window),
            config,
            consecutive: 0,
        }
    }

    /// Append a verified position, at most once per `rec_pos_interval`.
    /// Returns whether the sample was stored.
    pub fn record(&mut self, pos: Point, now: Instant) -> bool {
        if let Some(last) = self.history.last() {
            let since = now.saturating_duration_since(last.at).as_secs_f64();
            if since < self.config.rec_pos_interval {
                return false;
            }
        }
        self.history.push(pos, now);
        true
    }

    /// Judge the current window. A stuck window is consumed by the verdict:
    /// the history is cleared so the next detection needs a fresh window.
    pub fn check(&mut self) -> StuckVerdict {
        if !self.history.is_full() {
            return StuckVerdict::Moving;
        }
        let displacement = self.history.displacement().unwrap_or(f64::MAX);
        if displacement >= self.config.threshold {
            self.consecutive = 0;
            return StuckVerdict::Moving;
        }

        self.history.clear();
        self.consecutive += 1;
        debug!(
            "Stuck window: displacement {:.1}px, consecutive {}",
            displacement, self.consecutive
        );
        if self.consecutive > self.config.max_level {
            StuckVerdict::GiveUp
        } else {
            StuckVerdict::Stuck {
                level: self.consecutive,
            }
        }
    }

    pub fn history(&self) -> &PositionHistory {
        &self.history
    }

    pub fn shift(&mut self, d: Duration) {
        self.history.shift(d);
    }

    /// Forget the current window without touching the escalation level, e.g.
    /// after a combat handoff moved the avatar.
    pub fn reset_window(&mut self) {
        self.history.clear();
    }
}

/// What the controller has to do after another failed localization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoPositionAction {
    Continue,
    StopMoving,
    Fail,
}

/// Consecutive "no position" counter with stop and fail thresholds.
#[derive(Debug, Clone)]
pub struct NoPositionCounter {
    count: u32,
    stop_at: u32,
    fail_at: u32,
}

impl NoPositionCounter {
    pub fn new(stop_at: u32, fail_at: u32) -> Self {
        Self {
            count: 0,
            stop_at,
            fail_at,
        }
    }

    pub fn miss(&mut self) -> NoPositionAction {
        self.count += 1;
        if self.count >= self.fail_at {
            NoPositionAction::Fail
        } else if self.count == self.stop_at {
            NoPositionAction::StopMoving
        } else {
            NoPositionAction::Continue
        }
    }

    pub fn hit(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_active(&self) -> bool {
        self.count > 0
    }
}

impl Default for NoPositionCounter {
    fn default() -> Self {
        Self::new(3, 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_history_evicts_oldest() {
        let t0 = Instant::now();
        let mut h = PositionHistory::new(3);
        for i in 0..5 {
            h.push(Point::new(i as f64, 0.0), t0 + secs(i as f64));
        }
        assert_eq!(h.len(), 3);
        let xs: Vec<f64> = h.iter().map(|s| s.pos.x).collect();
        assert_eq!(xs, vec![2.0, 3.0, 4.0]);
        assert_eq!(h.displacement(), Some(2.0));
    }

    #[test]
    fn test_pause_is_excluded_from_elapsed() {
        let t0 = Instant::now();
        let mut clock = MotionClock::new(t0);
        clock.start_moving(t0);

        clock.pause(t0 + secs(1.0));
        let paused = clock.resume(t0 + secs(4.0));
        assert_eq!(paused, secs(3.0));

        // 5s of wall clock minus the 3s pause.
        let elapsed = clock.elapsed_since_fix(t0 + secs(5.0));
        assert!((elapsed.as_secs_f64() - 2.0).abs() < 1e-6);
        assert!((clock.continuous_move_secs(t0 + secs(5.0)) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_stand_still_is_excluded_from_elapsed() {
        let t0 = Instant::now();
        let mut clock = MotionClock::new(t0);
        clock.start_moving(t0);
        clock.stop_moving(t0 + secs(1.0));
        assert!(!clock.is_moving());
        // Standing still: elapsed is frozen at the stop.
        assert!((clock.elapsed_since_fix(t0 + secs(6.0)).as_secs_f64() - 1.0).abs() < 1e-6);
        clock.start_moving(t0 + secs(6.0));
        assert!((clock.elapsed_since_fix(t0 + secs(7.0)).as_secs_f64() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_fix_while_stopped_counts_travel_once() {
        let t0 = Instant::now();
        let mut clock = MotionClock::new(t0);
        clock.start_moving(t0);
        clock.stop_moving(t0 + secs(1.0));
        clock.record_fix(t0 + secs(5.0));
        assert_eq!(clock.elapsed_since_fix(t0 + secs(5.5)), Duration::ZERO);
        clock.start_moving(t0 + secs(5.0));
        assert!((clock.elapsed_since_fix(t0 + secs(6.0)).as_secs_f64() - 1.0).abs() < 1e-6);
        assert!((clock.elapsed_since_fix(t0 + secs(8.0)).as_secs_f64() - 3.0).abs() < 1e-6);

        // Moving again later still discounts only the wait after the fix.
        clock.stop_moving(t0 + secs(9.0));
        clock.record_fix(t0 + secs(10.0));
        clock.start_moving(t0 + secs(12.0));
        assert!((clock.elapsed_since_fix(t0 + secs(13.0)).as_secs_f64() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_battle_time_shifts_clocks() {
        let t0 = Instant::now();
        let mut clock = MotionClock::new(t0);
        clock.add_battle_time(secs(10.0), t0 + secs(11.0));
        assert!((clock.elapsed_since_fix(t0 + secs(12.0)).as_secs_f64() - 2.0).abs() < 1e-6);
        assert_eq!(clock.last_battle_at(), Some(t0 + secs(11.0)));
    }

    #[test]
    fn test_record_is_throttled() {
        let t0 = Instant::now();
        let mut d = StuckDetector::new(StuckConfig::default());
        assert!(d.record(Point::new(0.0, 0.0), t0));
        assert!(!d.record(Point::new(1.0, 0.0), t0 + secs(0.2)));
        assert!(d.record(Point::new(2.0, 0.0), t0 + secs(0.5)));
        assert_eq!(d.history().len(), 2);
    }

    #[test]
    fn test_stuck_fires_once_per_window() {
        let t0 = Instant::now();
        let mut d = StuckDetector::new(StuckConfig::default());
        let mut verdicts = Vec::new();
        for i in 0..8 {
            d.record(Point::new(100.0 + (i % 3) as f64, 100.0), t0 + secs(0.5 * i as f64));
            verdicts.push(d.check());
        }
        let stuck = verdicts
            .iter()
            .filter(|v| matches!(v, StuckVerdict::Stuck { .. }))
            .count();
        assert_eq!(stuck, 1);
        assert_eq!(verdicts[5], StuckVerdict::Stuck { level: 1 });
    }

    #[test]
    fn test_stuck_escalates_then_gives_up() {
        let t0 = Instant::now();
        let config = StuckConfig {
            max_level: 2,
            ..Default::default()
        };
        let mut d = StuckDetector::new(config);
        let mut seen = Vec::new();
        for i in 0..18 {
            d.record(Point::new(50.0, 50.0), t0 + secs(0.5 * i as f64));
            match d.check() {
                StuckVerdict::Moving => {}
                v => seen.push(v),
            }
        }
        assert_eq!(
            seen,
            vec![
                StuckVerdict::Stuck { level: 1 },
                StuckVerdict::Stuck { level: 2 },
                StuckVerdict::GiveUp
            ]
        );
    }

    #[test]
    fn test_moving_window_resets_escalation() {
        let t0 = Instant::now();
        let mut d = StuckDetector::new(StuckConfig::default());
        for i in 0..6 {
            d.record(Point::new(0.0, 0.0), t0 + secs(0.5 * i as f64));
        }
        assert_eq!(d.check(), StuckVerdict::Stuck { level: 1 });
        for i in 6..12 {
            d.record(Point::new(10.0 * i as f64, 0.0), t0 + secs(0.5 * i as f64));
        }
        assert_eq!(d.check(), StuckVerdict::Moving);
        for i in 12..18 {
            d.record(Point::new(0.0, 0.0), t0 + secs(0.5 * i as f64));
        }
        assert_eq!(d.check(), StuckVerdict::Stuck { level: 1 });
    }

    #[test]
    fn test_no_position_thresholds() {
        let mut c = NoPositionCounter::default();
        assert_eq!(c.miss(), NoPositionAction::Continue);
        assert_eq!(c.miss(), NoPositionAction::Continue);
        assert_eq!(c.miss(), NoPositionAction::StopMoving);
        for _ in 3..9 {
            assert_eq!(c.miss(), NoPositionAction::Continue);
        }
        assert_eq!(c.miss(), NoPositionAction::Fail);
    }

    #[test]
    fn test_no_position_resets_on_hit() {
        let mut c = NoPositionCounter::default();
        c.miss();
        c.miss();
        c.hit();
        assert!(!c.is_active());
        let actions: Vec<_> = (0..9).map(|_| c.miss()).collect();
        assert!(!actions.contains(&NoPositionAction::Fail));
        assert_eq!(c.count(), 9);
    }
}
