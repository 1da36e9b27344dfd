//! `MoveDirectly`: walk the avatar in a straight line to a map coordinate.

use crate::config::NavigationConfig;
use crate::services::{NavigationServices, ScreenState};
use anyhow::Result;
use futures::FutureExt;
use image::RgbaImage;
use nav_capture::crop_rgb;
use nav_state::{
    normalize_degrees, turn_between, MotionClock, NoPositionAction, NoPositionCounter, Point,
    Rect, StuckDetector, StuckVerdict,
};
use nav_vision::verify::DISTANCE_SLACK;
use nav_vision::{ActiveMap, LineConstraint, LocateRequest, VerifyPosInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const STEP_NAME: &str = "move_directly";

/// Why a navigation ended without arriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavFailure {
    /// Too many consecutive ticks without a position fix.
    NoPosition,
    /// Every unstuck maneuver level was tried.
    UnstuckFailed,
    Cancelled,
}

impl std::fmt::Display for NavFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavFailure::NoPosition => write!(f, "position lost"),
            NavFailure::UnstuckFailed => write!(f, "stuck"),
            NavFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one control-loop tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepResult {
    Retry,
    Success(Point),
    Fail(NavFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    CheckScreen,
    InWorld,
    NotInWorld,
    AttackHandoff,
    Arrived,
    Failed,
}

pub struct MoveDirectly {
    services: NavigationServices,
    config: NavigationConfig,
    map: ActiveMap,
    floor: i32,
    target: Point,
    /// First end of the route line; the target is the other.
    route_start: Option<Point>,
    state: NavState,
    clock: MotionClock,
    stuck: StuckDetector,
    no_position: NoPositionCounter,
    last_pos: Option<Point>,
    last_heading: Option<f64>,
    sprint: bool,
    relaxed_line: bool,
    attack_task: Option<JoinHandle<Option<f64>>>,
    pause: watch::Receiver<bool>,
    cancel: Arc<AtomicBool>,
}

impl MoveDirectly {
    /// Navigate on region `region` towards `target`. `start`, when known,
    /// anchors the route line; otherwise the first fix does.
    pub fn new(
        services: NavigationServices,
        config: NavigationConfig,
        region: &str,
        start: Option<Point>,
        target: Point,
        pause: watch::Receiver<bool>,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self> {
        let map = services.maps.get(region)?;
        let floor = map.floor();
        let now = services.clock.now();
        Ok(Self {
            map: ActiveMap::new(map),
            floor,
            target,
            route_start: start,
            state: NavState::CheckScreen,
            clock: MotionClock::new(now),
            stuck: StuckDetector::new(config.stuck),
            no_position: NoPositionCounter::new(
                config.no_position_stop_at,
                config.no_position_fail_at,
            ),
            last_pos: start,
            last_heading: None,
            sprint: config.sprint,
            relaxed_line: false,
            attack_task: None,
            pause,
            cancel,
            services,
            config,
        })
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn position(&self) -> Option<Point> {
        self.last_pos
    }

    /// Continue on another floor's map. Position tracking starts over.
    pub fn switch_floor(&mut self, region: &str) -> Result<()> {
        let next = self.services.maps.get(region)?;
        self.floor = next.floor();
        self.map.switch_floor(next);
        self.last_pos = None;
        self.route_start = None;
        self.stuck.reset_window();
        Ok(())
    }

    /// Tick until arrival, a terminal failure or cancellation.
    pub async fn run(&mut self) -> Result<Point, NavFailure> {
        info!(
            "{}: heading for ({:.1}, {:.1}) on '{}'",
            STEP_NAME,
            self.target.x,
            self.target.y,
            self.map.current().key()
        );
        loop {
            if self.cancelled() {
                return Err(self.finish_failed(NavFailure::Cancelled));
            }
            self.wait_while_paused().await;
            if self.cancelled() {
                return Err(self.finish_failed(NavFailure::Cancelled));
            }

            match self.tick().await {
                StepResult::Retry => {}
                StepResult::Success(pos) => return Ok(pos),
                StepResult::Fail(reason) => return Err(reason),
            }
            tokio::time::sleep(self.config.tick_interval()).await;
        }
    }

    /// One pass of the control loop.
    pub async fn tick(&mut self) -> StepResult {
        self.state = NavState::CheckScreen;

        if !self.no_position.is_active() {
            match self.stuck.check() {
                StuckVerdict::Moving => {}
                StuckVerdict::Stuck { level } => {
                    self.unstuck(level).await;
                    return StepResult::Retry;
                }
                StuckVerdict::GiveUp => {
                    warn!("{}: still stuck after every maneuver", STEP_NAME);
                    return StepResult::Fail(self.finish_failed(NavFailure::UnstuckFailed));
                }
            }
        }

        let frame = match self.services.screen.capture() {
            Ok(f) => f,
            Err(e) => {
                debug!("Capture failed: {:#}", e);
                return StepResult::Retry;
            }
        };
        if self.services.screen.screen_state(&frame) == ScreenState::NotInWorld {
            self.state = NavState::NotInWorld;
            self.hand_off_combat().await;
            return StepResult::Retry;
        }
        self.state = NavState::InWorld;

        if let Some(bearing) = self.poll_attack(&frame) {
            info!("Attacked from {:.0}°", bearing);
            self.hand_off_combat().await;
            return StepResult::Retry;
        }

        let now = self.services.clock.now();
        let map = Arc::clone(self.map.for_floor(self.floor));
        let crop = crop_rgb(&frame, &self.services.minimap_region);
        let minimap = self.services.minimap.analyze(
            crop,
            map.another_floor_possible(),
            &map.landmark_templates,
        );
        if let Some(angle) = minimap.angle() {
            self.last_heading = Some(angle);
        }

        let request = self.locate_request(now);
        let widen = self.no_position.count() >= self.config.widen_after;
        let found = self
            .services
            .localizer
            .locate(&map, &minimap, &request, widen)
            .await;

        if found.is_none() {
            match self.no_position.miss() {
                NoPositionAction::Continue => {}
                NoPositionAction::StopMoving => {
                    debug!("No position {} times, stopping", self.no_position.count());
                    self.services.input.stop_moving();
                    self.clock.stop_moving(now);
                    self.sprint = false;
                }
                NoPositionAction::Fail => {
                    warn!(
                        "{}: no position for {} ticks",
                        STEP_NAME,
                        self.no_position.count()
                    );
                    return StepResult::Fail(self.finish_failed(NavFailure::NoPosition));
                }
            }
        }

        if minimap.enemy_alert() {
            info!("Enemy lock on the minimap");
            self.hand_off_combat().await;
            return StepResult::Retry;
        }

        let Some(fix) = found else {
            return StepResult::Retry;
        };
        let pos = fix.center();
        self.no_position.hit();
        self.sprint = self.config.sprint;
        self.clock.record_fix(now);
        self.last_pos = Some(pos);
        self.relaxed_line = false;
        if self.route_start.is_none() {
            self.route_start = Some(pos);
        }

        let remaining = pos.distance(&self.target);
        if remaining < self.config.arrival_threshold {
            if self.config.stop_on_arrival {
                self.services.input.stop_moving();
                self.clock.stop_moving(now);
            }
            self.state = NavState::Arrived;
            info!(
                "{}: arrived at ({:.1}, {:.1})",
                STEP_NAME, pos.x, pos.y
            );
            return StepResult::Success(pos);
        }

        let turn = self
            .last_heading
            .map(|h| turn_between(h, pos.bearing_to(&self.target)))
            .unwrap_or(0.0);
        debug!(
            "At ({:.1}, {:.1}), {:.1} px to go, turn {:.1}°",
            pos.x, pos.y, remaining, turn
        );
        self.services
            .input
            .move_towards(self.target, turn, self.sprint);
        self.clock.start_moving(now);
        self.stuck.record(pos, now);
        StepResult::Retry
    }

    fn locate_request(&self, now: std::time::Instant) -> LocateRequest {
        let is_moving = self.clock.is_moving();
        let elapsed_move_seconds = self.clock.continuous_move_secs(now);
        let Some(last) = self.last_pos else {
            return LocateRequest {
                search_rect: None,
                is_moving,
                elapsed_move_seconds,
                verify: None,
            };
        };

        let travel = self.clock.elapsed_since_fix(now).as_secs_f64();
        let max_distance =
            (self.config.speed(self.sprint) * travel).max(self.config.min_max_distance);
        let tolerance = if self.relaxed_line {
            self.config.max_line_distance * 2.0
        } else {
            self.config.max_line_distance
        };
        let line = self.route_start.map(|p1| LineConstraint {
            p1,
            p2: self.target,
            max_line_distance: tolerance,
        });
        let reach = max_distance * DISTANCE_SLACK + self.config.search_margin;
        LocateRequest {
            search_rect: Some(Rect::around(last, reach)),
            is_moving,
            elapsed_move_seconds,
            verify: Some(VerifyPosInfo {
                last_pos: last,
                max_distance,
                line,
            }),
        }
    }

    /// Kick off the attack detector, or collect its verdict once finished.
    /// Never waits for it.
    fn poll_attack(&mut self, frame: &RgbaImage) -> Option<f64> {
        if !self.config.attack_check {
            return None;
        }
        let detector = Arc::clone(self.services.attack.as_ref()?);
        if self
            .attack_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return None;
        }

        let finished = self.attack_task.take();
        let frame = frame.clone();
        self.attack_task = Some(tokio::task::spawn_blocking(move || {
            detector.attack_direction(&frame)
        }));

        match finished?.now_or_never()? {
            Ok(direction) => direction,
            Err(e) => {
                warn!("Attack detector failed: {}", e);
                None
            }
        }
    }

    async fn hand_off_combat(&mut self) {
        self.state = NavState::AttackHandoff;
        let now = self.services.clock.now();
        self.services.input.stop_moving();
        self.clock.stop_moving(now);

        match self.services.combat.enter_combat().await {
            Ok(report) => {
                info!(
                    "Combat over ({}), busy for {:?}",
                    if report.success { "won" } else { "lost" },
                    report.active
                );
                let now = self.services.clock.now();
                self.clock.add_battle_time(report.active, now);
                self.stuck.shift(report.active);
                self.stuck.reset_window();
            }
            Err(e) => warn!("Combat handoff failed: {:#}", e),
        }
        self.relaxed_line = true;
    }

    /// Escalating escape: 1 backs off with a skill, 2 strafes right, 3 strafes
    /// left with a skill.
    async fn unstuck(&mut self, level: u32) {
        info!("{}: stuck, maneuver level {}", STEP_NAME, level);
        let input = Arc::clone(&self.services.input);
        input.stop_moving();

        let (turn, skill) = match level {
            1 => (180.0, true),
            2 => (90.0, false),
            _ => (-90.0, true),
        };
        if skill {
            input.use_skill();
        }
        let heading = self.last_heading.unwrap_or(0.0);
        let aim = normalize_degrees(heading + turn).to_radians();
        let here = self.last_pos.unwrap_or(self.target);
        let d = self.config.unstuck_distance;
        let goal = here.offset(aim.sin() * d, -aim.cos() * d);
        input.move_towards(goal, turn, false);
        tokio::time::sleep(self.config.unstuck_step()).await;
        input.stop_moving();

        let now = self.services.clock.now();
        self.clock.stop_moving(now);
        self.relaxed_line = true;
    }

    async fn wait_while_paused(&mut self) {
        if !*self.pause.borrow() {
            return;
        }
        info!("{}: paused", STEP_NAME);
        self.services.input.stop_moving();
        self.clock.pause(self.services.clock.now());

        loop {
            let paused = *self.pause.borrow_and_update();
            if !paused || self.cancelled() {
                break;
            }
            tokio::select! {
                changed = self.pause.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.tick_interval()) => {}
            }
        }

        let paused = self.clock.resume(self.services.clock.now());
        self.stuck.shift(paused);
        info!("{}: resumed after {:?}", STEP_NAME, paused);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn finish_failed(&mut self, reason: NavFailure) -> NavFailure {
        self.state = NavState::Failed;
        self.services.input.stop_moving();
        self.clock.stop_moving(self.services.clock.now());
        if let Some(task) = self.attack_task.take() {
            task.abort();
        }
        warn!("{} failed: {}", STEP_NAME, reason);
        reason
    }
}
