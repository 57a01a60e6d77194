//! Press-and-hold gesture timer.
//!
//! [`GestureTimer`] turns a press that stays within [`CANCEL_RADIUS_PX`] of
//! where it started into a confirmed selection once [`HOLD_DURATION`] has
//! elapsed. Progress is reported on every [`GestureTimer::tick`], including
//! the three haptic checkpoints at 25 %, 50 % and 75 %.
//!
//! The timer is clock-agnostic: every call takes the current [`Instant`], so
//! callers drive it from a tokio interval and tests drive it with synthetic
//! instants.

use std::time::{Duration, Instant};

use crate::geometry::ScreenPoint;
use crate::types::FeedbackStyle;

/// How long a press must be held before it confirms.
pub const HOLD_DURATION: Duration = Duration::from_secs(2);

/// Interval at which the runtime ticks an active hold.
pub const HOLD_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Pointer travel (in points) from the press origin that cancels the hold.
pub const CANCEL_RADIUS_PX: f64 = 50.0;

/// Identifies one press-and-hold attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId(u64);

impl CandidateId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Progress checkpoints that trigger intermediate feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    Quarter,
    Half,
    ThreeQuarters,
}

impl Checkpoint {
    pub const ALL: [Checkpoint; 3] = [
        Checkpoint::Quarter,
        Checkpoint::Half,
        Checkpoint::ThreeQuarters,
    ];

    /// Fraction of the dwell window at which this checkpoint fires.
    pub fn fraction(self) -> f64 {
        match self {
            Checkpoint::Quarter => 0.25,
            Checkpoint::Half => 0.5,
            Checkpoint::ThreeQuarters => 0.75,
        }
    }

    pub fn feedback(self) -> FeedbackStyle {
        match self {
            Checkpoint::Quarter => FeedbackStyle::Light,
            Checkpoint::Half | Checkpoint::ThreeQuarters => FeedbackStyle::Medium,
        }
    }

    fn index(self) -> usize {
        match self {
            Checkpoint::Quarter => 0,
            Checkpoint::Half => 1,
            Checkpoint::ThreeQuarters => 2,
        }
    }
}

/// Result of one [`GestureTimer::tick`].
#[derive(Debug, Clone, PartialEq)]
pub struct HoldProgress {
    pub id: CandidateId,
    /// Elapsed fraction of the dwell window, clamped to `0.0..=1.0`.
    pub fraction: f64,
    /// Checkpoints crossed since the previous tick, in ascending order.
    pub checkpoints: Vec<Checkpoint>,
    /// Set exactly once per hold, on the tick that confirms it.
    pub completed: bool,
}

impl HoldProgress {
    /// Feedback to emit for this tick, in firing order.
    ///
    /// Checkpoint feedback comes first; the terminal heavy pulse is last.
    pub fn feedback(&self) -> Vec<FeedbackStyle> {
        let mut styles: Vec<FeedbackStyle> =
            self.checkpoints.iter().map(|c| c.feedback()).collect();
        if self.completed {
            styles.push(FeedbackStyle::Heavy);
        }
        styles
    }
}

#[derive(Debug)]
struct ActiveHold {
    id: CandidateId,
    origin: ScreenPoint,
    started_at: Instant,
    fired: [bool; 3],
    /// While closed the hold cannot complete even after the dwell elapses.
    gate_open: bool,
}

/// Tracks at most one press-and-hold at a time.
#[derive(Debug)]
pub struct GestureTimer {
    dwell: Duration,
    cancel_radius: f64,
    next_id: u64,
    active: Option<ActiveHold>,
}

impl Default for GestureTimer {
    fn default() -> Self {
        Self::new(HOLD_DURATION, CANCEL_RADIUS_PX)
    }
}

impl GestureTimer {
    pub fn new(dwell: Duration, cancel_radius: f64) -> Self {
        Self {
            dwell,
            cancel_radius,
            next_id: 1,
            active: None,
        }
    }

    pub fn dwell(&self) -> Duration {
        self.dwell
    }

    /// Start a new hold at `at`. Any previous hold is discarded.
    ///
    /// The completion gate starts open.
    pub fn begin(&mut self, at: ScreenPoint, now: Instant) -> CandidateId {
        let id = CandidateId(self.next_id);
        self.next_id += 1;
        self.active = Some(ActiveHold {
            id,
            origin: at,
            started_at: now,
            fired: [false; 3],
            gate_open: true,
        });
        id
    }

    /// The hold currently in progress, if any.
    pub fn active_id(&self) -> Option<CandidateId> {
        self.active.as_ref().map(|h| h.id)
    }

    /// Open or close the completion gate for `id`. Unknown ids are ignored.
    pub fn set_completion_gate(&mut self, id: CandidateId, open: bool) {
        if let Some(hold) = self.hold_mut(id) {
            hold.gate_open = open;
        }
    }

    /// Elapsed fraction of the dwell window for `id` (0.0 if not active).
    pub fn progress(&self, id: CandidateId, now: Instant) -> f64 {
        self.hold(id)
            .map(|hold| self.fraction(hold, now))
            .unwrap_or(0.0)
    }

    /// Whether `id` has been held for the full dwell and may complete.
    pub fn is_complete(&self, id: CandidateId, now: Instant) -> bool {
        self.hold(id)
            .is_some_and(|hold| hold.gate_open && self.elapsed(hold, now) >= self.dwell)
    }

    /// Advance the active hold.
    ///
    /// Returns `None` when nothing is being held. A completed hold is
    /// released by the tick that reports it, so completion is reported
    /// exactly once.
    pub fn tick(&mut self, now: Instant) -> Option<HoldProgress> {
        let dwell = self.dwell;
        let hold = self.active.as_mut()?;
        let elapsed = now.saturating_duration_since(hold.started_at);
        let fraction = ratio(elapsed, dwell);

        let mut checkpoints = Vec::new();
        for checkpoint in Checkpoint::ALL {
            let slot = &mut hold.fired[checkpoint.index()];
            if !*slot && fraction >= checkpoint.fraction() {
                *slot = true;
                checkpoints.push(checkpoint);
            }
        }

        let completed = hold.gate_open && elapsed >= dwell;
        let id = hold.id;
        if completed {
            self.active = None;
        }

        Some(HoldProgress {
            id,
            fraction,
            checkpoints,
            completed,
        })
    }

    /// Report pointer movement for `id`.
    ///
    /// Returns `true` if the movement took the pointer outside the cancel
    /// radius and the hold was cancelled.
    pub fn pointer_moved(&mut self, id: CandidateId, to: ScreenPoint) -> bool {
        let radius = self.cancel_radius;
        let Some(hold) = self.hold_mut(id) else {
            return false;
        };
        if hold.origin.distance_to(to) > radius {
            self.active = None;
            return true;
        }
        false
    }

    /// Cancel `id`. Returns `true` only for the call that actually cancelled.
    pub fn cancel(&mut self, id: CandidateId) -> bool {
        if self.hold(id).is_some() {
            self.active = None;
            return true;
        }
        false
    }

    fn hold(&self, id: CandidateId) -> Option<&ActiveHold> {
        self.active.as_ref().filter(|h| h.id == id)
    }

    fn hold_mut(&mut self, id: CandidateId) -> Option<&mut ActiveHold> {
        self.active.as_mut().filter(|h| h.id == id)
    }

    fn elapsed(&self, hold: &ActiveHold, now: Instant) -> Duration {
        now.saturating_duration_since(hold.started_at)
    }

    fn fraction(&self, hold: &ActiveHold, now: Instant) -> f64 {
        ratio(self.elapsed(hold, now), self.dwell)
    }
}

fn ratio(elapsed: Duration, dwell: Duration) -> f64 {
    if dwell.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f64() / dwell.as_secs_f64()).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> ScreenPoint {
        ScreenPoint::new(100.0, 100.0)
    }

    /// Tick from `start` in steps of `step` until `until`, collecting results.
    fn run(
        timer: &mut GestureTimer,
        start: Instant,
        step: Duration,
        until: Duration,
    ) -> Vec<HoldProgress> {
        let mut out = Vec::new();
        let mut t = Duration::ZERO;
        while t <= until {
            if let Some(p) = timer.tick(start + t) {
                out.push(p);
            }
            t += step;
        }
        out
    }

    #[test]
    fn not_complete_before_dwell() {
        let mut timer = GestureTimer::default();
        let start = Instant::now();
        let id = timer.begin(origin(), start);

        for ms in [0, 100, 500, 1000, 1999] {
            assert!(!timer.is_complete(id, start + Duration::from_millis(ms)));
        }
        assert!(timer.is_complete(id, start + HOLD_DURATION));
    }

    #[test]
    fn completion_reported_exactly_once() {
        let mut timer = GestureTimer::default();
        let start = Instant::now();
        timer.begin(origin(), start);

        let ticks = run(&mut timer, start, HOLD_TICK_INTERVAL, Duration::from_secs(4));
        let completions = ticks.iter().filter(|p| p.completed).count();
        assert_eq!(completions, 1);
        assert!(timer.active_id().is_none());
    }

    #[test]
    fn completes_on_the_dwell_boundary() {
        let mut timer = GestureTimer::default();
        let start = Instant::now();
        timer.begin(origin(), start);

        let before = timer.tick(start + Duration::from_millis(1999)).unwrap();
        assert!(!before.completed);
        let at = timer.tick(start + HOLD_DURATION).unwrap();
        assert!(at.completed);
        assert_eq!(at.fraction, 1.0);
    }

    #[test]
    fn checkpoints_fire_once_for_any_granularity() {
        for step_ms in [1, 7, 100, 333, 600, 1500, 2500] {
            let mut timer = GestureTimer::default();
            let start = Instant::now();
            timer.begin(origin(), start);

            let ticks = run(
                &mut timer,
                start,
                Duration::from_millis(step_ms),
                Duration::from_secs(3),
            );
            let fired: Vec<Checkpoint> =
                ticks.iter().flat_map(|p| p.checkpoints.clone()).collect();
            assert_eq!(fired, Checkpoint::ALL.to_vec(), "step {step_ms}ms");
        }
    }

    #[test]
    fn repeated_ticks_at_same_instant_do_not_refire() {
        let mut timer = GestureTimer::default();
        let start = Instant::now();
        timer.begin(origin(), start);

        let t = start + Duration::from_millis(600);
        assert_eq!(timer.tick(t).unwrap().checkpoints, vec![Checkpoint::Quarter]);
        assert!(timer.tick(t).unwrap().checkpoints.is_empty());
    }

    #[test]
    fn feedback_orders_checkpoints_before_heavy() {
        let mut timer = GestureTimer::default();
        let start = Instant::now();
        timer.begin(origin(), start);

        let p = timer.tick(start + HOLD_DURATION).unwrap();
        assert_eq!(
            p.feedback(),
            vec![
                FeedbackStyle::Light,
                FeedbackStyle::Medium,
                FeedbackStyle::Medium,
                FeedbackStyle::Heavy,
            ]
        );
    }

    #[test]
    fn movement_beyond_radius_cancels_at_any_progress() {
        for progress_ms in [0, 400, 1000, 1900] {
            let mut timer = GestureTimer::default();
            let start = Instant::now();
            let id = timer.begin(origin(), start);
            timer.tick(start + Duration::from_millis(progress_ms));

            assert!(timer.pointer_moved(id, ScreenPoint::new(151.0, 100.0)));
            assert!(timer.active_id().is_none());
            assert!(timer.tick(start + HOLD_DURATION).is_none());
        }
    }

    #[test]
    fn movement_within_radius_keeps_hold() {
        let mut timer = GestureTimer::default();
        let start = Instant::now();
        let id = timer.begin(origin(), start);

        assert!(!timer.pointer_moved(id, ScreenPoint::new(130.0, 140.0)));
        assert_eq!(timer.active_id(), Some(id));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut timer = GestureTimer::default();
        let start = Instant::now();
        let id = timer.begin(origin(), start);

        assert!(timer.cancel(id));
        assert!(!timer.cancel(id));
        assert!(timer.tick(start + HOLD_DURATION).is_none());
    }

    #[test]
    fn stale_id_cannot_cancel_newer_hold() {
        let mut timer = GestureTimer::default();
        let start = Instant::now();
        let first = timer.begin(origin(), start);
        let second = timer.begin(origin(), start);

        assert!(!timer.cancel(first));
        assert_eq!(timer.active_id(), Some(second));
    }

    #[test]
    fn closed_gate_blocks_completion_until_opened() {
        let mut timer = GestureTimer::default();
        let start = Instant::now();
        let id = timer.begin(origin(), start);
        timer.set_completion_gate(id, false);

        let late = start + Duration::from_secs(5);
        let p = timer.tick(late).unwrap();
        assert!(!p.completed);
        assert_eq!(p.fraction, 1.0);
        assert!(!timer.is_complete(id, late));

        timer.set_completion_gate(id, true);
        let p = timer.tick(late + HOLD_TICK_INTERVAL).unwrap();
        assert!(p.completed);
        assert!(p.checkpoints.is_empty());
    }
}
