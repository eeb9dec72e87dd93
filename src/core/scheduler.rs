//! Dual-cadence scheduling for routine reports and inference cycles.
//!
//! The scheduler is polled once per ingested sample. It keeps no timers; both
//! cadences compare the current time against the time they last fired.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Source of "now" for the ingestion loop.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Work due on the current sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledAction {
    RoutineReport,
    Inference,
}

/// Outcome of one scheduler poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tick {
    pub routine: bool,
    pub inference: bool,
}

impl Tick {
    /// Due actions in execution order: the routine report always precedes
    /// the inference cycle.
    pub fn actions(&self) -> impl Iterator<Item = ScheduledAction> {
        let routine = self.routine.then_some(ScheduledAction::RoutineReport);
        let inference = self.inference.then_some(ScheduledAction::Inference);
        routine.into_iter().chain(inference)
    }

    pub fn is_idle(&self) -> bool {
        !self.routine && !self.inference
    }
}

/// Decides when routine reports and inference cycles fire.
#[derive(Debug, Clone)]
pub struct InferenceScheduler {
    routine_interval: Duration,
    step: Duration,
    last_routine: Option<DateTime<Utc>>,
    last_inference: Option<DateTime<Utc>>,
}

impl InferenceScheduler {
    pub fn new(routine_interval: Duration, step: Duration) -> Self {
        Self {
            routine_interval,
            step,
            last_routine: None,
            last_inference: None,
        }
    }

    /// Poll both cadences for a sample arriving at `now`.
    ///
    /// A cadence that fires records `now` as its last firing time. The
    /// inference cadence only fires when `window_full` is set.
    pub fn poll(&mut self, now: DateTime<Utc>, window_full: bool) -> Tick {
        let routine = is_due(self.last_routine, now, self.routine_interval);
        if routine {
            self.last_routine = Some(now);
        }

        let inference = window_full && is_due(self.last_inference, now, self.step);
        if inference {
            self.last_inference = Some(now);
        }

        Tick { routine, inference }
    }

    pub fn last_routine(&self) -> Option<DateTime<Utc>> {
        self.last_routine
    }

    pub fn last_inference(&self) -> Option<DateTime<Utc>> {
        self.last_inference
    }
}

/// A cadence that never fired is due immediately. A clock running backwards
/// yields a negative elapsed time, which is never due.
fn is_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    match last {
        None => true,
        Some(last) => (now - last)
            .to_std()
            .map(|elapsed| elapsed >= interval)
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn scheduler() -> InferenceScheduler {
        InferenceScheduler::new(Duration::from_secs(15), Duration::from_secs(2))
    }

    #[test]
    fn test_first_poll_fires_routine() {
        let mut s = scheduler();
        let tick = s.poll(at(0), false);
        assert!(tick.routine);
        assert!(!tick.inference);
        assert_eq!(s.last_routine(), Some(at(0)));
    }

    #[test]
    fn test_inference_waits_for_full_window() {
        let mut s = scheduler();
        assert!(!s.poll(at(0), false).inference);
        assert!(!s.poll(at(5_000), false).inference);
        assert!(s.poll(at(5_020), true).inference);
        assert_eq!(s.last_inference(), Some(at(5_020)));
    }

    #[test]
    fn test_inference_step_cadence() {
        let mut s = scheduler();
        assert!(s.poll(at(0), true).inference);
        assert!(!s.poll(at(1_999), true).inference);
        assert!(s.poll(at(2_000), true).inference);
        assert!(!s.poll(at(3_000), true).inference);
        assert!(s.poll(at(4_500), true).inference);
    }

    #[test]
    fn test_routine_cadence() {
        let mut s = scheduler();
        assert!(s.poll(at(0), false).routine);
        assert!(!s.poll(at(14_999), false).routine);
        assert!(s.poll(at(15_000), false).routine);
        assert!(!s.poll(at(20_000), false).routine);
    }

    #[test]
    fn test_both_due_routine_first() {
        let mut s = scheduler();
        let tick = s.poll(at(0), true);
        let actions: Vec<_> = tick.actions().collect();
        assert_eq!(
            actions,
            vec![ScheduledAction::RoutineReport, ScheduledAction::Inference]
        );
    }

    #[test]
    fn test_backwards_clock_not_due() {
        let mut s = scheduler();
        s.poll(at(10_000), true);
        let tick = s.poll(at(-60_000), true);
        assert!(tick.is_idle());
    }

    #[test]
    fn test_idle_tick_has_no_actions() {
        assert_eq!(Tick::default().actions().count(), 0);
    }
}
