//! CPU ceiling for background work.

use std::time::{Duration, Instant};

/// Work accumulated before the throttle considers sleeping.
pub const WORK_WINDOW: Duration = Duration::from_millis(100);

/// Sleeps between units of work so a thread stays near a CPU percentage.
///
/// Work time is summed across [`start_work`](Self::start_work) /
/// [`end_work`](Self::end_work) pairs. Once a full [`WORK_WINDOW`] has
/// accumulated, the thread sleeps long enough for the window to make up
/// the requested share of wall time.
#[derive(Debug)]
pub struct Throttle {
    target_percent: f64,
    started: Instant,
    accumulated: Duration,
}

impl Throttle {
    /// Throttle to `percent` (clamped to 1..=100).
    pub fn new(percent: f64) -> Self {
        let target_percent = if percent.is_nan() {
            100.0
        } else {
            percent.clamp(1.0, 100.0)
        };
        Self {
            target_percent,
            started: Instant::now(),
            accumulated: Duration::ZERO,
        }
    }

    /// Effective CPU target.
    pub const fn target_percent(&self) -> f64 {
        self.target_percent
    }

    /// Whether the throttle never sleeps.
    pub fn is_unlimited(&self) -> bool {
        self.target_percent >= 100.0
    }

    /// Mark the start of a unit of work.
    pub fn start_work(&mut self) {
        self.started = Instant::now();
    }

    /// Mark the end of a unit of work, sleeping if a window is complete.
    ///
    /// Returns the time slept.
    pub fn end_work(&mut self) -> Duration {
        self.record(self.started.elapsed())
    }

    /// Add `worked` to the window and sleep if it is full.
    pub fn record(&mut self, worked: Duration) -> Duration {
        self.accumulated += worked;
        if self.accumulated < WORK_WINDOW {
            return Duration::ZERO;
        }
        let pause = self.pause_for(self.accumulated);
        self.accumulated = Duration::ZERO;
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
        self.started = Instant::now();
        pause
    }

    /// Sleep that brings `worked` down to the target share.
    pub fn pause_for(&self, worked: Duration) -> Duration {
        worked.mul_f64(100.0 / self.target_percent - 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_ratio() {
        let half = Throttle::new(50.0);
        assert_eq!(half.pause_for(Duration::from_millis(100)), Duration::from_millis(100));

        let quarter = Throttle::new(25.0);
        assert_eq!(quarter.pause_for(Duration::from_millis(100)), Duration::from_millis(300));

        assert!(Throttle::new(100.0).pause_for(Duration::from_secs(1)).is_zero());
    }

    #[test]
    fn test_clamps_target() {
        assert!((Throttle::new(0.0).target_percent() - 1.0).abs() < f64::EPSILON);
        assert!(Throttle::new(250.0).is_unlimited());
        assert!(Throttle::new(f64::NAN).is_unlimited());
    }

    #[test]
    fn test_sleeps_only_after_full_window() {
        let mut throttle = Throttle::new(90.0);
        assert!(throttle.record(Duration::from_millis(60)).is_zero());
        let slept = throttle.record(Duration::from_millis(60));
        // 120ms of work at 90% -> ~13ms pause
        assert!(slept > Duration::from_millis(10) && slept < Duration::from_millis(20));
        assert!(throttle.record(Duration::from_millis(60)).is_zero());
    }
}
