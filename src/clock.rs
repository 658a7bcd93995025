//! Fixed-interval timers for the scheduling loop
//!
//! Each periodic concern keeps its own last-fired instant. A timer fires at
//! most once per interval and re-anchors on the instant it fired, so a late
//! pass pushes the next firing back instead of catching up.

use std::time::Duration;
use tokio::time::Instant;

/// Last-fired bookkeeping for one periodic concern
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    interval: Duration,
    last: Instant,
}

impl IntervalTimer {
    /// Timer whose first firing is one interval after `start`
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last: start,
        }
    }

    /// Check and consume the timer
    ///
    /// Returns `true` when at least one interval has elapsed since the last
    /// firing, and records `now` as the new reference.
    pub fn due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }

    /// Restart the interval from `now` without firing
    pub fn reset(&mut self, now: Instant) {
        self.last = now;
    }
}

/// Whole seconds since boot, also the payload timestamp
pub fn uptime_secs(boot: Instant, now: Instant) -> u64 {
    now.saturating_duration_since(boot).as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_per_interval() {
        let start = Instant::now();
        let mut timer = IntervalTimer::new(Duration::from_secs(2), start);

        assert!(!timer.due(start));
        assert!(!timer.due(start + Duration::from_millis(1_999)));
        assert!(timer.due(start + Duration::from_millis(2_000)));
        assert!(!timer.due(start + Duration::from_millis(3_999)));
        assert!(timer.due(start + Duration::from_millis(4_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_pass_does_not_catch_up() {
        let start = Instant::now();
        let mut timer = IntervalTimer::new(Duration::from_secs(2), start);

        // One pass blocked for 5s: fires once, then re-anchors at 5s
        assert!(timer.due(start + Duration::from_secs(5)));
        assert!(!timer.due(start + Duration::from_secs(6)));
        assert!(timer.due(start + Duration::from_secs(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restarts_interval() {
        let start = Instant::now();
        let mut timer = IntervalTimer::new(Duration::from_secs(60), start);

        timer.reset(start + Duration::from_secs(50));
        assert!(!timer.due(start + Duration::from_secs(100)));
        assert!(timer.due(start + Duration::from_secs(110)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime() {
        let boot = Instant::now();
        let now = boot + Duration::from_millis(12_345);
        assert_eq!(uptime_secs(boot, now), 12);
        assert_eq!(uptime_secs(now, boot), 0);
    }
}
