//! Delta/rate computation for cumulative counters.

use log::debug;
use std::time::Instant;

/// One observed counter value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<V> {
    pub value: V,
    pub at: Instant,
}

impl<V> Sample<V> {
    pub fn new(value: V, at: Instant) -> Self {
        Self { value, at }
    }
}

/// Two consecutive samples of the same counter
#[derive(Debug, Clone, Copy)]
pub struct DeltaWindow {
    pub previous: Sample<u64>,
    pub current: Sample<u64>,
}

impl DeltaWindow {
    pub fn elapsed_secs(&self) -> f64 {
        self.current
            .at
            .saturating_duration_since(self.previous.at)
            .as_secs_f64()
    }

    /// Change per second divided by `divisor`.
    ///
    /// `None` when no time has passed or the counter went backwards.
    pub fn rate(&self, divisor: f64) -> Option<f64> {
        let elapsed = self.elapsed_secs();
        if elapsed <= 0.0 {
            return None;
        }
        let delta = self.current.value.checked_sub(self.previous.value)?;
        Some(delta as f64 / elapsed / divisor)
    }
}

/// Rate state for a pair of counters (read/write, down/up) read from one
/// of several interchangeable sources.
#[derive(Debug)]
pub struct RateTracker<S> {
    previous: Option<(S, Sample<(u64, u64)>)>,
    last_rate: Option<(f64, f64)>,
    divisor: f64,
}

impl<S: Copy + PartialEq + std::fmt::Debug> RateTracker<S> {
    pub fn new(divisor: f64) -> Self {
        Self {
            previous: None,
            last_rate: None,
            divisor,
        }
    }

    /// Feed a reading and get the rate to report for this tick.
    ///
    /// The first reading, and the first reading after the source changed,
    /// only establish a baseline. A counter that went backwards is
    /// re-baselined immediately and the last valid rate is reported again.
    pub fn observe(&mut self, source: S, value: (u64, u64), at: Instant) -> Option<(f64, f64)> {
        let current = Sample::new(value, at);

        let (prev_source, prev) = match self.previous {
            Some(previous) => previous,
            None => {
                self.previous = Some((source, current));
                return None;
            }
        };

        if prev_source != source {
            debug!("source switched from {:?} to {:?}; re-baselining", prev_source, source);
            self.previous = Some((source, current));
            self.last_rate = None;
            return None;
        }

        let first = DeltaWindow {
            previous: Sample::new(prev.value.0, prev.at),
            current: Sample::new(value.0, at),
        };
        if first.elapsed_secs() <= 0.0 {
            return self.last_rate;
        }
        let second = DeltaWindow {
            previous: Sample::new(prev.value.1, prev.at),
            current: Sample::new(value.1, at),
        };

        self.previous = Some((source, current));

        match (first.rate(self.divisor), second.rate(self.divisor)) {
            (Some(a), Some(b)) => {
                self.last_rate = Some((a, b));
                self.last_rate
            }
            _ => {
                debug!("{:?} counter decreased; holding last rate", source);
                self.last_rate
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Src {
        A,
        B,
    }

    #[test]
    fn window_rate_scales_by_divisor() {
        let t0 = Instant::now();
        let w = DeltaWindow {
            previous: Sample::new(1_000, t0),
            current: Sample::new(3_048, t0 + Duration::from_secs(2)),
        };
        assert_eq!(w.rate(1024.0), Some(1.0));
    }

    #[test]
    fn window_rejects_zero_elapsed_and_decrease() {
        let t0 = Instant::now();
        let same_time = DeltaWindow {
            previous: Sample::new(1, t0),
            current: Sample::new(2, t0),
        };
        assert_eq!(same_time.rate(1.0), None);

        let backwards = DeltaWindow {
            previous: Sample::new(10, t0),
            current: Sample::new(2, t0 + Duration::from_secs(1)),
        };
        assert_eq!(backwards.rate(1.0), None);
    }

    #[test]
    fn first_observation_is_baseline_only() {
        let mut tracker = RateTracker::new(1.0);
        assert_eq!(tracker.observe(Src::A, (100, 100), Instant::now()), None);
    }

    #[test]
    fn consecutive_observations_give_rate() {
        let t0 = Instant::now();
        let mut tracker = RateTracker::new(1.0);
        tracker.observe(Src::A, (100, 200), t0);
        let rate = tracker.observe(Src::A, (300, 260), t0 + Duration::from_millis(500));
        assert_eq!(rate, Some((400.0, 120.0)));
    }

    #[test]
    fn source_switch_rebaselines() {
        let t0 = Instant::now();
        let mut tracker = RateTracker::new(1.0);
        tracker.observe(Src::A, (0, 0), t0);
        assert!(tracker.observe(Src::A, (10, 10), t0 + Duration::from_secs(1)).is_some());
        assert_eq!(tracker.observe(Src::B, (5_000, 5_000), t0 + Duration::from_secs(2)), None);
        assert_eq!(
            tracker.observe(Src::B, (5_010, 5_020), t0 + Duration::from_secs(3)),
            Some((10.0, 20.0))
        );
    }

    #[test]
    fn decrease_holds_last_rate_then_recovers() {
        let t0 = Instant::now();
        let mut tracker = RateTracker::new(1.0);
        tracker.observe(Src::A, (100, 100), t0);
        tracker.observe(Src::A, (110, 120), t0 + Duration::from_secs(1));

        // counter reset
        let held = tracker.observe(Src::A, (5, 5), t0 + Duration::from_secs(2));
        assert_eq!(held, Some((10.0, 20.0)));

        let recovered = tracker.observe(Src::A, (9, 7), t0 + Duration::from_secs(3));
        assert_eq!(recovered, Some((4.0, 2.0)));
    }

    #[test]
    fn decrease_without_history_is_unavailable() {
        let t0 = Instant::now();
        let mut tracker = RateTracker::new(1.0);
        tracker.observe(Src::A, (100, 100), t0);
        assert_eq!(tracker.observe(Src::A, (50, 150), t0 + Duration::from_secs(1)), None);
    }

    #[test]
    fn zero_elapsed_keeps_baseline() {
        let t0 = Instant::now();
        let mut tracker = RateTracker::new(1.0);
        tracker.observe(Src::A, (100, 100), t0);
        assert_eq!(tracker.observe(Src::A, (200, 200), t0), None);
        assert_eq!(
            tracker.observe(Src::A, (300, 300), t0 + Duration::from_secs(1)),
            Some((200.0, 200.0))
        );
    }
}
