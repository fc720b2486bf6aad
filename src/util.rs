//! Miscellaneous utility structs and functions.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The default width of the window used to measure flow rates, in s.
const DEFAULT_RATE_WINDOW: f64 = 60.0; // s

/// Measures the rate of discrete events (vehicles passing a boundary)
/// over a sliding time window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateMeter {
    /// The width of the window in s.
    window: f64,
    /// The times of the events still inside the window.
    events: VecDeque<f64>,
    /// The total number of events recorded.
    total: usize,
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW)
    }
}

impl RateMeter {
    /// Creates a rate meter with the given window width in seconds.
    pub fn new(window: f64) -> Self {
        Self {
            window: window.max(f64::EPSILON),
            events: VecDeque::new(),
            total: 0,
        }
    }

    /// Records an event at time `now`.
    pub fn record(&mut self, now: f64) {
        self.events.push_back(now);
        self.total += 1;
        self.expire(now);
    }

    /// Drops events which have left the window.
    pub fn expire(&mut self, now: f64) {
        while let Some(&t) = self.events.front() {
            if now - t > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// The measured rate in events per hour.
    pub fn rate_per_hour(&self) -> f64 {
        3600.0 * self.events.len() as f64 / self.window
    }

    /// The total number of events ever recorded.
    pub fn total(&self) -> usize {
        self.total
    }
}

/// Iterates over `0..count`, starting from `start` and wrapping around.
pub fn rotated_range(count: usize, start: usize) -> impl Iterator<Item = usize> {
    (0..count)
        .map(move |i| i + start % count.max(1))
        .map(move |i| if i >= count { i - count } else { i })
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn rotated() {
        assert_eq!(rotated_range(4, 2).collect::<Vec<_>>(), vec![2, 3, 0, 1]);
        assert_eq!(rotated_range(3, 5).collect::<Vec<_>>(), vec![2, 0, 1]);
        assert_eq!(rotated_range(0, 1).count(), 0);
    }

    #[test]
    fn rate_meter_window() {
        let mut meter = RateMeter::new(10.0);
        for i in 0..5 {
            meter.record(i as f64);
        }
        assert_approx_eq!(meter.rate_per_hour(), 1800.0);

        meter.expire(12.5);
        // Events at t = 3 and t = 4 remain
        assert_approx_eq!(meter.rate_per_hour(), 720.0);
        assert_eq!(meter.total(), 5);
    }
}
