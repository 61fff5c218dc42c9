/*!
Smoothed packet and error rates.

Counters accumulate on every decoder call, but the rates are only recomputed
once more than [`RATE_WINDOW`](crate::protocol::RATE_WINDOW) has elapsed
since the current window opened. That keeps the displayed rates stable while
the decoder is polled many times per second.
*/

use crate::protocol::{RATE_GAIN, RATE_RETAIN, RATE_WINDOW};
use std::time::Instant;

/// Exponentially weighted packets/s and error-bytes/s
#[derive(Debug, Clone, Default)]
pub struct RateTracker {
    packet_rate: f64,
    error_rate: f64,
    packet_count: u64,
    error_count: u64,
    window_start: Option<Instant>,
}

impl RateTracker {
    /// Create a tracker with zero rates and no open window
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call's counters against the wall clock
    pub fn tick(&mut self, packets: u64, errors: u64) {
        self.tick_at(Instant::now(), packets, errors);
    }

    /// Record one call's counters at an explicit instant.
    ///
    /// The first call only opens the window. Later calls fold the window into
    /// the rates once it is longer than one second:
    /// `rate = rate * 0.3 + (count / elapsed) * 0.7`.
    pub fn tick_at(&mut self, now: Instant, packets: u64, errors: u64) {
        self.packet_count += packets;
        self.error_count += errors;

        let Some(window_start) = self.window_start else {
            self.window_start = Some(now);
            return;
        };

        let elapsed = now.saturating_duration_since(window_start);
        if elapsed <= RATE_WINDOW {
            return;
        }

        let seconds = elapsed.as_secs_f64();
        self.packet_rate = smooth(self.packet_rate, self.packet_count as f64 / seconds);
        self.error_rate = smooth(self.error_rate, self.error_count as f64 / seconds);
        self.packet_count = 0;
        self.error_count = 0;
        self.window_start = Some(now);
    }

    /// Smoothed frames per second
    pub fn packet_rate(&self) -> f64 {
        self.packet_rate
    }

    /// Smoothed discarded bytes per second
    pub fn error_byte_rate(&self) -> f64 {
        self.error_rate
    }

    /// Discarded bytes per second expressed in frame-equivalents, floored
    pub fn error_rate(&self, frame_size: usize) -> f64 {
        if frame_size == 0 {
            return 0.0;
        }
        (self.error_rate / frame_size as f64).floor()
    }

    /// Frames counted in the current window
    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    /// Error bytes counted in the current window
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Start of the current window, `None` before the first tick
    pub fn window_start(&self) -> Option<Instant> {
        self.window_start
    }
}

fn smooth(previous: f64, measured: f64) -> f64 {
    previous * RATE_RETAIN + measured * RATE_GAIN
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_tick_only_opens_window() {
        let mut tracker = RateTracker::new();
        let t0 = Instant::now();

        tracker.tick_at(t0, 50, 7);

        assert_eq!(tracker.packet_rate(), 0.0);
        assert_eq!(tracker.error_byte_rate(), 0.0);
        assert_eq!(tracker.window_start(), Some(t0));
        // counters from the opening call stay in the window
        assert_eq!(tracker.packet_count(), 50);
        assert_eq!(tracker.error_count(), 7);
    }

    #[test]
    fn test_smoothing_after_two_seconds() {
        let mut tracker = RateTracker::new();
        let t0 = Instant::now();

        tracker.tick_at(t0, 0, 0);
        tracker.tick_at(t0 + Duration::from_secs(2), 20, 0);
        assert!((tracker.packet_rate() - 7.0).abs() < 1e-9);

        tracker.tick_at(t0 + Duration::from_secs(4), 20, 0);
        assert!((tracker.packet_rate() - (7.0 * 0.3 + 10.0 * 0.7)).abs() < 1e-9);
    }

    #[test]
    fn test_no_update_within_window() {
        let mut tracker = RateTracker::new();
        let t0 = Instant::now();

        tracker.tick_at(t0, 0, 0);
        tracker.tick_at(t0 + Duration::from_millis(500), 10, 3);
        tracker.tick_at(t0 + Duration::from_secs(1), 10, 3);

        assert_eq!(tracker.packet_rate(), 0.0);
        assert_eq!(tracker.packet_count(), 20);
        assert_eq!(tracker.error_count(), 6);
        assert_eq!(tracker.window_start(), Some(t0));
    }

    #[test]
    fn test_window_resets_counters() {
        let mut tracker = RateTracker::new();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(1500);

        tracker.tick_at(t0, 0, 0);
        tracker.tick_at(t1, 30, 15);

        assert_eq!(tracker.packet_count(), 0);
        assert_eq!(tracker.error_count(), 0);
        assert_eq!(tracker.window_start(), Some(t1));
        assert!((tracker.packet_rate() - 14.0).abs() < 1e-9);
        assert!((tracker.error_byte_rate() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_rate_normalized_per_frame() {
        let mut tracker = RateTracker::new();
        let t0 = Instant::now();

        tracker.tick_at(t0, 0, 0);
        tracker.tick_at(t0 + Duration::from_secs(2), 0, 420);

        // 210 bytes/s * 0.7 = 147 bytes/s
        assert!((tracker.error_byte_rate() - 147.0).abs() < 1e-9);
        assert_eq!(tracker.error_rate(14), 10.0);
        assert_eq!(tracker.error_rate(30), 4.0);
        assert_eq!(tracker.error_rate(0), 0.0);
    }
}
