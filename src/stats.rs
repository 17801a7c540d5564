//! Transfer state and throughput tracking.

use std::time::{Duration, Instant};

/// Mutable progress of a transfer, owned by its worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferState {
    /// Bytes present in the destination file.
    pub bytes_downloaded: u64,
    /// Full size of the file once the server has reported it.
    pub total_bytes: Option<u64>,
    /// Current attempt, starting at 1.
    pub attempt: u32,
}

impl TransferState {
    /// Creates an empty state before the first attempt.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes_downloaded: 0,
            total_bytes: None,
            attempt: 0,
        }
    }

    /// Records the total size unless it is already known.
    pub const fn learn_total(&mut self, total: u64) {
        if self.total_bytes.is_none() {
            self.total_bytes = Some(total);
        }
    }

    /// Forgets all progress, as after a corrupted download is discarded.
    pub const fn reset(&mut self) {
        self.bytes_downloaded = 0;
        self.total_bytes = None;
    }

    /// Whole-number completion, `None` while the total is unknown or zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn percentage(&self) -> Option<u8> {
        let total = self.total_bytes.filter(|&t| t > 0)?;
        let pct = u128::from(self.bytes_downloaded) * 100 / u128::from(total);
        Some(pct.min(100) as u8)
    }

    /// Returns true when the total is known and not yet reached.
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.total_bytes
            .is_some_and(|total| self.bytes_downloaded < total)
    }
}

/// Short-window throughput meter.
///
/// Bytes accumulate until `interval` has elapsed since the window opened,
/// then the window yields a rate and starts over.
#[derive(Debug)]
pub struct SpeedWindow {
    interval: Duration,
    window_start: Instant,
    window_bytes: u64,
}

impl SpeedWindow {
    /// Creates a meter whose window opens now.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: Instant::now(),
            window_bytes: 0,
        }
    }

    /// Adds `bytes` and returns a rate in bytes/second if the window is due.
    pub fn record(&mut self, bytes: u64) -> Option<f64> {
        self.record_at(bytes, Instant::now())
    }

    /// Same as [`record`](Self::record) with an explicit clock reading.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_at(&mut self, bytes: u64, now: Instant) -> Option<f64> {
        self.window_bytes += bytes;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            self.window_bytes as f64 / secs
        } else {
            0.0
        };
        self.window_start = now;
        self.window_bytes = 0;
        Some(rate)
    }
}

/// Summary of a finished transfer.
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// Final file size in bytes.
    pub size: u64,
    /// Bytes received over the network during this run.
    pub received: u64,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

impl TransferStats {
    /// Average network throughput in bytes per second.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.received as f64 / secs) as u64
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_floors() {
        let state = TransferState {
            bytes_downloaded: 999,
            total_bytes: Some(1000),
            attempt: 1,
        };
        assert_eq!(state.percentage(), Some(99));
    }

    #[test]
    fn percentage_unknown_or_zero_total() {
        let mut state = TransferState::new();
        state.bytes_downloaded = 10;
        assert_eq!(state.percentage(), None);
        state.total_bytes = Some(0);
        assert_eq!(state.percentage(), None);
    }

    #[test]
    fn percentage_caps_at_hundred() {
        let state = TransferState {
            bytes_downloaded: 2000,
            total_bytes: Some(1000),
            attempt: 1,
        };
        assert_eq!(state.percentage(), Some(100));
    }

    #[test]
    fn total_is_learned_once() {
        let mut state = TransferState::new();
        state.learn_total(500);
        state.learn_total(900);
        assert_eq!(state.total_bytes, Some(500));
        state.reset();
        assert_eq!(state.total_bytes, None);
        state.learn_total(900);
        assert_eq!(state.total_bytes, Some(900));
    }

    #[test]
    fn short_transfer_detection() {
        let mut state = TransferState::new();
        state.bytes_downloaded = 10;
        assert!(!state.is_short());
        state.total_bytes = Some(20);
        assert!(state.is_short());
        state.bytes_downloaded = 20;
        assert!(!state.is_short());
    }

    #[test]
    fn speed_window_waits_for_interval() {
        let mut window = SpeedWindow::new(Duration::from_millis(500));
        let start = window.window_start;
        assert_eq!(window.record_at(1000, start + Duration::from_millis(100)), None);
        let rate = window
            .record_at(1000, start + Duration::from_millis(500))
            .unwrap();
        assert!((rate - 4000.0).abs() < f64::EPSILON);
        // Window was reset.
        assert_eq!(window.record_at(10, start + Duration::from_millis(600)), None);
    }

    #[test]
    fn speed_window_zero_interval_fires_every_time() {
        let mut window = SpeedWindow::new(Duration::ZERO);
        let start = window.window_start;
        assert_eq!(window.record_at(5, start), Some(0.0));
        assert!(window.record_at(5, start + Duration::from_secs(1)).is_some());
    }

    #[test]
    fn average_speed() {
        let stats = TransferStats {
            size: 2000,
            received: 1000,
            elapsed: Duration::from_secs(2),
            attempts: 1,
        };
        assert_eq!(stats.average_speed(), 500);
    }
}
