use std::collections::VecDeque;

use tokio::time::Instant;

use nuptia_core::{UploadPhase, UploadProgress};

/// Sliding window of `(time, bytes_sent)` samples for one file.
///
/// Speed is the average over the samples in the window, so it follows recent
/// behaviour rather than the whole transfer. Reported `bytes_sent` never goes
/// backwards, even when a retry restarts the body from zero.
#[derive(Debug)]
pub struct ProgressWindow {
    samples: VecDeque<(Instant, u64)>,
    capacity: usize,
    total: u64,
    high_water: u64,
}

impl ProgressWindow {
    pub fn new(total: u64, capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total,
            high_water: 0,
        }
    }

    /// Forget speed samples after a failed attempt. The high-water mark is kept.
    pub fn restart(&mut self) {
        self.samples.clear();
    }

    pub fn record(&mut self, now: Instant, bytes_sent: u64, phase: UploadPhase) -> UploadProgress {
        let bytes_sent = bytes_sent.min(self.total);

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((now, bytes_sent));

        let speed = match (self.samples.front(), self.samples.back()) {
            (Some(&(t0, b0)), Some(&(t1, b1))) if t1 > t0 && b1 >= b0 => {
                (b1 - b0) as f64 / (t1 - t0).as_secs_f64()
            }
            _ => 0.0,
        };

        self.high_water = self.high_water.max(bytes_sent);
        let reported = self.high_water;
        let remaining = self.total - reported;

        let percentage = if self.total == 0 {
            100.0
        } else {
            reported as f64 / self.total as f64 * 100.0
        };

        let estimated_remaining_seconds = if remaining == 0 {
            Some(0.0)
        } else if speed > 0.0 {
            Some(remaining as f64 / speed)
        } else {
            None
        };

        UploadProgress {
            bytes_sent: reported,
            bytes_total: self.total,
            percentage,
            instantaneous_speed: speed,
            estimated_remaining_seconds,
            phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn speed_follows_the_window() {
        let start = Instant::now();
        let mut window = ProgressWindow::new(10_000, 3);

        window.record(start, 0, UploadPhase::Transferring);
        window.record(start + Duration::from_secs(1), 1000, UploadPhase::Transferring);
        let progress =
            window.record(start + Duration::from_secs(2), 2000, UploadPhase::Transferring);
        assert!((progress.instantaneous_speed - 1000.0).abs() < 1e-6);
        assert_eq!(progress.estimated_remaining_seconds, Some(8.0));

        // The first sample falls out of the window, so the faster recent rate dominates.
        let progress =
            window.record(start + Duration::from_secs(3), 6000, UploadPhase::Transferring);
        assert!((progress.instantaneous_speed - 2500.0).abs() < 1e-6);
        assert!((progress.percentage - 60.0).abs() < 1e-9);
    }

    #[test]
    fn bytes_sent_is_monotonic_across_restarts() {
        let start = Instant::now();
        let mut window = ProgressWindow::new(1000, 8);
        window.record(start, 600, UploadPhase::Transferring);

        window.restart();
        let progress =
            window.record(start + Duration::from_secs(1), 100, UploadPhase::Transferring);
        assert_eq!(progress.bytes_sent, 600);
        assert_eq!(progress.estimated_remaining_seconds, None);

        let progress =
            window.record(start + Duration::from_secs(2), 1000, UploadPhase::Transferring);
        assert_eq!(progress.bytes_sent, 1000);
        assert_eq!(progress.estimated_remaining_seconds, Some(0.0));
    }

    #[test]
    fn empty_file_is_complete() {
        let mut window = ProgressWindow::new(0, 8);
        let progress = window.record(Instant::now(), 0, UploadPhase::Transferring);
        assert_eq!(progress.percentage, 100.0);
    }
}
