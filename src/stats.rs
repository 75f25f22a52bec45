//! Transfer statistics gathered while a download runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Summary of a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStats {
    /// Total size of the resource in bytes.
    pub size: u64,
    /// Time from the first fetch to the end of the merge.
    pub elapsed: Duration,
    /// Average download speed in bytes per second.
    pub average_speed: u64,
    /// Peak aggregate speed seen by the progress aggregator, in bytes per second.
    pub peak_speed: u64,
    /// Time to reach 80% of peak speed (ramp-up time).
    pub ramp_up_time: Option<Duration>,
}

/// Tracks speed figures for one download. Updated from the progress aggregator.
#[derive(Debug)]
pub struct TransferTracker {
    start_time: Instant,
    total_bytes: u64,
    peak_speed: AtomicU64,
    time_to_80pct_ms: AtomicU64,
}

impl TransferTracker {
    /// Creates a tracker for a resource of `total_bytes`.
    #[must_use]
    pub fn new(total_bytes: u64) -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes,
            peak_speed: AtomicU64::new(0),
            time_to_80pct_ms: AtomicU64::new(0),
        }
    }

    /// Records one aggregate speed sample (bytes/sec).
    pub fn update_speed(&self, speed: u64) {
        let prev_peak = self.peak_speed.fetch_max(speed, Ordering::Relaxed);
        let peak = prev_peak.max(speed);

        if speed > 0
            && self.time_to_80pct_ms.load(Ordering::Relaxed) == 0
            && speed >= peak * 4 / 5
        {
            let ms = self
                .start_time
                .elapsed()
                .as_millis()
                .try_into()
                .unwrap_or(u64::MAX);
            self.time_to_80pct_ms.store(ms.max(1), Ordering::Relaxed);
        }
    }

    /// Elapsed time since the tracker was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Peak speed recorded so far.
    #[must_use]
    pub fn peak_speed(&self) -> u64 {
        self.peak_speed.load(Ordering::Relaxed)
    }

    /// Time to reach 80% of peak speed, if a non-zero speed was recorded.
    #[must_use]
    pub fn time_to_80pct(&self) -> Option<Duration> {
        match self.time_to_80pct_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Freezes the tracker into final statistics.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn finish(&self) -> TransferStats {
        let elapsed = self.elapsed();
        let secs = elapsed.as_secs_f64();
        let average_speed = if secs > 0.0 {
            (self.total_bytes as f64 / secs) as u64
        } else {
            0
        };
        TransferStats {
            size: self.total_bytes,
            elapsed,
            average_speed,
            peak_speed: self.peak_speed(),
            ramp_up_time: self.time_to_80pct(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_speed_is_a_high_water_mark() {
        let tracker = TransferTracker::new(1000);
        tracker.update_speed(100);
        tracker.update_speed(500);
        tracker.update_speed(300);
        assert_eq!(tracker.peak_speed(), 500);
    }

    #[test]
    fn ramp_up_recorded_once_speed_nears_peak() {
        let tracker = TransferTracker::new(1000);
        tracker.update_speed(0);
        assert!(tracker.time_to_80pct().is_none());
        std::thread::sleep(Duration::from_millis(2));
        tracker.update_speed(500);
        assert!(tracker.time_to_80pct().is_some());
    }

    #[test]
    fn finish_reports_size_and_peak() {
        let tracker = TransferTracker::new(4096);
        tracker.update_speed(2048);
        std::thread::sleep(Duration::from_millis(2));
        let stats = tracker.finish();
        assert_eq!(stats.size, 4096);
        assert_eq!(stats.peak_speed, 2048);
        assert!(stats.elapsed > Duration::ZERO);
        assert!(stats.average_speed > 0);
    }
}
