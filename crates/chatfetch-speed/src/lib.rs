use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_SMOOTHING_WINDOW: usize = 5;

/// Rolling throughput estimator for one transfer. Fed cumulative byte counts
/// as progress updates arrive; retains only samples within a trailing
/// interval of the newest one.
///
/// A decrease in the cumulative count marks a transfer restart. The restart
/// transition is excluded from rate statistics entirely and contributes zero
/// bytes to the average, so a restart can never produce a negative rate.
#[derive(Debug)]
pub struct SpeedTracker {
    interval: Duration,
    smoothing_window: usize,
    samples: VecDeque<Sample>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    bytes: u64,
    at: Instant,
}

/// All speeds in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpeedStats {
    pub avg: f64,
    pub median: f64,
    pub max: f64,
    pub min: f64,
}

impl SpeedTracker {
    pub fn new(interval: Duration) -> Self {
        Self::with_smoothing(interval, DEFAULT_SMOOTHING_WINDOW)
    }

    pub fn with_smoothing(interval: Duration, smoothing_window: usize) -> Self {
        Self {
            interval,
            smoothing_window: smoothing_window.max(1),
            samples: VecDeque::new(),
        }
    }

    /// Record a progress observation. Out-of-order timestamps are ignored.
    pub fn update(&mut self, cumulative_bytes: u64, at: Instant) {
        if let Some(last) = self.samples.back()
            && at < last.at
        {
            return;
        }
        self.samples.push_back(Sample {
            bytes: cumulative_bytes,
            at,
        });
        let newest = at;
        while let Some(front) = self.samples.front() {
            if front.at + self.interval < newest {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn stats(&self) -> SpeedStats {
        if self.samples.len() < 2 {
            return SpeedStats::default();
        }

        let first = self.samples.front().expect("non-empty");
        let last = self.samples.back().expect("non-empty");
        let elapsed = last.at.duration_since(first.at).as_secs_f64();

        let mut progressed = 0u64;
        let mut raw_rates = Vec::with_capacity(self.samples.len() - 1);
        for pair in self.samples.iter().zip(self.samples.iter().skip(1)) {
            let (prev, next) = pair;
            if next.bytes < prev.bytes {
                // Restart boundary: no byte progress, no rate sample.
                continue;
            }
            let delta = next.bytes - prev.bytes;
            progressed += delta;
            let dt = next.at.duration_since(prev.at).as_secs_f64();
            if dt > 0.0 {
                raw_rates.push(delta as f64 / dt);
            }
        }

        let avg = if elapsed > 0.0 {
            progressed as f64 / elapsed
        } else {
            0.0
        };

        let smoothed = self.smooth(&raw_rates);
        let (median, max, min) = summarize(&smoothed);
        SpeedStats {
            avg,
            median,
            max,
            min,
        }
    }

    fn smooth(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .enumerate()
            .map(|(i, _)| {
                let start = (i + 1).saturating_sub(self.smoothing_window);
                let window = &raw[start..=i];
                window.iter().sum::<f64>() / window.len() as f64
            })
            .collect()
    }
}

fn summarize(rates: &[f64]) -> (f64, f64, f64) {
    if rates.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut sorted = rates.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite rates"));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    (median, sorted[sorted.len() - 1], sorted[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(100);

    fn tracker() -> SpeedTracker {
        SpeedTracker::with_smoothing(INTERVAL, 3)
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn initial_state_is_all_zero() {
        let tracker = tracker();
        assert_eq!(tracker.stats(), SpeedStats::default());
    }

    #[test]
    fn single_sample_is_all_zero() {
        let mut tracker = tracker();
        tracker.update(1000, Instant::now());
        assert_eq!(tracker.stats(), SpeedStats::default());
    }

    #[test]
    fn constant_speed_averages_exactly() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(0, t0);
        tracker.update(1000, t0 + secs(10));
        tracker.update(2000, t0 + secs(20));

        let stats = tracker.stats();
        assert!((stats.avg - 100.0).abs() < 1.0, "avg {}", stats.avg);
        assert!((stats.median - 100.0).abs() < 1.0);
    }

    #[test]
    fn pause_counts_toward_elapsed_time() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(1, t0);
        tracker.update(1001, t0 + secs(10));
        // Ten idle seconds, then resume at the old pace.
        tracker.update(1001, t0 + secs(20));
        tracker.update(2001, t0 + secs(30));

        let stats = tracker.stats();
        assert!((stats.avg - 2000.0 / 30.0).abs() < 1.0, "avg {}", stats.avg);
    }

    #[test]
    fn restart_never_yields_negative_stats() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(0, t0);
        tracker.update(1000, t0 + secs(10));
        tracker.update(1, t0 + secs(15));
        tracker.update(501, t0 + secs(20));

        let stats = tracker.stats();
        assert!(stats.avg >= 0.0);
        assert!(stats.min >= 0.0);
        // Progress is 1000 + 500 over 20s; the restart transition adds nothing.
        assert!((stats.avg - 75.0).abs() < 1.0, "avg {}", stats.avg);
        // Both surviving rate samples ran at ~100 B/s.
        assert!(
            (stats.max - 100.0).abs() < 1.0,
            "max should reflect the pre-restart segment, got {}",
            stats.max
        );
    }

    #[test]
    fn smoothing_dampens_single_spikes() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(0, t0);
        tracker.update(500, t0 + secs(5)); // 100 B/s
        tracker.update(2500, t0 + secs(10)); // 400 B/s spike
        tracker.update(3000, t0 + secs(15)); // 100 B/s

        let stats = tracker.stats();
        // Raw max is 400; the smoothed series peaks at mean(100, 400) = 250.
        assert!((stats.max - 250.0).abs() < 1.0, "max {}", stats.max);
        assert!((stats.min - 100.0).abs() < 1.0, "min {}", stats.min);
        assert!((stats.median - 200.0).abs() < 1.0, "median {}", stats.median);
    }

    #[test]
    fn stale_samples_fall_out_of_the_window() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(0, t0);
        tracker.update(1000, t0 + secs(10));
        // Far beyond the retention interval: both earlier samples drop.
        tracker.update(2000, t0 + secs(120));

        assert_eq!(tracker.sample_count(), 1);
        let stats = tracker.stats();
        assert_eq!(stats.avg, 0.0);
        assert_eq!(stats.max, 0.0);
    }

    #[test]
    fn equal_timestamps_contribute_no_rate() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(0, t0);
        tracker.update(100, t0);

        let stats = tracker.stats();
        assert_eq!(stats.avg, 0.0);
        assert_eq!(stats.max, 0.0);
    }

    #[test]
    fn out_of_order_updates_are_ignored() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(0, t0 + secs(10));
        tracker.update(500, t0);
        assert_eq!(tracker.sample_count(), 1);
    }

    #[test]
    fn median_sits_between_extremes() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(0, t0);
        tracker.update(1000, t0 + secs(5)); // 200 B/s
        tracker.update(1500, t0 + secs(10)); // 100 B/s
        tracker.update(3500, t0 + secs(15)); // 400 B/s

        let stats = tracker.stats();
        assert!(stats.median >= stats.min);
        assert!(stats.median <= stats.max);
        assert!(stats.max > 0.0);
    }

    #[test]
    fn large_counts_do_not_overflow() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(0, t0);
        tracker.update(500_000, t0 + secs(5));
        assert!(tracker.stats().avg > 0.0);
    }
}
