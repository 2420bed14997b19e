use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Instantaneous speed is only recomputed once this much time has passed
/// since the previous computation; shorter windows would just amplify jitter.
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Read model handed to whatever is displaying progress.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub downloaded: u64,
    pub total: u64,
    /// Bytes per second over the most recent sample window.
    pub speed: f64,
    pub elapsed_secs: f64,
    /// Bytes per second since the job started.
    pub average_speed: f64,
}

struct SpeedWindow {
    sampled_at: Instant,
    sampled_bytes: u64,
    speed: f64,
}

/// Accumulates bytes received across all segment workers.
///
/// `record_chunk` is the only write path and is a single atomic add, so any
/// number of workers can report concurrently without losing updates. The
/// total is monotonically non-decreasing for the lifetime of one job; a new
/// job gets a fresh aggregator.
pub struct ProgressAggregator {
    downloaded: AtomicU64,
    total: AtomicU64,
    started_at: Instant,
    window: Mutex<SpeedWindow>,
    min_sample_interval: Duration,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::with_sample_interval(MIN_SAMPLE_INTERVAL)
    }

    pub fn with_sample_interval(min_sample_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            downloaded: AtomicU64::new(0),
            total: AtomicU64::new(0),
            started_at: now,
            window: Mutex::new(SpeedWindow {
                sampled_at: now,
                sampled_bytes: 0,
                speed: 0.0,
            }),
            min_sample_interval,
        }
    }

    /// Records one received chunk. Called by workers, once per chunk.
    pub fn record_chunk(&self, len: u64) {
        self.downloaded.fetch_add(len, Ordering::Relaxed);
    }

    /// Set once the probe has learned the file size.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Takes a snapshot for display.
    ///
    /// The instantaneous speed is refreshed only when the minimum interval
    /// has elapsed since the last refresh; otherwise the previous value is
    /// returned unchanged. The average is recomputed on every call.
    pub fn sample(&self) -> ProgressSnapshot {
        let downloaded = self.downloaded();
        let now = Instant::now();
        let elapsed = now.duration_since(self.started_at);

        let speed = {
            let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
            let delta = now.duration_since(window.sampled_at);
            if delta >= self.min_sample_interval && !delta.is_zero() {
                window.speed =
                    (downloaded - window.sampled_bytes) as f64 / delta.as_secs_f64();
                window.sampled_at = now;
                window.sampled_bytes = downloaded;
            }
            window.speed
        };

        let average_speed = if elapsed.is_zero() {
            0.0
        } else {
            downloaded as f64 / elapsed.as_secs_f64()
        };

        ProgressSnapshot {
            downloaded,
            total: self.total.load(Ordering::Relaxed),
            speed,
            elapsed_secs: elapsed.as_secs_f64(),
            average_speed,
        }
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_record_chunk_loses_nothing() {
        let aggregator = Arc::new(ProgressAggregator::new());
        let mut handles = Vec::new();

        for worker in 0..8u64 {
            let aggregator = aggregator.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    aggregator.record_chunk(worker + 1);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 1000 * (1 + 2 + ... + 8)
        assert_eq!(aggregator.downloaded(), 1000 * 36);
        assert_eq!(aggregator.sample().downloaded, 1000 * 36);
    }

    #[test]
    fn test_speed_retained_inside_sample_interval() {
        let aggregator = ProgressAggregator::with_sample_interval(Duration::from_secs(3600));
        aggregator.record_chunk(4096);
        let first = aggregator.sample();
        aggregator.record_chunk(4096);
        let second = aggregator.sample();

        // The window never elapses, so the initial value sticks.
        assert_eq!(first.speed, 0.0);
        assert_eq!(second.speed, 0.0);
        assert_eq!(second.downloaded, 8192);
    }

    #[test]
    fn test_speed_recomputed_after_interval() {
        let aggregator = ProgressAggregator::with_sample_interval(Duration::from_millis(10));
        aggregator.record_chunk(10_000);
        std::thread::sleep(Duration::from_millis(25));
        let snapshot = aggregator.sample();

        assert!(snapshot.speed > 0.0);
        assert!(snapshot.average_speed > 0.0);
        assert!(snapshot.elapsed_secs > 0.0);
    }

    #[test]
    fn test_total_flows_through_snapshot() {
        let aggregator = ProgressAggregator::new();
        aggregator.set_total(1_000_000);
        assert_eq!(aggregator.sample().total, 1_000_000);
    }
}
