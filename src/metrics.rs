use metrics::{register_counter, register_histogram, Counter, Histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Capture counters.
///
/// Every event is forwarded to the `metrics` facade (a no-op until a recorder
/// is installed) and mirrored in local atomics for the end-of-run summary.
pub struct Metrics {
    captures_succeeded: Counter,
    captures_failed: Counter,
    blank_retries: Counter,
    capture_duration: Histogram,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            captures_succeeded: register_counter!("screenshooter_captures_succeeded_total"),
            captures_failed: register_counter!("screenshooter_captures_failed_total"),
            blank_retries: register_counter!("screenshooter_blank_retries_total"),
            capture_duration: register_histogram!("screenshooter_capture_duration_seconds"),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    pub fn record_capture(&self, duration: Duration, success: bool) {
        if success {
            self.captures_succeeded.increment(1);
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.captures_failed.increment(1);
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        self.capture_duration.record(duration.as_secs_f64());
    }

    pub fn record_retry(&self) {
        self.blank_retries.increment(1);
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            captures_succeeded: self.succeeded.load(Ordering::Relaxed),
            captures_failed: self.failed.load(Ordering::Relaxed),
            blank_retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub captures_succeeded: u64,
    pub captures_failed: u64,
    pub blank_retries: u64,
}
