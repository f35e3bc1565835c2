use axum::{extract::Request, extract::State, middleware::Next, response::Response};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    extractions_submitted: AtomicUsize,
    snapshots_saved: AtomicUsize,
    snapshot_failures: AtomicUsize,

    // Timing (in microseconds)
    total_request_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            extractions_submitted: AtomicUsize::new(0),
            snapshots_saved: AtomicUsize::new(0),
            snapshot_failures: AtomicUsize::new(0),
            total_request_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_request(&self, success: bool, duration: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.total_request_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_extraction_submitted(&self) {
        self.extractions_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self, saved: bool) {
        if saved {
            self.snapshots_saved.fetch_add(1, Ordering::Relaxed);
        } else {
            self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_us = self.total_request_time_us.load(Ordering::Relaxed) as f64;
        MetricsSnapshot {
            total_requests,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_request_time_ms: if total_requests > 0 {
                total_us / total_requests as f64 / 1000.0 // Convert to ms
            } else {
                0.0
            },
            extractions_submitted: self.extractions_submitted.load(Ordering::Relaxed),
            snapshots_saved: self.snapshots_saved.load(Ordering::Relaxed),
            snapshot_failures: self.snapshot_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub avg_request_time_ms: f64,
    pub extractions_submitted: usize,
    pub snapshots_saved: usize,
    pub snapshot_failures: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Counts every request and its latency. Server errors count as failures.
pub async fn track(State(metrics): State<Arc<Metrics>>, request: Request, next: Next) -> Response {
    let timer = TimedOperation::start();
    let response = next.run(request).await;
    metrics.record_request(!response.status().is_server_error(), timer.elapsed());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().avg_request_time_ms, 0.0);

        metrics.record_request(true, Duration::from_millis(4));
        metrics.record_request(false, Duration::from_millis(2));
        metrics.record_snapshot(true);

        let snap = metrics.snapshot();
        assert_eq!(
            (snap.total_requests, snap.successful_requests, snap.failed_requests),
            (2, 1, 1)
        );
        assert!((snap.avg_request_time_ms - 3.0).abs() < 1e-9);
        assert_eq!(snap.snapshots_saved, 1);
    }
}
