//! Process-wide counters, exposed through `/health`

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_orphaned: AtomicU64,
    artifacts_swept: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_submitted", "Metric incremented");
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_completed", "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "Metric incremented");
    }

    /// A dequeued id whose record had already expired
    pub fn job_orphaned(&self) {
        self.jobs_orphaned.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_orphaned", "Metric incremented");
    }

    pub fn artifacts_swept(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.artifacts_swept.fetch_add(count, Ordering::Relaxed);
        tracing::debug!(counter = "artifacts_swept", count, "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_orphaned: self.jobs_orphaned.load(Ordering::Relaxed),
            artifacts_swept: self.artifacts_swept.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_orphaned: u64,
    pub artifacts_swept: u64,
}
