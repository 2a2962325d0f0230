//! Process counters, owned by the orchestrator and shared by handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::monitoring::types::CheckStatus;

#[derive(Debug)]
pub struct Metrics {
    started: Instant,
    checks_executed: AtomicU64,
    checks_failed: AtomicU64,
    alerts_sent: AtomicU64,
    active_jobs: AtomicU64,
    jobs_enqueued: AtomicU64,
    enqueue_failures: AtomicU64,
    jobs_dropped: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub checks_executed: u64,
    pub checks_failed: u64,
    pub alerts_sent: u64,
    pub active_jobs: u64,
    pub jobs_enqueued: u64,
    pub enqueue_failures: u64,
    pub jobs_dropped: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            checks_executed: AtomicU64::new(0),
            checks_failed: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
            active_jobs: AtomicU64::new(0),
            jobs_enqueued: AtomicU64::new(0),
            enqueue_failures: AtomicU64::new(0),
            jobs_dropped: AtomicU64::new(0),
        }
    }

    pub fn record_check(&self, status: CheckStatus) {
        self.checks_executed.fetch_add(1, Ordering::Relaxed);
        if status == CheckStatus::Failing {
            self.checks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_alert(&self) {
        self.alerts_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueue(&self) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueue_failure(&self) {
        self.enqueue_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_job(&self) {
        self.jobs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a job as active until the guard is dropped
    pub fn job_started(&self) -> ActiveJob<'_> {
        self.active_jobs.fetch_add(1, Ordering::Relaxed);
        ActiveJob { metrics: self }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            checks_executed: self.checks_executed.load(Ordering::Relaxed),
            checks_failed: self.checks_failed.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
        }
    }
}

pub struct ActiveJob<'a> {
    metrics: &'a Metrics,
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.metrics.active_jobs.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_checks_and_failures() {
        let metrics = Metrics::new();
        metrics.record_check(CheckStatus::Passing);
        metrics.record_check(CheckStatus::Failing);
        metrics.record_check(CheckStatus::Degraded);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.checks_executed, 3);
        assert_eq!(snapshot.checks_failed, 1);
    }

    #[test]
    fn active_jobs_follow_guards() {
        let metrics = Metrics::new();
        {
            let _first = metrics.job_started();
            let _second = metrics.job_started();
            assert_eq!(metrics.snapshot().active_jobs, 2);
        }
        assert_eq!(metrics.snapshot().active_jobs, 0);
    }
}
