use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::database::{CheckStore, StoreError};
use crate::metrics::Metrics;
use crate::queue::{JobQueue, QueueError};

use super::workers::InFlight;

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub poll_interval: Duration,
    pub enqueue_attempts: u32,
    pub enqueue_retry_delay: Duration,
    /// Only discover checks that may run in this region
    pub region: Option<String>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            enqueue_attempts: 3,
            enqueue_retry_delay: Duration::from_secs(1),
            region: None,
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub enqueued: usize,
    pub skipped_in_flight: usize,
    pub enqueue_failed: usize,
}

/// Scheduler - finds due checks on a fixed period and queues them
pub struct Scheduler {
    store: Arc<dyn CheckStore>,
    queue: Arc<dyn JobQueue>,
    in_flight: Option<Arc<InFlight>>,
    metrics: Arc<Metrics>,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn CheckStore>,
        queue: Arc<dyn JobQueue>,
        in_flight: Option<Arc<InFlight>>,
        metrics: Arc<Metrics>,
        options: SchedulerOptions,
    ) -> Self {
        Self { store, queue, in_flight, metrics, options }
    }

    /// Tick until `token` is cancelled. A tick that has started always runs
    /// to completion.
    pub async fn run(&self, token: CancellationToken) {
        let mut timer = interval(self.options.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(poll_interval_secs = self.options.poll_interval.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = timer.tick() => {}
            }

            match self.tick(Utc::now()).await {
                Ok(summary) if summary.due > 0 => info!(
                    due = summary.due,
                    enqueued = summary.enqueued,
                    skipped_in_flight = summary.skipped_in_flight,
                    enqueue_failed = summary.enqueue_failed,
                    "scheduler tick"
                ),
                Ok(_) => debug!("scheduler tick found no due checks"),
                Err(e) => error!(error = %e, "failed to fetch due checks"),
            }
        }

        info!("scheduler stopped");
    }

    /// Queue every check due at `now` and move its next run forward.
    ///
    /// Only discovery errors abort the tick; a failure on one check never
    /// stops the others.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary, StoreError> {
        let due = self.store.get_due_checks(now, self.options.region.as_deref()).await?;
        let mut summary = TickSummary { due: due.len(), ..Default::default() };

        for check in due {
            let claim = match &self.in_flight {
                Some(in_flight) => match in_flight.try_claim(check.id) {
                    Some(token) => Some((in_flight, token)),
                    None => {
                        debug!(check_id = %check.id, "check still in flight, skipping");
                        summary.skipped_in_flight += 1;
                        continue;
                    }
                },
                None => None,
            };

            if let Err(e) = self.enqueue_with_retry(check.id).await {
                error!(check_id = %check.id, error = %e, "failed to enqueue check");
                self.metrics.record_enqueue_failure();
                if let Some((in_flight, token)) = claim {
                    in_flight.release(check.id, token);
                }
                summary.enqueue_failed += 1;
                continue;
            }
            self.metrics.record_enqueue();
            summary.enqueued += 1;

            if let Err(e) = self
                .store
                .update_check_status(check.id, now, check.next_run_after(now), check.last_status)
                .await
            {
                warn!(check_id = %check.id, error = %e, "failed to reschedule check");
            }
        }

        Ok(summary)
    }

    async fn enqueue_with_retry(&self, check_id: Uuid) -> Result<(), QueueError> {
        let attempts = self.options.enqueue_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.queue.enqueue(check_id).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(check_id = %check_id, attempt, error = %e, "enqueue failed, retrying");
                    tokio::time::sleep(self.options.enqueue_retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
