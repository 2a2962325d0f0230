//! Worker pool: a fixed number of loops that pop jobs from the queue and run
//! them through the execution pipeline one at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerting::Alerter;
use crate::database::{CheckStore, HistorySink, StoreError};
use crate::metrics::Metrics;
use crate::queue::{JobQueue, QueueError};

use super::executor::CheckExecutor;
use super::types::CheckStatus;

/// Pause after a failed dequeue before asking the queue again
const DEQUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Identifies one claim, so a job only ever releases the claim it ran under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimToken(u64);

#[derive(Debug, Clone, Copy)]
struct Claim {
    token: ClaimToken,
    claimed_at: Instant,
}

/// Check ids that have a job queued or executing.
///
/// Claims expire after `ttl` so a job lost by the queue cannot block its
/// check forever.
#[derive(Debug)]
pub struct InFlight {
    ttl: Duration,
    next_token: AtomicU64,
    claims: Mutex<HashMap<Uuid, Claim>>,
}

impl InFlight {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, next_token: AtomicU64::new(1), claims: Mutex::new(HashMap::new()) }
    }

    fn claims(&self) -> MutexGuard<'_, HashMap<Uuid, Claim>> {
        match self.claims.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claim `check_id`. Returns `None` while an unexpired claim exists.
    /// Expired claims are dropped on the way.
    pub fn try_claim(&self, check_id: Uuid) -> Option<ClaimToken> {
        let now = Instant::now();
        let mut claims = self.claims();
        claims.retain(|_, claim| now.duration_since(claim.claimed_at) < self.ttl);
        if claims.contains_key(&check_id) {
            return None;
        }

        let token = ClaimToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        claims.insert(check_id, Claim { token, claimed_at: now });
        Some(token)
    }

    /// The live claim on `check_id`, if any
    pub fn current(&self, check_id: Uuid) -> Option<ClaimToken> {
        let now = Instant::now();
        self.claims()
            .get(&check_id)
            .filter(|claim| now.duration_since(claim.claimed_at) < self.ttl)
            .map(|claim| claim.token)
    }

    /// Release `check_id` if it is still held under `token`
    pub fn release(&self, check_id: Uuid, token: ClaimToken) -> bool {
        let mut claims = self.claims();
        match claims.get(&check_id) {
            Some(claim) if claim.token == token => {
                claims.remove(&check_id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.claims().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the claim a job started under when the job ends, whatever the
/// outcome. A newer claim on the same check is left alone.
struct ClaimGuard<'a> {
    in_flight: &'a InFlight,
    check_id: Uuid,
    token: ClaimToken,
}

impl<'a> ClaimGuard<'a> {
    fn adopt(in_flight: Option<&'a InFlight>, check_id: Uuid) -> Option<Self> {
        let in_flight = in_flight?;
        let token = in_flight.current(check_id)?;
        Some(Self { in_flight, check_id, token })
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.release(self.check_id, self.token);
    }
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(CheckStatus),
    Dropped,
}

/// Everything a worker needs to run the job pipeline
pub struct WorkerContext {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn CheckStore>,
    pub history: Arc<dyn HistorySink>,
    pub alerter: Arc<dyn Alerter>,
    pub executor: Arc<CheckExecutor>,
    pub metrics: Arc<Metrics>,
    pub in_flight: Option<Arc<InFlight>>,
    pub region: Option<String>,
    pub dequeue_timeout: Duration,
}

impl WorkerContext {
    /// Run one job: load, execute, persist, alert, reschedule.
    ///
    /// Persisting, alerting and rescheduling fail independently; a failure
    /// in one is logged and the others still run.
    pub async fn process_job(&self, worker: usize, check_id: Uuid) -> JobOutcome {
        let _active = self.metrics.job_started();
        let _claim = ClaimGuard::adopt(self.in_flight.as_deref(), check_id);

        let check = match self.store.get_check(check_id).await {
            Ok(check) => check,
            Err(StoreError::NotFound(_)) => {
                warn!(worker, check_id = %check_id, "check no longer exists, dropping job");
                self.metrics.record_dropped_job();
                return JobOutcome::Dropped;
            }
            Err(e) => {
                error!(worker, check_id = %check_id, error = %e, "failed to load check, dropping job");
                self.metrics.record_dropped_job();
                return JobOutcome::Dropped;
            }
        };

        if !check.runs_in(self.region.as_deref()) {
            warn!(
                worker,
                check_id = %check_id,
                region = self.region.as_deref(),
                "check is not assigned to this region, dropping job"
            );
            self.metrics.record_dropped_job();
            return JobOutcome::Dropped;
        }

        let result = self.executor.execute(&check).await;
        self.metrics.record_check(result.status);
        info!(
            worker,
            check_id = %check_id,
            status = %result.status,
            attempts = result.attempts,
            total_time_ms = result.total_time_ms,
            "check completed"
        );

        match self.history.record_run(&check, &result).await {
            Ok(run_number) => debug!(check_id = %check_id, run_number, "run recorded"),
            Err(e) => error!(check_id = %check_id, error = %e, "failed to record run"),
        }

        if let Err(e) = self.alerter.process_check_result(&check, &result).await {
            warn!(check_id = %check_id, error = %e, "alerting failed");
        }

        let now = Utc::now();
        if let Err(e) = self
            .store
            .update_check_status(check_id, now, check.next_run_after(now), result.status)
            .await
        {
            error!(check_id = %check_id, error = %e, "failed to update check status");
        }

        JobOutcome::Completed(result.status)
    }

    async fn run_worker(self: Arc<Self>, worker: usize, token: CancellationToken) {
        info!(worker, "worker started");

        while !token.is_cancelled() {
            // The dequeue is not raced against the token: dropping a BRPOP
            // mid-flight can lose a job the server already popped. Shutdown
            // therefore waits at most one `dequeue_timeout` here.
            match self.queue.dequeue(self.dequeue_timeout).await {
                Ok(Some(check_id)) => {
                    self.process_job(worker, check_id).await;
                }
                Ok(None) => {}
                Err(e @ QueueError::Malformed { .. }) => {
                    warn!(worker, error = %e, "discarding malformed job");
                    self.metrics.record_dropped_job();
                }
                Err(e) => {
                    error!(worker, error = %e, "failed to dequeue job");
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(DEQUEUE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!(worker, "worker stopped");
    }
}

/// A fixed-size set of running workers
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers that run until `token` is cancelled
    pub fn start(context: Arc<WorkerContext>, count: usize, token: CancellationToken) -> Self {
        let handles = (0..count)
            .map(|worker| tokio::spawn(context.clone().run_worker(worker, token.clone())))
            .collect();
        info!(workers = count, "worker pool started");
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to finish its current job and exit
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }
        info!("worker pool stopped");
    }
}
