//! Process bootstrap: builds every component from the configuration, runs
//! the scheduler and worker pool, and owns shutdown.

mod import;

pub use import::{CheckFile, import_checks};

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alerting::ThresholdAlerter;
use crate::config::{Config, QueueBackend};
use crate::database::LibsqlStore;
use crate::health::{HealthServer, HealthState};
use crate::metrics::Metrics;
use crate::monitoring::{CheckExecutor, InFlight, Scheduler, WorkerContext, WorkerPool};
use crate::queue::{JobQueue, MemoryQueue, RedisQueue};

/// Main orchestrator for the probe service
pub struct Orchestrator {
    config: Arc<Config>,
    store: Arc<LibsqlStore>,
    queue: Arc<dyn JobQueue>,
    metrics: Arc<Metrics>,
    in_flight: Option<Arc<InFlight>>,
}

impl Orchestrator {
    /// Open the store and connect the queue
    pub async fn new(config: Config) -> Result<Self> {
        let store = LibsqlStore::open(&config.database.path)
            .await
            .with_context(|| format!("failed to open database {}", config.database.path.display()))?;

        let queue: Arc<dyn JobQueue> = match config.queue.backend {
            QueueBackend::Redis => Arc::new(
                RedisQueue::new(&config.queue.redis_url, config.queue.key.clone())
                    .context("failed to set up redis queue")?,
            ),
            QueueBackend::Memory => {
                warn!("using in-memory queue; queued jobs are lost on exit");
                Arc::new(MemoryQueue::new())
            }
        };

        if let Err(e) = queue.ping().await {
            warn!(error = %e, backend = %config.queue.backend, "queue not reachable yet");
        }

        let in_flight = config
            .scheduler
            .dedupe_in_flight
            .then(|| Arc::new(InFlight::new(Duration::from_secs(config.scheduler.in_flight_ttl_secs))));

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            queue,
            metrics: Arc::new(Metrics::new()),
            in_flight,
        })
    }

    pub fn store(&self) -> Arc<LibsqlStore> {
        self.store.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        let token = CancellationToken::new();
        let signal_token = token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            signal_token.cancel();
        });

        self.run_until(token).await
    }

    /// Run until `token` is cancelled, then shut down in order: scheduler,
    /// workers, health server.
    pub async fn run_until(self, token: CancellationToken) -> Result<()> {
        let config = &self.config;

        let health = if config.health.enabled {
            let state = HealthState {
                queue: self.queue.clone(),
                store: self.store.clone(),
                metrics: self.metrics.clone(),
            };
            Some(
                HealthServer::start(state, &config.health.bind, config.health.port)
                    .with_context(|| {
                        format!("failed to bind health server {}:{}", config.health.bind, config.health.port)
                    })?,
            )
        } else {
            None
        };

        let context = Arc::new(WorkerContext {
            queue: self.queue.clone(),
            store: self.store.clone(),
            history: self.store.clone(),
            alerter: Arc::new(ThresholdAlerter::new(
                config.alerting.failure_threshold,
                self.metrics.clone(),
            )),
            executor: Arc::new(CheckExecutor::new(&config.checker_options())),
            metrics: self.metrics.clone(),
            in_flight: self.in_flight.clone(),
            region: config.scheduler.region.clone(),
            dequeue_timeout: Duration::from_millis(config.queue.dequeue_timeout_ms),
        });
        let pool = WorkerPool::start(context, config.workers.count, token.clone());

        let scheduler = Scheduler::new(
            self.store.clone(),
            self.queue.clone(),
            self.in_flight.clone(),
            self.metrics.clone(),
            config.scheduler_options(),
        );
        let mut scheduler_handle = {
            let token = token.clone();
            tokio::spawn(async move { scheduler.run(token).await })
        };

        info!(
            workers = pool.size(),
            queue = %config.queue.backend,
            region = config.scheduler.region.as_deref(),
            "service started"
        );

        token.cancelled().await;
        info!("shutting down");

        let shutdown_timeout = Duration::from_secs(config.scheduler.shutdown_timeout_secs);
        match tokio::time::timeout(shutdown_timeout, &mut scheduler_handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "scheduler task failed"),
            Err(_) => {
                warn!(timeout_secs = shutdown_timeout.as_secs(), "scheduler did not stop in time");
                scheduler_handle.abort();
            }
        }

        pool.join().await;

        if let Some(health) = health {
            health.stop().await;
        }

        let snapshot = self.metrics.snapshot();
        info!(
            checks_executed = snapshot.checks_executed,
            checks_failed = snapshot.checks_failed,
            alerts_sent = snapshot.alerts_sent,
            "service stopped"
        );
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
