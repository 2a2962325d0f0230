use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use pulse_service::alerting::ThresholdAlerter;
use pulse_service::database::{CheckStore, MemoryStore};
use pulse_service::metrics::Metrics;
use pulse_service::models::{Check, CheckType};
use pulse_service::monitoring::checker::CheckerOptions;
use pulse_service::monitoring::{
    CheckExecutor, CheckStatus, FailureReason, InFlight, JobOutcome, Scheduler, SchedulerOptions,
    WorkerContext, WorkerPool,
};
use pulse_service::queue::{JobQueue, MemoryQueue};
use tokio_util::sync::CancellationToken;

struct Harness {
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    metrics: Arc<Metrics>,
    in_flight: Arc<InFlight>,
    context: Arc<WorkerContext>,
}

fn harness(checks: Vec<Check>) -> Harness {
    let store = Arc::new(MemoryStore::with_checks(checks));
    let queue = Arc::new(MemoryQueue::new());
    let metrics = Arc::new(Metrics::new());
    let in_flight = Arc::new(InFlight::new(Duration::from_secs(600)));
    let options = CheckerOptions { http_timeout: Duration::from_secs(5), ..Default::default() };

    let context = Arc::new(WorkerContext {
        queue: queue.clone(),
        store: store.clone(),
        history: store.clone(),
        alerter: Arc::new(ThresholdAlerter::new(2, metrics.clone())),
        executor: Arc::new(CheckExecutor::new(&options)),
        metrics: metrics.clone(),
        in_flight: Some(in_flight.clone()),
        region: None,
        dequeue_timeout: Duration::from_millis(50),
    });

    Harness { store, queue, metrics, in_flight, context }
}

impl Harness {
    fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.store.clone(),
            self.queue.clone(),
            Some(self.in_flight.clone()),
            self.metrics.clone(),
            SchedulerOptions::default(),
        )
    }

    /// Pop every queued job and run it on worker 0
    async fn drain(&self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Some(id) = self.queue.dequeue(Duration::from_millis(10)).await.expect("dequeue") {
            outcomes.push(self.context.process_job(0, id).await);
        }
        outcomes
    }
}

fn heartbeat(name: &str) -> Check {
    Check { check_type: CheckType::Heartbeat, ..Check::new(name, "localhost") }
}

async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("addr").port()
}

#[tokio::test]
async fn one_failing_check_does_not_affect_the_others() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("GET", "/health").with_status(200).with_body("ok").create_async().await;
    let address = server.socket_address();

    let mut healthy = Check::new("healthy", address.ip().to_string());
    healthy.port = address.port();
    healthy.path = "/health".into();

    let mut down = Check::new("down", "127.0.0.1");
    down.port = closed_port().await;

    let h = harness(vec![healthy.clone(), down.clone()]);
    let summary = h.scheduler().tick(Utc::now()).await.expect("tick");
    assert_eq!(summary.enqueued, 2);

    let outcomes = h.drain().await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.contains(&JobOutcome::Completed(CheckStatus::Passing)));
    assert!(outcomes.contains(&JobOutcome::Completed(CheckStatus::Failing)));
    mock.assert_async().await;

    let healthy_runs = h.store.runs(healthy.id).await;
    assert_eq!(healthy_runs.len(), 1);
    assert_eq!(healthy_runs[0].response_status, Some(200));

    let down_runs = h.store.runs(down.id).await;
    assert_eq!(down_runs.len(), 1);
    assert_eq!(down_runs[0].failure_reason, Some(FailureReason::ConnectionRefused));

    assert_eq!(h.store.get_check(healthy.id).await.expect("check").last_status, CheckStatus::Passing);
    assert_eq!(h.store.get_check(down.id).await.expect("check").last_status, CheckStatus::Failing);
    assert!(h.in_flight.is_empty());

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.checks_executed, 2);
    assert_eq!(snapshot.checks_failed, 1);
}

#[tokio::test]
async fn scheduler_only_enqueues_due_checks() {
    let now = Utc::now();
    let never_run = heartbeat("never-run");
    let future = Check { next_run_at: Some(now + TimeDelta::minutes(5)), ..heartbeat("future") };
    let h = harness(vec![never_run.clone(), future.clone()]);

    let summary = h.scheduler().tick(now).await.expect("tick");
    assert_eq!(summary.due, 1);
    assert_eq!(h.queue.depth().await.expect("depth"), 1);

    h.drain().await;
    assert_eq!(h.store.runs(never_run.id).await.len(), 1);
    assert!(h.store.runs(future.id).await.is_empty());
    assert!(h.store.get_check(never_run.id).await.expect("check").next_run_at > Some(now));
}

#[tokio::test]
async fn worker_pool_processes_each_job_once() {
    let checks: Vec<Check> = (0..10).map(|i| heartbeat(&format!("hb-{i}"))).collect();
    let h = harness(checks.clone());
    for check in &checks {
        h.queue.enqueue(check.id).await.expect("enqueue");
    }

    let token = CancellationToken::new();
    let pool = WorkerPool::start(h.context.clone(), 3, token.clone());
    assert_eq!(pool.size(), 3);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while h.metrics.snapshot().checks_executed < 10 {
        assert!(tokio::time::Instant::now() < deadline, "jobs were not processed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), pool.join()).await.expect("pool did not stop");

    for check in &checks {
        assert_eq!(h.store.runs(check.id).await.len(), 1, "check {} ran more than once", check.name);
    }
    assert_eq!(h.queue.depth().await.expect("depth"), 0);
    assert_eq!(h.metrics.snapshot().active_jobs, 0);
}

#[tokio::test]
async fn deleted_checks_are_dropped() {
    let check = heartbeat("gone");
    let h = harness(vec![check.clone()]);
    h.scheduler().tick(Utc::now()).await.expect("tick");
    h.store.remove_check(check.id).await;

    assert_eq!(h.drain().await, vec![JobOutcome::Dropped]);
    assert_eq!(h.metrics.snapshot().jobs_dropped, 1);
    assert!(h.in_flight.is_empty());
}

#[tokio::test]
async fn repeated_failures_raise_one_alert() {
    let mut down = Check::new("down", "127.0.0.1");
    down.port = closed_port().await;
    let h = harness(vec![down.clone()]);

    for _ in 0..3 {
        h.queue.enqueue(down.id).await.expect("enqueue");
        h.drain().await;
    }

    assert_eq!(h.store.runs(down.id).await.len(), 3);
    assert_eq!(h.metrics.snapshot().alerts_sent, 1);
}
