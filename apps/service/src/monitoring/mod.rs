//! Probe pipeline: scheduling, execution and evaluation of checks.
pub mod assertions;
pub mod checker;
pub mod executor;
pub mod response;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod types;
pub mod workers;

pub use executor::CheckExecutor;
pub use scheduler::{Scheduler, SchedulerOptions, TickSummary};
pub use types::{CheckResult, CheckStatus, FailureReason};
pub use workers::{ClaimToken, InFlight, JobOutcome, WorkerContext, WorkerPool};
