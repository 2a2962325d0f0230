//! Store boundary of the probe pipeline.
//!
//! `CheckStore` is read by the scheduler and workers and only ever written
//! back with scheduling state. `HistorySink` receives one record per
//! executed check.

pub mod memory;
pub mod migrations;
pub mod repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::Check;
use crate::monitoring::types::{CheckResult, CheckStatus};

pub use memory::MemoryStore;
pub use repository::LibsqlStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("check {0} not found")]
    NotFound(Uuid),
    #[error("database error: {0}")]
    Backend(#[from] libsql::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
}

#[async_trait]
pub trait CheckStore: Send + Sync {
    /// Enabled checks whose next run is unset or not after `now`. With a
    /// region, checks restricted to other regions are left out.
    async fn get_due_checks(
        &self,
        now: DateTime<Utc>,
        region: Option<&str>,
    ) -> Result<Vec<Check>, StoreError>;

    async fn get_check(&self, id: Uuid) -> Result<Check, StoreError>;

    async fn update_check_status(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        last_status: CheckStatus,
    ) -> Result<(), StoreError>;

    /// Insert or replace a check definition, keeping its scheduling state
    async fn save_check(&self, check: &Check) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Persist a result and return its run number. Run numbers start at 1
    /// and grow by one per check.
    async fn record_run(&self, check: &Check, result: &CheckResult) -> Result<u64, StoreError>;
}
