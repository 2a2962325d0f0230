use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CheckStore, HistorySink, StoreError};
use crate::models::Check;
use crate::monitoring::types::{CheckResult, CheckStatus};

/// Store kept entirely in process memory
#[derive(Default)]
pub struct MemoryStore {
    checks: RwLock<HashMap<Uuid, Check>>,
    runs: RwLock<HashMap<Uuid, Vec<CheckResult>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checks(checks: impl IntoIterator<Item = Check>) -> Self {
        let checks = checks.into_iter().map(|check| (check.id, check)).collect();
        Self { checks: RwLock::new(checks), runs: RwLock::default() }
    }

    /// Results recorded for a check, oldest first
    pub async fn runs(&self, id: Uuid) -> Vec<CheckResult> {
        self.runs.read().await.get(&id).cloned().unwrap_or_default()
    }

    pub async fn remove_check(&self, id: Uuid) -> Option<Check> {
        self.checks.write().await.remove(&id)
    }
}

#[async_trait]
impl CheckStore for MemoryStore {
    async fn get_due_checks(
        &self,
        now: DateTime<Utc>,
        region: Option<&str>,
    ) -> Result<Vec<Check>, StoreError> {
        let mut due: Vec<Check> = self
            .checks
            .read()
            .await
            .values()
            .filter(|check| check.is_due(now) && check.runs_in(region))
            .cloned()
            .collect();
        due.sort_by_key(|check| check.next_run_at);
        Ok(due)
    }

    async fn get_check(&self, id: Uuid) -> Result<Check, StoreError> {
        self.checks.read().await.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn update_check_status(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        last_status: CheckStatus,
    ) -> Result<(), StoreError> {
        let mut checks = self.checks.write().await;
        let check = checks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        check.last_run_at = Some(last_run_at);
        check.next_run_at = Some(next_run_at);
        check.last_status = last_status;
        Ok(())
    }

    async fn save_check(&self, check: &Check) -> Result<(), StoreError> {
        let mut checks = self.checks.write().await;
        let mut check = check.clone();
        if let Some(existing) = checks.get(&check.id) {
            check.last_status = existing.last_status;
            check.last_run_at = existing.last_run_at;
            check.next_run_at = existing.next_run_at;
        }
        checks.insert(check.id, check);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl HistorySink for MemoryStore {
    async fn record_run(&self, check: &Check, result: &CheckResult) -> Result<u64, StoreError> {
        let mut runs = self.runs.write().await;
        let history = runs.entry(check.id).or_default();
        history.push(result.clone());
        Ok(history.len() as u64)
    }
}
