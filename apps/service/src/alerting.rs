//! Alerting sink fed with every completed check execution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::models::Check;
use crate::monitoring::types::{CheckResult, CheckStatus, FailureReason};

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn process_check_result(&self, check: &Check, result: &CheckResult) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Failure,
    Recovery,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub check_id: Uuid,
    pub check_name: String,
    pub kind: AlertKind,
    pub status: CheckStatus,
    pub failure_reason: Option<FailureReason>,
    pub consecutive_failures: u32,
    pub error: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Streak {
    failures: u32,
    alerted: bool,
}

/// Alerts once a check fails `threshold` times in a row, and again when it
/// recovers
pub struct ThresholdAlerter {
    threshold: u32,
    metrics: Arc<Metrics>,
    streaks: Mutex<HashMap<Uuid, Streak>>,
}

impl ThresholdAlerter {
    pub fn new(threshold: u32, metrics: Arc<Metrics>) -> Self {
        Self { threshold: threshold.max(1), metrics, streaks: Mutex::new(HashMap::new()) }
    }

    /// Update the streak of `check` and return the alert it triggers, if any
    pub fn evaluate(&self, check: &Check, result: &CheckResult) -> Option<Alert> {
        let mut streaks = match self.streaks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let streak = streaks.entry(check.id).or_default();

        let kind = match result.status {
            CheckStatus::Unknown => None,
            CheckStatus::Failing => {
                streak.failures = streak.failures.saturating_add(1);
                (streak.failures == self.threshold).then(|| {
                    streak.alerted = true;
                    AlertKind::Failure
                })
            }
            CheckStatus::Passing | CheckStatus::Degraded => {
                let recovered = streak.alerted;
                *streak = Streak::default();
                recovered.then_some(AlertKind::Recovery)
            }
        }?;

        if check.muted {
            return None;
        }

        Some(Alert {
            check_id: check.id,
            check_name: check.name.clone(),
            kind,
            status: result.status,
            failure_reason: result.failure_reason,
            consecutive_failures: streak.failures,
            error: result.error.clone(),
        })
    }
}

#[async_trait]
impl Alerter for ThresholdAlerter {
    async fn process_check_result(&self, check: &Check, result: &CheckResult) -> Result<()> {
        if let Some(alert) = self.evaluate(check, result) {
            warn!(
                check_id = %alert.check_id,
                check_name = %alert.check_name,
                kind = ?alert.kind,
                status = %alert.status,
                failure_reason = alert.failure_reason.map(|r| r.as_str()),
                consecutive_failures = alert.consecutive_failures,
                error = alert.error.as_deref(),
                "ALERT"
            );
            self.metrics.record_alert();
        }
        Ok(())
    }
}
