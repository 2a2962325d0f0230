//! Status derivation shared by all executors.

use crate::models::Check;

use super::types::CheckStatus;

/// Latency limits in milliseconds. Zero disables a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Thresholds {
    pub degraded_ms: u64,
    pub failed_ms: u64,
}

impl Thresholds {
    pub fn of(check: &Check) -> Self {
        Self {
            degraded_ms: check.degraded_threshold.as_millis(),
            failed_ms: check.failed_threshold.as_millis(),
        }
    }
}

/// Everything the verdict depends on
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusInputs {
    pub transport_error: bool,
    pub timed_out: bool,
    /// HTTP status code, 0 when no response arrived
    pub status_code: u16,
    pub assertions_passed: bool,
    pub latency_ms: u64,
    pub thresholds: Thresholds,
}

/// Derive the verdict of an HTTP-style execution. First match wins.
pub fn evaluate_status(inputs: &StatusInputs) -> CheckStatus {
    if inputs.transport_error || inputs.timed_out {
        return CheckStatus::Failing;
    }
    if inputs.status_code == 0 {
        return CheckStatus::Unknown;
    }
    if !(200..300).contains(&inputs.status_code) {
        return CheckStatus::Failing;
    }
    if !inputs.assertions_passed {
        return CheckStatus::Failing;
    }
    evaluate_latency(inputs.latency_ms, inputs.thresholds)
}

/// Latency-only part of the verdict, used directly by connection probes.
pub fn evaluate_latency(latency_ms: u64, thresholds: Thresholds) -> CheckStatus {
    if thresholds.failed_ms > 0 && latency_ms >= thresholds.failed_ms {
        CheckStatus::Failing
    } else if thresholds.degraded_ms > 0 && latency_ms >= thresholds.degraded_ms {
        CheckStatus::Degraded
    } else {
        CheckStatus::Passing
    }
}
