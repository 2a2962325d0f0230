use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{Check, CheckType};

use super::checker::{
    Checker, CheckerOptions, HeartbeatChecker, HttpChecker, TcpChecker, UnimplementedChecker,
};
use super::retry::RetryPolicy;
use super::types::{CheckResult, CheckStatus};

/// Check executor - dispatches a check to the checker for its type and
/// applies the check's retry policy
pub struct CheckExecutor {
    http_checker: Arc<HttpChecker>,
    tcp_checker: Arc<TcpChecker>,
    dns_checker: Arc<UnimplementedChecker>,
    browser_checker: Arc<UnimplementedChecker>,
    heartbeat_checker: Arc<HeartbeatChecker>,
}

impl CheckExecutor {
    pub fn new(options: &CheckerOptions) -> Self {
        Self {
            http_checker: Arc::new(HttpChecker::new(options)),
            tcp_checker: Arc::new(TcpChecker::new(options)),
            dns_checker: Arc::new(UnimplementedChecker::new(CheckType::Dns)),
            browser_checker: Arc::new(UnimplementedChecker::new(CheckType::Browser)),
            heartbeat_checker: Arc::new(HeartbeatChecker),
        }
    }

    fn checker_for(&self, check_type: CheckType) -> Option<&dyn Checker> {
        let checker: &dyn Checker = match check_type {
            CheckType::Http => self.http_checker.as_ref(),
            CheckType::Tcp => self.tcp_checker.as_ref(),
            CheckType::Dns => self.dns_checker.as_ref(),
            CheckType::Browser => self.browser_checker.as_ref(),
            CheckType::Heartbeat => self.heartbeat_checker.as_ref(),
            CheckType::Unsupported => return None,
        };
        Some(checker)
    }

    /// Execute a check, retrying transport failures up to the check's limit.
    ///
    /// Responses that arrived (any status code) are never retried.
    pub async fn execute(&self, check: &Check) -> CheckResult {
        let Some(checker) = self.checker_for(check.check_type) else {
            let mut result = CheckResult::new(check.id);
            result.status = CheckStatus::Unknown;
            result.metadata.insert("error".into(), Value::String("unknown check type".into()));
            return result;
        };

        let policy = RetryPolicy::from_settings(&check.retry);
        let attempts = policy.attempts();
        let mut previous = Duration::ZERO;
        let mut attempt = 0;

        loop {
            let mut result = checker.check(check).await;
            result.attempts = attempt + 1;

            if !result.is_transport_failure() || result.attempts >= attempts {
                debug!(
                    check_id = %check.id,
                    status = %result.status,
                    attempts = result.attempts,
                    "check executed"
                );
                return result;
            }

            let delay = policy.delay(attempt, previous);
            warn!(
                check_id = %check.id,
                attempt = result.attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = result.error.as_deref().unwrap_or_default(),
                "check attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            previous = delay;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RetrySettings, RetryStrategy, TimeValue};
    use crate::monitoring::types::FailureReason;

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    }

    #[tokio::test]
    async fn unsupported_type_is_unknown() {
        let executor = CheckExecutor::new(&CheckerOptions::default());
        let check = Check { check_type: CheckType::Unsupported, ..Check::new("odd", "localhost") };

        let result = executor.execute(&check).await;
        assert_eq!(result.status, CheckStatus::Unknown);
        assert_eq!(result.metadata["error"], "unknown check type");
    }

    #[tokio::test]
    async fn transport_failures_are_retried() {
        let executor = CheckExecutor::new(&CheckerOptions::default());
        let check = Check {
            port: closed_port(),
            retry: RetrySettings {
                strategy: RetryStrategy::Fixed,
                count: 2,
                delay: Some(TimeValue::millis(10)),
                ..Default::default()
            },
            ..Check::new("closed", "127.0.0.1")
        };

        let result = executor.execute(&check).await;
        assert_eq!(result.attempts, 3);
        assert_eq!(result.failure_reason, Some(FailureReason::ConnectionRefused));
    }

    #[tokio::test]
    async fn http_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/").with_status(500).expect(1).create_async().await;
        let addr = server.socket_address();

        let executor = CheckExecutor::new(&CheckerOptions::default());
        let check = Check {
            port: addr.port(),
            retry: RetrySettings { strategy: RetryStrategy::Fixed, count: 3, ..Default::default() },
            ..Check::new("flaky", addr.ip().to_string())
        };

        let result = executor.execute(&check).await;
        mock.assert_async().await;
        assert_eq!(result.attempts, 1);
        assert_eq!(result.status, CheckStatus::Failing);
    }

    #[tokio::test]
    async fn heartbeat_dispatch() {
        let executor = CheckExecutor::new(&CheckerOptions::default());
        let check = Check { check_type: CheckType::Heartbeat, ..Check::new("beat", "") };
        assert!(executor.execute(&check).await.is_passing());
    }
}
