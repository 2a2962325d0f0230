mod http;
mod tcp;

use std::net::IpAddr;
use std::time::Duration;

use chrono::Utc;

use crate::models::{Check, CheckType, IpVersion};

use super::response::{MAX_RESPONSE_BODY_SIZE, heartbeat_snapshot};
use super::types::{CheckResult, CheckStatus};

pub use http::{HttpChecker, build_url};
pub use tcp::TcpChecker;

/// Probe settings shared by the executors
#[derive(Debug, Clone)]
pub struct CheckerOptions {
    pub http_timeout: Duration,
    pub tcp_timeout: Duration,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for CheckerOptions {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            tcp_timeout: Duration::from_secs(30),
            max_body_bytes: MAX_RESPONSE_BODY_SIZE,
            user_agent: format!("pulse/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// An IP literal host can never satisfy a different required IP version.
fn literal_version_mismatch(host: &str, required: Option<IpVersion>) -> Option<String> {
    let required = required?;
    let ip: IpAddr = host.trim_matches(['[', ']']).parse().ok()?;
    let matches = match required {
        IpVersion::Ipv4 => ip.is_ipv4(),
        IpVersion::Ipv6 => ip.is_ipv6(),
    };
    (!matches).then(|| format!("IP version mismatch: {host} is not an {required} address"))
}

/// Executes one attempt of a check and describes the outcome.
///
/// Checkers never return errors: every failure is folded into the result.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, check: &Check) -> CheckResult;
}

/// Heartbeats are pushed by the monitored system, so running one locally
/// just acknowledges it.
pub struct HeartbeatChecker;

#[async_trait::async_trait]
impl Checker for HeartbeatChecker {
    async fn check(&self, check: &Check) -> CheckResult {
        let now = Utc::now();
        let mut result = CheckResult::started_at(check.id, now);
        result.status = CheckStatus::Passing;
        result.first_byte_at = Some(now);
        result.response_ended_at = Some(now);
        result.response = heartbeat_snapshot();
        result
    }
}

/// Placeholder for check types without an executor (DNS, browser)
pub struct UnimplementedChecker {
    check_type: CheckType,
}

impl UnimplementedChecker {
    pub fn new(check_type: CheckType) -> Self {
        Self { check_type }
    }
}

#[async_trait::async_trait]
impl Checker for UnimplementedChecker {
    async fn check(&self, check: &Check) -> CheckResult {
        CheckResult::new(check.id).not_implemented(self.check_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeat_always_passes() {
        let check = Check { check_type: CheckType::Heartbeat, ..Check::new("beat", "") };
        let result = HeartbeatChecker.check(&check).await;
        assert_eq!(result.status, CheckStatus::Passing);
        assert_eq!(result.response["type"], "heartbeat");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn dns_is_reported_as_not_implemented() {
        let check = Check { check_type: CheckType::Dns, ..Check::new("dns", "example.com") };
        let result = UnimplementedChecker::new(CheckType::Dns).check(&check).await;
        assert_eq!(result.status, CheckStatus::Unknown);
        assert_eq!(result.metadata["not_implemented"], true);
        assert_eq!(result.metadata["check_type"], "dns");
    }
}
