use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::models::{Check, IpVersion};
use crate::monitoring::response::tcp_snapshot;
use crate::monitoring::status::{Thresholds, evaluate_latency};
use crate::monitoring::types::{CheckResult, CheckStatus, FailureReason};

use super::{Checker, CheckerOptions, literal_version_mismatch};

/// TCP port checker: resolves the host and opens a connection
pub struct TcpChecker {
    timeout_duration: Duration,
}

impl TcpChecker {
    pub fn new(options: &CheckerOptions) -> Self {
        Self { timeout_duration: options.tcp_timeout }
    }

    async fn resolve(&self, check: &Check) -> Result<Vec<SocketAddr>, (FailureReason, String)> {
        if let Some(message) = literal_version_mismatch(&check.host, check.ip_version) {
            return Err((FailureReason::IpVersionMismatch, message));
        }
        if let Ok(ip) = check.host.trim_matches(['[', ']']).parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, check.port)]);
        }

        let lookup = tokio::net::lookup_host((check.host.as_str(), check.port));
        let addrs: Vec<SocketAddr> = match timeout(self.timeout_duration, lookup).await {
            Err(_) => {
                return Err((FailureReason::RequestTimeout, "DNS resolution timeout".to_string()));
            }
            Ok(Err(e)) => return Err((FailureReason::Dns, format!("dns lookup failed: {e}"))),
            Ok(Ok(addrs)) => addrs.collect(),
        };

        let wanted: Vec<SocketAddr> = addrs
            .into_iter()
            .filter(|addr| match check.ip_version {
                Some(IpVersion::Ipv4) => addr.is_ipv4(),
                Some(IpVersion::Ipv6) => addr.is_ipv6(),
                None => true,
            })
            .collect();

        if wanted.is_empty() {
            let message = match check.ip_version {
                Some(version) => format!("IP version mismatch: no {version} address for {}", check.host),
                None => format!("dns lookup returned no addresses for {}", check.host),
            };
            let reason = if check.ip_version.is_some() {
                FailureReason::IpVersionMismatch
            } else {
                FailureReason::Dns
            };
            return Err((reason, message));
        }
        Ok(wanted)
    }
}

#[async_trait::async_trait]
impl Checker for TcpChecker {
    async fn check(&self, check: &Check) -> CheckResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let result = CheckResult::started_at(check.id, started_at);

        let addrs = match self.resolve(check).await {
            Ok(addrs) => addrs,
            Err((reason, message)) => return result.failure(reason, message),
        };
        let resolved = clock.elapsed();

        let remaining = self.timeout_duration.saturating_sub(resolved);
        let stream = match timeout(remaining, connect_any(&addrs)).await {
            Err(_) => return result.failure(FailureReason::RequestTimeout, "TCP connection timeout"),
            Ok(Err(e)) => {
                let message = format!("TCP connection failed: {e}");
                let reason = match FailureReason::classify(&message) {
                    FailureReason::Unknown => FailureReason::Tcp,
                    reason => reason,
                };
                return result.failure(reason, message);
            }
            Ok(Ok(stream)) => stream,
        };

        let total = clock.elapsed();
        let ended_at = Utc::now();
        let peer = stream.peer_addr().ok();
        drop(stream);

        let mut result = match peer {
            Some(addr) => result.with_remote(addr.ip()),
            None => result,
        };

        let latency_ms = u64::try_from(total.as_millis()).unwrap_or(u64::MAX);
        result.status = evaluate_latency(latency_ms, Thresholds::of(check));
        if result.status == CheckStatus::Failing {
            result.failure_reason = Some(FailureReason::RequestTimeout);
        }
        result.first_byte_at = Some(ended_at);
        result.response_ended_at = Some(ended_at);
        result.total_time_ms = latency_ms;

        let address = peer
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| format!("{}:{}", check.host, check.port));
        result.response = tcp_snapshot(&address);
        result
            .network_timings
            .insert("dns_us".into(), u64::try_from(resolved.as_micros()).unwrap_or(u64::MAX).into());
        result.network_timings.insert(
            "connect_us".into(),
            u64::try_from(total.saturating_sub(resolved).as_micros()).unwrap_or(u64::MAX).into(),
        );
        result
    }
}

/// Try each address in order, returning the first connection
async fn connect_any(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(*addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses")))
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::models::{CheckType, TimeValue};

    fn tcp_check(host: &str, port: u16) -> Check {
        Check { check_type: CheckType::Tcp, port, ..Check::new("tcp", host) }
    }

    #[tokio::test]
    async fn open_port_passes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let checker = TcpChecker::new(&CheckerOptions::default());
        let result = checker.check(&tcp_check("127.0.0.1", port)).await;

        assert_eq!(result.status, CheckStatus::Passing, "{:?}", result.error);
        assert_eq!(result.ip_version.as_deref(), Some("IPv4"));
        assert_eq!(result.response["connection_status"], "established");
    }

    #[tokio::test]
    async fn closed_port_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let checker = TcpChecker::new(&CheckerOptions::default());
        let result = checker.check(&tcp_check("127.0.0.1", port)).await;

        assert_eq!(result.status, CheckStatus::Failing);
        assert_eq!(result.failure_reason, Some(FailureReason::ConnectionRefused));
        assert!(result.is_transport_failure());
    }

    #[tokio::test]
    async fn literal_address_version_mismatch() {
        let check = Check { ip_version: Some(IpVersion::Ipv4), ..tcp_check("::1", 22) };
        let result = TcpChecker::new(&CheckerOptions::default()).check(&check).await;
        assert_eq!(result.failure_reason, Some(FailureReason::IpVersionMismatch));
    }

    #[tokio::test]
    async fn disabled_degraded_threshold_keeps_passing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let check = Check {
            degraded_threshold: TimeValue::millis(0),
            failed_threshold: TimeValue::seconds(60),
            ..tcp_check("127.0.0.1", port)
        };
        let result = TcpChecker::new(&CheckerOptions::default()).check(&check).await;
        assert_eq!(result.status, CheckStatus::Passing);
    }
}
