use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::monitoring::assertions::AssertionResult;

/// Health verdict of a check execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Degraded,
    Failing,
    #[default]
    Unknown,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Passing => "passing",
            CheckStatus::Degraded => "degraded",
            CheckStatus::Failing => "failing",
            CheckStatus::Unknown => "unknown",
        }
    }

    /// Parse a stored status, treating anything unrecognised as unknown
    pub fn from_db(raw: &str) -> Self {
        match raw {
            "passing" => CheckStatus::Passing,
            "degraded" => CheckStatus::Degraded,
            "failing" => CheckStatus::Failing,
            _ => CheckStatus::Unknown,
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a check ended up failing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Dns,
    ConnectionRefused,
    RequestTimeout,
    Tls,
    Tcp,
    NetworkUnreachable,
    IpVersionMismatch,
    AssertionFailed,
    #[serde(rename = "http_4xx")]
    Http4xx,
    #[serde(rename = "http_5xx")]
    Http5xx,
    TtfbTimeout,
    DownloadTimeout,
    /// The probe itself misbehaved (e.g. an impossible timeline)
    Agent,
    Unknown,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Dns => "dns",
            FailureReason::ConnectionRefused => "connection_refused",
            FailureReason::RequestTimeout => "request_timeout",
            FailureReason::Tls => "tls",
            FailureReason::Tcp => "tcp",
            FailureReason::NetworkUnreachable => "network_unreachable",
            FailureReason::IpVersionMismatch => "ip_version_mismatch",
            FailureReason::AssertionFailed => "assertion_failed",
            FailureReason::Http4xx => "http_4xx",
            FailureReason::Http5xx => "http_5xx",
            FailureReason::TtfbTimeout => "ttfb_timeout",
            FailureReason::DownloadTimeout => "download_timeout",
            FailureReason::Agent => "agent",
            FailureReason::Unknown => "unknown",
        }
    }

    /// Classify a transport error message.
    ///
    /// Order matters: version mismatches and DNS failures also mention
    /// connections, and TLS errors frequently mention handshakes.
    pub fn classify(message: &str) -> Self {
        let message = message.to_ascii_lowercase();
        let has = |needle: &str| message.contains(needle);

        if has("ip version mismatch") {
            FailureReason::IpVersionMismatch
        } else if has("no such host")
            || has("dns")
            || has("failed to lookup address")
            || has("name or service not known")
        {
            FailureReason::Dns
        } else if has("connection refused") {
            FailureReason::ConnectionRefused
        } else if has("timed out") || has("timeout") || has("deadline exceeded") {
            FailureReason::RequestTimeout
        } else if has("tls")
            || has("ssl")
            || has("certificate")
            || has("handshake")
            || has("x509")
        {
            FailureReason::Tls
        } else if has("connection") && has("reset") {
            FailureReason::Tcp
        } else if has("network is unreachable") {
            FailureReason::NetworkUnreachable
        } else {
            FailureReason::Unknown
        }
    }
}

/// Structured outcome of one check execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: Uuid,
    pub status: CheckStatus,
    pub failure_reason: Option<FailureReason>,
    /// Transport or execution error, if the attempt never produced a response
    pub error: Option<String>,
    pub response_status: Option<u16>,

    pub request_started_at: DateTime<Utc>,
    pub first_byte_at: Option<DateTime<Utc>>,
    pub response_ended_at: Option<DateTime<Utc>>,
    pub total_time_ms: u64,

    pub connection_reused: bool,
    pub ip_version: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub response_size_bytes: u64,

    pub assertion_results: Vec<AssertionResult>,
    pub network_timings: Map<String, Value>,
    pub response: Value,
    pub metadata: Map<String, Value>,

    /// Attempts spent producing this result (retries included)
    pub attempts: u32,
}

impl CheckResult {
    /// Create an empty result that started now, with unknown status
    pub fn new(check_id: Uuid) -> Self {
        Self::started_at(check_id, Utc::now())
    }

    pub fn started_at(check_id: Uuid, request_started_at: DateTime<Utc>) -> Self {
        Self {
            check_id,
            status: CheckStatus::Unknown,
            failure_reason: None,
            error: None,
            response_status: None,
            request_started_at,
            first_byte_at: None,
            response_ended_at: None,
            total_time_ms: 0,
            connection_reused: false,
            ip_version: None,
            ip_address: None,
            response_size_bytes: 0,
            assertion_results: Vec::new(),
            network_timings: Map::new(),
            response: Value::Object(Map::new()),
            metadata: Map::new(),
            attempts: 1,
        }
    }

    /// Mark the result as a failed execution with a classified reason
    pub fn failure(mut self, reason: FailureReason, error: impl Into<String>) -> Self {
        let error = error.into();
        self.status = CheckStatus::Failing;
        self.failure_reason = Some(reason);
        self.metadata.insert("error".into(), Value::String(error.clone()));
        self.error = Some(error);
        self
    }

    /// Mark the result as produced by an executor that does not exist yet
    pub fn not_implemented(mut self, check_type: impl std::fmt::Display) -> Self {
        self.status = CheckStatus::Unknown;
        self.metadata.insert("not_implemented".into(), Value::Bool(true));
        self.metadata.insert("check_type".into(), Value::String(check_type.to_string()));
        self
    }

    /// Attach the remote address the probe connected to
    pub fn with_remote(mut self, ip: IpAddr) -> Self {
        self.ip_version = Some(if ip.is_ipv4() { "IPv4" } else { "IPv6" }.to_string());
        self.ip_address = Some(ip);
        self
    }

    /// A transport-level failure: the attempt never got a response
    pub fn is_transport_failure(&self) -> bool {
        self.error.is_some() && self.response_status.is_none()
    }

    pub fn is_passing(&self) -> bool {
        self.status == CheckStatus::Passing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transport_errors() {
        assert_eq!(
            FailureReason::classify("error trying to connect: dns error: failed to lookup address"),
            FailureReason::Dns
        );
        assert_eq!(
            FailureReason::classify("tcp connect error: Connection refused (os error 111)"),
            FailureReason::ConnectionRefused
        );
        assert_eq!(FailureReason::classify("operation timed out"), FailureReason::RequestTimeout);
        assert_eq!(
            FailureReason::classify("invalid peer certificate: UnknownIssuer"),
            FailureReason::Tls
        );
        assert_eq!(FailureReason::classify("connection reset by peer"), FailureReason::Tcp);
        assert_eq!(
            FailureReason::classify("IP version mismatch: required IPv4"),
            FailureReason::IpVersionMismatch
        );
        assert_eq!(FailureReason::classify("something odd"), FailureReason::Unknown);
    }

    #[test]
    fn failure_reason_names_match_serialization() {
        for reason in [FailureReason::Http4xx, FailureReason::TtfbTimeout, FailureReason::Agent] {
            let serialized = serde_json::to_value(reason).expect("serialize");
            assert_eq!(serialized, reason.as_str());
        }
    }

    #[test]
    fn failure_records_error_in_metadata() {
        let result = CheckResult::new(Uuid::new_v4()).failure(FailureReason::Tcp, "reset");
        assert_eq!(result.status, CheckStatus::Failing);
        assert_eq!(result.metadata["error"], "reset");
        assert!(result.is_transport_failure());
    }

    #[test]
    fn statuses_round_trip_through_storage_strings() {
        for status in [
            CheckStatus::Passing,
            CheckStatus::Degraded,
            CheckStatus::Failing,
            CheckStatus::Unknown,
        ] {
            assert_eq!(CheckStatus::from_db(status.as_str()), status);
        }
        assert_eq!(CheckStatus::from_db("bogus"), CheckStatus::Unknown);
    }
}
