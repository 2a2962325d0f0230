use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::monitoring::types::CheckStatus;

/// Interval used when a check carries an interval we cannot parse.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Protocol a check probes with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    #[default]
    Http,
    Tcp,
    Dns,
    Browser,
    Heartbeat,
    /// Any type string this build does not know about
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckType::Http => write!(f, "http"),
            CheckType::Tcp => write!(f, "tcp"),
            CheckType::Dns => write!(f, "dns"),
            CheckType::Browser => write!(f, "browser"),
            CheckType::Heartbeat => write!(f, "heartbeat"),
            CheckType::Unsupported => write!(f, "unsupported"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    #[default]
    Ms,
    S,
}

/// A duration as users configure it: a number plus a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeValue {
    pub value: u64,
    #[serde(default)]
    pub unit: UnitType,
}

impl TimeValue {
    pub const fn millis(value: u64) -> Self {
        Self { value, unit: UnitType::Ms }
    }

    pub const fn seconds(value: u64) -> Self {
        Self { value, unit: UnitType::S }
    }

    /// Normalized to milliseconds
    pub fn as_millis(&self) -> u64 {
        match self.unit {
            UnitType::Ms => self.value,
            UnitType::S => self.value.saturating_mul(1000),
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.as_millis())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    #[default]
    None,
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterStrategy {
    #[default]
    None,
    Full,
    Equal,
    Decorrelated,
}

/// Retry configuration as stored on the check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default)]
    pub strategy: RetryStrategy,
    /// Retries after the first attempt
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub delay: Option<TimeValue>,
    /// Growth factor for exponential backoff (defaults to 2.0)
    #[serde(default)]
    pub factor: Option<f64>,
    #[serde(default)]
    pub max_delay: Option<TimeValue>,
    #[serde(default)]
    pub jitter: JitterStrategy,
    #[serde(default)]
    pub jitter_factor: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    Ipv4,
    Ipv6,
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::Ipv4 => write!(f, "IPv4"),
            IpVersion::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// Header values may be configured as one string or a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

impl HeaderValues {
    pub fn values(&self) -> Vec<&str> {
        match self {
            HeaderValues::One(value) => vec![value.as_str()],
            HeaderValues::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// Where an assertion reads its received value from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionSource {
    StatusCode,
    ResponseTimeMs,
    ResponseBodyText,
    ResponseBodyJson,
    ResponseHeaders,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    IsEmpty,
    IsNotEmpty,
    IsLessThan,
    IsLessThanOrEqualTo,
    IsGreaterThan,
    IsGreaterThanOrEqualTo,
    #[serde(other)]
    Unsupported,
}

/// A declarative rule evaluated against a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub source: AssertionSource,
    /// Dot/bracket path, only meaningful for JSON body and header sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    pub comparison: Comparison,
    #[serde(default)]
    pub target: serde_json::Value,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntervalError {
    #[error("interval cannot be empty")]
    Empty,
    #[error("invalid interval format: {0}")]
    Format(String),
    #[error("unknown interval unit in {0} (supported: s, m, h)")]
    Unit(String),
}

/// Parse intervals such as `30s`, `10m` or `1h`.
pub fn parse_interval(raw: &str) -> Result<Duration, IntervalError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(IntervalError::Empty);
    }
    let Some(unit) = raw.chars().last() else {
        return Err(IntervalError::Empty);
    };
    let number: u64 = raw[..raw.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| IntervalError::Format(raw.to_string()))?;

    let seconds = match unit.to_ascii_lowercase() {
        's' => number,
        'm' => number.saturating_mul(60),
        'h' => number.saturating_mul(3600),
        _ => return Err(IntervalError::Unit(raw.to_string())),
    };
    Ok(Duration::from_secs(seconds))
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    80
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_interval() -> String {
    "10m".to_string()
}

/// A monitored target.
///
/// The store owns checks; the probe pipeline only reads them and writes back
/// `last_run_at`, `next_run_at` and `last_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub muted: bool,

    #[serde(default, rename = "type")]
    pub check_type: CheckType,

    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub query_params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, HeaderValues>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub ip_version: Option<IpVersion>,
    #[serde(default)]
    pub skip_ssl_verification: bool,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,

    #[serde(default)]
    pub assertions: Vec<Assertion>,

    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default)]
    pub degraded_threshold: TimeValue,
    #[serde(default)]
    pub failed_threshold: TimeValue,
    #[serde(default)]
    pub retry: RetrySettings,

    /// Region codes allowed to run this check; empty means everywhere
    #[serde(default)]
    pub regions: Vec<String>,

    #[serde(default)]
    pub last_status: CheckStatus,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl Check {
    /// Create an enabled HTTP check with default settings
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
            muted: false,
            check_type: CheckType::Http,
            host: host.into(),
            port: default_port(),
            secure: false,
            method: default_method(),
            path: default_path(),
            query_params: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            ip_version: None,
            skip_ssl_verification: false,
            follow_redirects: true,
            assertions: Vec::new(),
            interval: default_interval(),
            degraded_threshold: TimeValue::default(),
            failed_threshold: TimeValue::default(),
            retry: RetrySettings::default(),
            regions: Vec::new(),
            last_status: CheckStatus::Unknown,
            last_run_at: None,
            next_run_at: None,
        }
    }

    pub fn interval_duration(&self) -> Result<Duration, IntervalError> {
        parse_interval(&self.interval)
    }

    /// Scheduling interval, or [`FALLBACK_INTERVAL`] when it is unusable
    pub fn effective_interval(&self) -> Duration {
        match self.interval_duration() {
            Ok(interval) if !interval.is_zero() => interval,
            Ok(_) => {
                warn!(check_id = %self.id, interval = %self.interval, "zero interval, using fallback");
                FALLBACK_INTERVAL
            }
            Err(e) => {
                warn!(check_id = %self.id, error = %e, "invalid interval, using fallback");
                FALLBACK_INTERVAL
            }
        }
    }

    /// When the check should run next if it runs at `now`
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.effective_interval())
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the check is due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_none_or(|next| next <= now)
    }

    /// Whether a worker in `region` may run this check
    pub fn runs_in(&self, region: Option<&str>) -> bool {
        match region {
            Some(region) if !self.regions.is_empty() => self.regions.iter().any(|r| r == region),
            _ => true,
        }
    }
}
