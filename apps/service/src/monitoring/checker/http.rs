use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, redirect};
use serde_json::Value;
use url::Url;

use crate::models::{Check, IpVersion};
use crate::monitoring::assertions::{AssertionResult, ResponseCache, evaluate_all};
use crate::monitoring::response::http_snapshot;
use crate::monitoring::status::{StatusInputs, Thresholds, evaluate_status};
use crate::monitoring::types::{CheckResult, CheckStatus, FailureReason};

use super::{Checker, CheckerOptions, literal_version_mismatch};

const MAX_REDIRECTS: usize = 10;

/// HTTP/HTTPS checker.
///
/// A client is built per execution because TLS verification, redirects and
/// the local bind address all depend on the check.
pub struct HttpChecker {
    timeout: Duration,
    max_body_bytes: usize,
    user_agent: String,
}

impl HttpChecker {
    pub fn new(options: &CheckerOptions) -> Self {
        Self {
            timeout: options.http_timeout,
            max_body_bytes: options.max_body_bytes,
            user_agent: options.user_agent.clone(),
        }
    }

    fn client_for(&self, check: &Check) -> reqwest::Result<reqwest::Client> {
        let redirects = if check.follow_redirects {
            redirect::Policy::limited(MAX_REDIRECTS)
        } else {
            redirect::Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .danger_accept_invalid_certs(check.skip_ssl_verification)
            .redirect(redirects);

        if let Some(version) = check.ip_version {
            let local = match version {
                IpVersion::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpVersion::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            };
            builder = builder.local_address(local);
        }

        builder.build()
    }
}

/// Build the request URL, bracketing IPv6 literals and appending query params.
pub fn build_url(check: &Check) -> Result<Url, url::ParseError> {
    let scheme = if check.secure { "https" } else { "http" };
    let host = if check.host.contains(':') && !check.host.starts_with('[') {
        format!("[{}]", check.host)
    } else {
        check.host.clone()
    };

    let mut url = Url::parse(&format!("{scheme}://{host}:{}", check.port))?;
    url.set_path(&check.path);
    if !check.query_params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &check.query_params {
            match value {
                Value::String(s) => pairs.append_pair(key, s),
                other => pairs.append_pair(key, &other.to_string()),
            };
        }
    }
    Ok(url)
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, check: &Check) -> CheckResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let result = CheckResult::started_at(check.id, started_at);

        if let Some(message) = literal_version_mismatch(&check.host, check.ip_version) {
            return result.failure(FailureReason::IpVersionMismatch, message);
        }

        let client = match self.client_for(check) {
            Ok(client) => client,
            Err(e) => return result.failure(FailureReason::Agent, error_chain(&e)),
        };
        let url = match build_url(check) {
            Ok(url) => url,
            Err(e) => return result.failure(FailureReason::Unknown, format!("invalid URL: {e}")),
        };
        let method = match Method::from_bytes(check.method.trim().to_ascii_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return result
                    .failure(FailureReason::Unknown, format!("invalid method: {}", check.method));
            }
        };

        let mut request = client.request(method, url);
        for (name, values) in &check.headers {
            for value in values.values() {
                request = request.header(name.as_str(), value);
            }
        }
        if let Some(body) = &check.body {
            request = request.body(body.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let reason =
                    if e.is_timeout() { FailureReason::RequestTimeout } else { classify(&e) };
                let mut result = result.failure(reason, error_chain(&e));
                result.total_time_ms = millis(clock.elapsed());
                return result;
            }
        };

        let first_byte_at = Utc::now();
        let ttfb = clock.elapsed();
        let status_code = response.status().as_u16();
        let remote = response.remote_addr();
        let version = format!("{:?}", response.version());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let header_pairs: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();

        let mut result = match remote {
            Some(addr) => result.with_remote(addr.ip()),
            None => result,
        };
        result.response_status = Some(status_code);
        result.first_byte_at = Some(first_byte_at);

        let (body, truncated) = match read_capped(response, self.max_body_bytes).await {
            Ok(read) => read,
            Err(e) => {
                let reason =
                    if e.is_timeout() { FailureReason::DownloadTimeout } else { classify(&e) };
                let mut result = result.failure(reason, error_chain(&e));
                result.total_time_ms = millis(clock.elapsed());
                return result;
            }
        };

        let ended_at = Utc::now();
        let total = clock.elapsed();
        if ended_at < started_at || first_byte_at < started_at {
            return result.failure(FailureReason::Agent, "response timeline ends before it starts");
        }

        let cache = ResponseCache::new(
            status_code,
            total,
            header_pairs.iter().map(|(name, value)| (name.as_str(), value.as_str())),
            body,
        );
        let assertion_results = evaluate_all(&check.assertions, &cache);
        let thresholds = Thresholds::of(check);

        result.status = evaluate_status(&StatusInputs {
            transport_error: false,
            timed_out: false,
            status_code,
            assertions_passed: assertion_results.iter().all(|a| a.passed),
            latency_ms: millis(total),
            thresholds,
        });
        if result.status == CheckStatus::Failing {
            result.failure_reason =
                Some(failure_reason(status_code, &assertion_results, ttfb, total, thresholds));
        }

        result.response_ended_at = Some(ended_at);
        result.total_time_ms = millis(total);
        result.response_size_bytes = cache.body().len() as u64;
        result.response =
            http_snapshot(cache.headers(), &content_type, &version, cache.body(), truncated);
        result.assertion_results = assertion_results;

        let timings = &mut result.network_timings;
        timings.insert("request_start".into(), timestamp(started_at));
        timings.insert("first_byte".into(), timestamp(first_byte_at));
        timings.insert("response_end".into(), timestamp(ended_at));
        timings.insert("ttfb_us".into(), micros(ttfb).into());
        timings.insert("download_us".into(), micros(total.saturating_sub(ttfb)).into());
        timings.insert("response_time_us".into(), micros(total).into());

        result
    }
}

/// Read the body up to `limit` bytes. The flag reports whether bytes were
/// left unread.
async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
) -> reqwest::Result<(Vec<u8>, bool)> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit.saturating_sub(body.len());
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

/// Pick the most specific reason for a failing verdict on a received response
fn failure_reason(
    status_code: u16,
    assertions: &[AssertionResult],
    ttfb: Duration,
    total: Duration,
    thresholds: Thresholds,
) -> FailureReason {
    if assertions.iter().any(|a| !a.passed) {
        return FailureReason::AssertionFailed;
    }
    if status_code >= 500 {
        return FailureReason::Http5xx;
    }
    if status_code >= 400 {
        return FailureReason::Http4xx;
    }

    let failed = Duration::from_millis(thresholds.failed_ms);
    if !failed.is_zero() && total >= failed {
        let download = total.saturating_sub(ttfb);
        if ttfb > failed || ttfb.as_secs_f64() > total.as_secs_f64() * 0.8 {
            return FailureReason::TtfbTimeout;
        }
        if download > failed / 2 && download.as_secs_f64() > total.as_secs_f64() * 0.8 {
            return FailureReason::DownloadTimeout;
        }
        return FailureReason::RequestTimeout;
    }

    FailureReason::Unknown
}

fn classify(error: &reqwest::Error) -> FailureReason {
    FailureReason::classify(&error_chain(error))
}

/// Flatten an error and its sources into one line
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
