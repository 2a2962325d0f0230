//! Normalized response snapshots stored alongside results.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

/// Hard ceiling on how much of a response body is read
pub const MAX_RESPONSE_BODY_SIZE: usize = 1024 * 1024;
/// Textual bodies larger than this are stored base64 encoded
pub const MAX_TEXT_BODY_SIZE: usize = 500 * 1024;

const TEXT_TYPES: &[&str] = &[
    "text/",
    "application/json",
    "application/xml",
    "application/xhtml+xml",
    "application/javascript",
    "application/x-javascript",
    "application/ecmascript",
    "application/x-www-form-urlencoded",
    "application/atom+xml",
    "application/rss+xml",
    "application/soap+xml",
    "application/x-yaml",
    "application/yaml",
    "application/toml",
    "application/csv",
];

pub fn is_text_content(content_type: &str) -> bool {
    let content_type = content_type.trim().to_ascii_lowercase();
    !content_type.is_empty() && TEXT_TYPES.iter().any(|prefix| content_type.starts_with(prefix))
}

/// Snapshot of an HTTP response.
///
/// `truncated` is set when the reader stopped at [`MAX_RESPONSE_BODY_SIZE`].
pub fn http_snapshot(
    headers: &Value,
    content_type: &str,
    version: &str,
    body: &[u8],
    truncated: bool,
) -> Value {
    let text = is_text_content(content_type)
        && body.len() <= MAX_TEXT_BODY_SIZE
        && std::str::from_utf8(body).is_ok();

    let (body_value, encoding) = if body.is_empty() {
        (String::new(), "text")
    } else if text {
        (String::from_utf8_lossy(body).into_owned(), "text")
    } else {
        (STANDARD.encode(body), "base64")
    };

    json!({
        "type": "http",
        "headers": headers,
        "content_type": content_type,
        "proto": version,
        "body": body_value,
        "body_encoding": encoding,
        "body_size_bytes": body.len(),
        "body_truncated": truncated,
    })
}

pub fn tcp_snapshot(address: &str) -> Value {
    json!({
        "type": "tcp",
        "connection_status": "established",
        "address": address,
    })
}

pub fn heartbeat_snapshot() -> Value {
    json!({ "type": "heartbeat" })
}
