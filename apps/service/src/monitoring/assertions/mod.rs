//! Assertion evaluation against a cached response.
//!
//! Evaluation never fails: a missing path, an unparsable body or an
//! unsupported comparison all produce `passed = false` with an explanatory
//! error, and the remaining assertions still run.

mod path;

use std::cell::OnceCell;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{Assertion, AssertionSource, Comparison};

pub use path::{PathError, resolve_header, resolve_path};

/// Outcome of one assertion, in the same order as the input list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub assertion: Assertion,
    pub received: Option<Value>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response data shared by all assertions of one evaluation.
///
/// The JSON body is parsed at most once, on first use.
#[derive(Debug)]
pub struct ResponseCache {
    status_code: u16,
    elapsed_ms: u64,
    body: Vec<u8>,
    headers: Value,
    json: OnceCell<Result<Value, String>>,
}

impl ResponseCache {
    /// Build a cache from raw header pairs. Names are lowercased and repeated
    /// headers collapse into an array.
    pub fn new<'h>(
        status_code: u16,
        elapsed: Duration,
        headers: impl IntoIterator<Item = (&'h str, &'h str)>,
        body: Vec<u8>,
    ) -> Self {
        let mut map = Map::new();
        for (name, value) in headers {
            let name = name.to_ascii_lowercase();
            let value = Value::String(value.to_string());
            match map.get_mut(&name) {
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(name, value);
                }
            }
        }

        Self {
            status_code,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            body,
            headers: Value::Object(map),
            json: OnceCell::new(),
        }
    }

    pub fn headers(&self) -> &Value {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn body_json(&self) -> Result<&Value, String> {
        self.json
            .get_or_init(|| {
                serde_json::from_slice(&self.body).map_err(|e| format!("invalid JSON body: {e}"))
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Extract the value an assertion compares against
    fn received(&self, assertion: &Assertion) -> Result<Value, String> {
        let property = assertion.property.as_deref().filter(|p| !p.trim().is_empty());
        match assertion.source {
            AssertionSource::StatusCode => Ok(Value::from(self.status_code)),
            AssertionSource::ResponseTimeMs => Ok(Value::from(self.elapsed_ms)),
            AssertionSource::ResponseBodyText => Ok(Value::String(self.body_text())),
            AssertionSource::ResponseBodyJson => {
                let doc = self.body_json()?;
                match property {
                    Some(path) => resolve_path(doc, path).cloned().map_err(|e| e.to_string()),
                    None => Ok(doc.clone()),
                }
            }
            AssertionSource::ResponseHeaders => match property {
                Some(path) => {
                    resolve_header(&self.headers, path).cloned().map_err(|e| e.to_string())
                }
                None => Ok(self.headers.clone()),
            },
            AssertionSource::Unsupported => Err("unsupported assertion source".to_string()),
        }
    }
}

/// Evaluate a single assertion.
pub fn evaluate(assertion: &Assertion, cache: &ResponseCache) -> AssertionResult {
    let (received, outcome) = match cache.received(assertion) {
        Ok(value) => {
            let outcome = compare(assertion.comparison, &value, &assertion.target);
            (Some(value), outcome)
        }
        Err(error) => (None, Err(error)),
    };

    let (passed, error) = match outcome {
        Ok(passed) => (passed, None),
        Err(error) => (false, Some(error)),
    };

    AssertionResult { assertion: assertion.clone(), received, passed, error }
}

/// Evaluate every assertion against the same cache, preserving order.
pub fn evaluate_all(assertions: &[Assertion], cache: &ResponseCache) -> Vec<AssertionResult> {
    assertions.iter().map(|assertion| evaluate(assertion, cache)).collect()
}

fn compare(comparison: Comparison, received: &Value, target: &Value) -> Result<bool, String> {
    let ordered = |check: fn(f64, f64) -> bool| -> Result<bool, String> {
        match (as_number(received), as_number(target)) {
            (Some(left), Some(right)) => Ok(check(left, right)),
            _ => Err(format!("cannot compare {received} and {target} as numbers")),
        }
    };

    match comparison {
        Comparison::Equals => Ok(equals(received, target)),
        Comparison::NotEquals => Ok(!equals(received, target)),
        Comparison::Contains => Ok(contains(received, target)),
        Comparison::NotContains => Ok(!contains(received, target)),
        Comparison::IsEmpty => Ok(is_empty(received)),
        Comparison::IsNotEmpty => Ok(!is_empty(received)),
        Comparison::IsLessThan => ordered(|l, r| l < r),
        Comparison::IsLessThanOrEqualTo => ordered(|l, r| l <= r),
        Comparison::IsGreaterThan => ordered(|l, r| l > r),
        Comparison::IsGreaterThanOrEqualTo => ordered(|l, r| l >= r),
        Comparison::Unsupported => Err("unsupported comparison".to_string()),
    }
}

/// Numbers, and strings that look like numbers
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn equals(received: &Value, target: &Value) -> bool {
    match (as_number(received), as_number(target)) {
        (Some(left), Some(right)) => left == right,
        _ => received == target,
    }
}

fn contains(received: &Value, target: &Value) -> bool {
    let needle = stringify(target);
    match received {
        Value::Array(items) => {
            items.iter().any(|item| item == target || stringify(item) == needle)
        }
        Value::String(haystack) => haystack.contains(&needle),
        other => other.to_string().contains(&needle),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn cache(body: &str) -> ResponseCache {
        ResponseCache::new(
            200,
            Duration::from_millis(120),
            [
                ("Content-Type", "application/json"),
                ("Set-Cookie", "a=1"),
                ("set-cookie", "b=2"),
            ],
            body.as_bytes().to_vec(),
        )
    }

    fn assertion(
        source: AssertionSource,
        property: Option<&str>,
        comparison: Comparison,
        target: Value,
    ) -> Assertion {
        Assertion { source, property: property.map(str::to_string), comparison, target }
    }

    #[test]
    fn status_code_and_response_time() {
        let cache = cache("{}");
        let ok = evaluate(
            &assertion(AssertionSource::StatusCode, None, Comparison::Equals, json!(200)),
            &cache,
        );
        assert!(ok.passed);
        assert_eq!(ok.received, Some(json!(200)));

        let numeric_string = evaluate(
            &assertion(AssertionSource::StatusCode, None, Comparison::Equals, json!("200")),
            &cache,
        );
        assert!(numeric_string.passed);

        let fast = evaluate(
            &assertion(AssertionSource::ResponseTimeMs, None, Comparison::IsLessThan, json!(500)),
            &cache,
        );
        assert!(fast.passed);
    }

    #[test]
    fn json_body_paths() {
        let cache = cache(r#"{"data": {"items": [{"id": 7, "tags": ["a", "b"]}]}, "ok": true}"#);
        let results = evaluate_all(
            &[
                assertion(
                    AssertionSource::ResponseBodyJson,
                    Some("data.items[0].id"),
                    Comparison::IsGreaterThanOrEqualTo,
                    json!(7),
                ),
                assertion(
                    AssertionSource::ResponseBodyJson,
                    Some("data.items[0].tags"),
                    Comparison::Contains,
                    json!("b"),
                ),
                assertion(AssertionSource::ResponseBodyJson, Some("ok"), Comparison::Equals, json!(true)),
                assertion(
                    AssertionSource::ResponseBodyJson,
                    Some("data.items[3]"),
                    Comparison::IsNotEmpty,
                    Value::Null,
                ),
            ],
            &cache,
        );

        assert_eq!(results.iter().map(|r| r.passed).collect::<Vec<_>>(), [true, true, true, false]);
        assert!(results[3].received.is_none());
        assert!(results[3].error.as_deref().unwrap_or_default().contains("path not found"));
    }

    #[test]
    fn invalid_json_fails_only_json_assertions() {
        let cache = cache("not json");
        let results = evaluate_all(
            &[
                assertion(AssertionSource::ResponseBodyJson, Some("a"), Comparison::IsEmpty, Value::Null),
                assertion(AssertionSource::ResponseBodyText, None, Comparison::Contains, json!("json")),
            ],
            &cache,
        );
        assert!(!results[0].passed);
        assert!(results[1].passed);
    }

    #[test]
    fn headers_are_case_insensitive_and_collapse_repeats() {
        let cache = cache("");
        let content_type = evaluate(
            &assertion(
                AssertionSource::ResponseHeaders,
                Some("Content-Type"),
                Comparison::Contains,
                json!("json"),
            ),
            &cache,
        );
        assert!(content_type.passed);

        let cookies = evaluate(
            &assertion(
                AssertionSource::ResponseHeaders,
                Some("set-cookie"),
                Comparison::Contains,
                json!("b=2"),
            ),
            &cache,
        );
        assert_eq!(cookies.received, Some(json!(["a=1", "b=2"])));
        assert!(cookies.passed);
    }

    #[test]
    fn numeric_comparisons_fail_without_numbers() {
        let cache = cache(r#"{"name": "pulse"}"#);
        let result = evaluate(
            &assertion(AssertionSource::ResponseBodyJson, Some("name"), Comparison::IsLessThan, json!(3)),
            &cache,
        );
        assert!(!result.passed);
        assert!(result.error.is_some());
    }

    #[test]
    fn structural_equality_and_emptiness() {
        assert!(equals(&json!({"a": [1, 2]}), &json!({"a": [1, 2]})));
        assert!(!equals(&json!("up"), &json!("down")));
        assert!(equals(&json!("1.0"), &json!(1)));
        assert!(is_empty(&json!(null)) && is_empty(&json!("")) && is_empty(&json!([])));
        assert!(!is_empty(&json!(0)) && !is_empty(&json!(false)));
        assert!(contains(&json!([1, 2, 3]), &json!(2)));
        assert!(contains(&json!([1, 2, 3]), &json!("3")));
        assert!(contains(&json!({"k": "v"}), &json!("\"k\"")));
        assert!(!contains(&json!("abc"), &json!("d")));
    }

    #[test]
    fn unsupported_comparison_never_passes() {
        let cache = cache("{}");
        let result = evaluate(
            &assertion(AssertionSource::StatusCode, None, Comparison::Unsupported, json!(200)),
            &cache,
        );
        assert!(!result.passed);
        assert_eq!(result.received, Some(json!(200)));
    }
}
