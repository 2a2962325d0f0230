//! Property paths such as `data.items[0].id`.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step<'p> {
    Key(&'p str),
    Index(usize),
}

/// Split a path into keys and indexes, rejecting malformed syntax.
fn parse(path: &str) -> Result<Vec<Step<'_>>, PathError> {
    let invalid = |why: &str| PathError::Invalid(format!("{why} in `{path}`"));

    if path.trim().is_empty() {
        return Err(invalid("empty path"));
    }

    let mut steps = Vec::new();
    for segment in path.split('.') {
        let (key, mut rest) = match segment.find(['[', ']']) {
            Some(pos) => segment.split_at(pos),
            None => (segment, ""),
        };

        if key.is_empty() && rest.is_empty() {
            return Err(invalid("empty segment"));
        }
        if !key.is_empty() {
            steps.push(Step::Key(key));
        }

        while !rest.is_empty() {
            let Some(inner) = rest.strip_prefix('[') else {
                return Err(invalid("unmatched bracket"));
            };
            let Some(close) = inner.find(']') else {
                return Err(invalid("unmatched bracket"));
            };
            let index = &inner[..close];
            if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("non-numeric index"));
            }
            let index = index.parse().map_err(|_| invalid("index out of range"))?;
            steps.push(Step::Index(index));
            rest = &inner[close + 1..];
        }
    }

    Ok(steps)
}

/// Resolve `path` inside `root`.
pub fn resolve_path<'v>(root: &'v Value, path: &str) -> Result<&'v Value, PathError> {
    let mut current = root;
    for step in parse(path)? {
        current = match (step, current) {
            (Step::Key(key), Value::Object(map)) => map.get(key),
            (Step::Index(index), Value::Array(items)) => items.get(index),
            _ => None,
        }
        .ok_or_else(|| PathError::NotFound(path.to_string()))?;
    }
    Ok(current)
}

/// Resolve a header path. Header names are stored lowercased, so the lookup
/// is case-insensitive.
pub fn resolve_header<'v>(headers: &'v Value, path: &str) -> Result<&'v Value, PathError> {
    resolve_path(headers, &path.to_ascii_lowercase())
}
