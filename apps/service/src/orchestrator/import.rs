use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::CheckStore;
use crate::models::Check;

/// Namespace for ids derived from check names
const CHECK_NAMESPACE: Uuid = Uuid::from_u128(0x6d1f_3c2a_94b7_4e0f_8a51_2c7e_b0d4_91a3);

/// A check definition file: any number of `[[checks]]` tables
#[derive(Debug, Default)]
pub struct CheckFile {
    pub checks: Vec<Check>,
}

#[derive(Deserialize)]
struct RawCheckFile {
    #[serde(default)]
    checks: Vec<toml::Table>,
}

impl CheckFile {
    /// Parse definitions. A definition without an `id` gets one derived
    /// from its name, so importing the same file twice updates in place.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw: RawCheckFile = toml::from_str(raw).context("invalid check definition file")?;

        let mut seen = HashSet::new();
        let mut checks = Vec::with_capacity(raw.checks.len());
        for (index, mut table) in raw.checks.into_iter().enumerate() {
            if !table.contains_key("id") {
                let Some(name) = table.get("name").and_then(toml::Value::as_str) else {
                    bail!("check #{} has neither an id nor a name", index + 1);
                };
                let id = Uuid::new_v5(&CHECK_NAMESPACE, name.as_bytes());
                table.insert("id".into(), toml::Value::String(id.to_string()));
            }

            let check: Check = toml::Value::Table(table)
                .try_into()
                .with_context(|| format!("invalid check #{}", index + 1))?;
            if !seen.insert(check.id) {
                bail!("duplicate check {} ({})", check.id, check.name);
            }
            checks.push(check);
        }

        Ok(Self { checks })
    }
}

/// Load check definitions from `path` into `store`. Checks that already
/// exist keep their scheduling state. Returns how many were saved.
pub async fn import_checks(store: &dyn CheckStore, path: &Path) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file = CheckFile::parse(&raw).with_context(|| path.display().to_string())?;

    for check in &file.checks {
        if let Err(e) = check.interval_duration() {
            warn!(check_id = %check.id, name = %check.name, error = %e, "invalid interval, fallback applies");
        }
        store
            .save_check(check)
            .await
            .with_context(|| format!("failed to save check {}", check.name))?;
    }

    info!(count = file.checks.len(), path = %path.display(), "checks imported");
    Ok(file.checks.len())
}
