use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool::managed::Object;
use libsql::{Builder, Row, params};
use tracing::warn;
use uuid::Uuid;

use super::migrations::run_migrations;
use super::{CheckStore, HistorySink, StoreError};
use crate::models::Check;
use crate::monitoring::types::{CheckResult, CheckStatus};
use crate::pool::{LibsqlManager, LibsqlPool};

const POOL_SIZE: usize = 8;

const CHECK_COLUMNS: &str = "definition, last_status, last_run_at, next_run_at, id";

/// LibSQL-backed check store and run history
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    /// Open (or create) a local database file and migrate it
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let database = Builder::new_local(path.as_ref()).build().await?;
        let pool = LibsqlPool::builder(LibsqlManager::new(database))
            .max_size(POOL_SIZE)
            .build()
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let store = Self::new_from_pool(pool);
        let conn = store.get_conn().await?;
        run_migrations(&conn).await?;
        Ok(store)
    }

    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<Object<LibsqlManager>, StoreError> {
        self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

/// Rebuild a check from its JSON definition and scheduling columns
fn check_from_row(row: &Row) -> Result<Check, StoreError> {
    let definition: String = row.get(0)?;
    let mut check: Check = serde_json::from_str(&definition)?;
    check.last_status = CheckStatus::from_db(&row.get::<String>(1)?);
    check.last_run_at = from_millis(row.get(2)?);
    check.next_run_at = from_millis(row.get(3)?);
    Ok(check)
}

#[async_trait]
impl CheckStore for LibsqlStore {
    async fn get_due_checks(
        &self,
        now: DateTime<Utc>,
        region: Option<&str>,
    ) -> Result<Vec<Check>, StoreError> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHECK_COLUMNS} FROM checks
                 WHERE enabled = 1 AND (next_run_at IS NULL OR next_run_at <= ?)
                 ORDER BY COALESCE(next_run_at, 0)"
            ))
            .await?;

        let mut rows = stmt.query(params![to_millis(now)]).await?;
        let mut checks = Vec::new();
        while let Some(row) = rows.next().await? {
            match check_from_row(&row) {
                Ok(check) if check.runs_in(region) => checks.push(check),
                Ok(_) => {}
                Err(e) => {
                    let id: String = row.get(4).unwrap_or_default();
                    warn!(check_id = %id, error = %e, "skipping unreadable check");
                }
            }
        }
        Ok(checks)
    }

    async fn get_check(&self, id: Uuid) -> Result<Check, StoreError> {
        let conn = self.get_conn().await?;
        let mut stmt =
            conn.prepare(&format!("SELECT {CHECK_COLUMNS} FROM checks WHERE id = ?")).await?;
        let mut rows = stmt.query(params![id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => check_from_row(&row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn update_check_status(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        last_status: CheckStatus,
    ) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE checks SET last_run_at = ?, next_run_at = ?, last_status = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    to_millis(last_run_at),
                    to_millis(next_run_at),
                    last_status.as_str(),
                    to_millis(Utc::now()),
                    id.to_string()
                ],
            )
            .await?;

        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn save_check(&self, check: &Check) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        let definition = serde_json::to_string(check)?;
        let now = to_millis(Utc::now());

        conn.execute(
            "INSERT INTO checks (id, name, enabled, definition, last_status, last_run_at, next_run_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                enabled = excluded.enabled,
                definition = excluded.definition,
                updated_at = excluded.updated_at",
            params![
                check.id.to_string(),
                check.name.clone(),
                i64::from(check.enabled),
                definition,
                check.last_status.as_str(),
                check.last_run_at.map(to_millis),
                check.next_run_at.map(to_millis),
                now
            ],
        )
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT 1", ()).await?;
        rows.next().await?;
        Ok(())
    }
}

#[async_trait]
impl HistorySink for LibsqlStore {
    async fn record_run(&self, check: &Check, result: &CheckResult) -> Result<u64, StoreError> {
        let conn = self.get_conn().await?;
        let payload = serde_json::to_string(result)?;
        let failure_reason = result.failure_reason.map(|reason| reason.as_str());

        // Run number is assigned inside the insert itself
        let mut rows = conn
            .query(
                "INSERT INTO check_runs (check_id, run_number, status, failure_reason, started_at, total_time_ms, attempts, result, created_at)
                 SELECT ?1, COALESCE(MAX(run_number), 0) + 1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                 FROM check_runs WHERE check_id = ?1
                 RETURNING run_number",
                params![
                    check.id.to_string(),
                    result.status.as_str(),
                    failure_reason,
                    to_millis(result.request_started_at),
                    i64::try_from(result.total_time_ms).unwrap_or(i64::MAX),
                    i64::from(result.attempts),
                    payload,
                    to_millis(Utc::now())
                ],
            )
            .await?;

        let row = rows.next().await?.ok_or(libsql::Error::QueryReturnedNoRows)?;
        let run_number: i64 = row.get(0)?;
        Ok(u64::try_from(run_number).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tempfile::TempDir;

    use super::*;
    use crate::monitoring::types::FailureReason;

    async fn store() -> (TempDir, LibsqlStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LibsqlStore::open(dir.path().join("pulse.db")).await.expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn saves_and_loads_checks() {
        let (_dir, store) = store().await;
        let mut check = Check::new("api", "api.internal");
        check.port = 8443;
        check.secure = true;
        store.save_check(&check).await.expect("save");

        let loaded = store.get_check(check.id).await.expect("load");
        assert_eq!(loaded.name, "api");
        assert_eq!(loaded.port, 8443);
        assert!(loaded.secure);
        assert_eq!(loaded.last_status, CheckStatus::Unknown);
        assert!(loaded.next_run_at.is_none());
    }

    #[tokio::test]
    async fn due_checks_follow_next_run() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        let due = Check::new("due", "a");
        let later = Check::new("later", "b");
        let off = Check { enabled: false, ..Check::new("off", "c") };
        for check in [&due, &later, &off] {
            store.save_check(check).await.expect("save");
        }
        store
            .update_check_status(later.id, now, now + Duration::minutes(10), CheckStatus::Passing)
            .await
            .expect("update");

        let found = store.get_due_checks(now, None).await.expect("due");
        assert_eq!(found.iter().map(|c| c.id).collect::<Vec<_>>(), vec![due.id]);

        let found = store.get_due_checks(now + Duration::minutes(11), None).await.expect("due");
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn unreadable_rows_do_not_block_discovery() {
        let (_dir, store) = store().await;
        let good = Check::new("good", "a");
        store.save_check(&good).await.expect("save");

        let conn = store.get_conn().await.expect("conn");
        conn.execute(
            "INSERT INTO checks (id, name, enabled, definition, last_status, created_at, updated_at)
             VALUES (?1, 'broken', 1, '{not json', 'unknown', 0, 0)",
            params![Uuid::new_v4().to_string()],
        )
        .await
        .expect("insert");

        let found = store.get_due_checks(Utc::now(), None).await.expect("due");
        assert_eq!(found.iter().map(|c| c.id).collect::<Vec<_>>(), vec![good.id]);
    }

    #[tokio::test]
    async fn status_updates_survive_reimport() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        let check = Check::new("api", "a");
        store.save_check(&check).await.expect("save");
        store
            .update_check_status(check.id, now, now + Duration::minutes(1), CheckStatus::Degraded)
            .await
            .expect("update");

        store.save_check(&Check { name: "renamed".into(), ..check.clone() }).await.expect("resave");
        let loaded = store.get_check(check.id).await.expect("load");
        assert_eq!(loaded.name, "renamed");
        assert_eq!(loaded.last_status, CheckStatus::Degraded);
        assert_eq!(loaded.last_run_at.map(|t| t.timestamp_millis()), Some(now.timestamp_millis()));
    }

    #[tokio::test]
    async fn unknown_checks_are_not_found() {
        let (_dir, store) = store().await;
        let id = Uuid::new_v4();
        assert!(matches!(store.get_check(id).await, Err(StoreError::NotFound(_))));
        let now = Utc::now();
        assert!(matches!(
            store.update_check_status(id, now, now, CheckStatus::Failing).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn run_numbers_increase_per_check() {
        let (_dir, store) = store().await;
        let a = Check::new("a", "a");
        let b = Check::new("b", "b");

        let failing = CheckResult::new(a.id).failure(FailureReason::Dns, "no such host");
        assert_eq!(store.record_run(&a, &failing).await.expect("run"), 1);
        assert_eq!(store.record_run(&a, &CheckResult::new(a.id)).await.expect("run"), 2);
        assert_eq!(store.record_run(&b, &CheckResult::new(b.id)).await.expect("run"), 1);
        assert_eq!(store.record_run(&a, &CheckResult::new(a.id)).await.expect("run"), 3);
    }

    #[tokio::test]
    async fn health_check_answers() {
        let (_dir, store) = store().await;
        store.health_check().await.expect("healthy");
    }
}
