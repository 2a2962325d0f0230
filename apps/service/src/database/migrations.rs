use libsql::Connection;

use super::StoreError;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Bring the schema up to date. Safe to call on every start.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;
    if current_version >= SCHEMA_VERSION {
        tracing::debug!(version = current_version, "database schema is up to date");
        return Ok(());
    }

    tracing::info!(from = current_version, to = SCHEMA_VERSION, "running database migrations");

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Checks and run history").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Index due checks and runs").await?;
    }

    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32, StoreError> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(
    conn: &Connection,
    version: i32,
    description: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, chrono::Utc::now().timestamp_millis(), description],
    )
    .await?;

    tracing::info!(version, description, "applied migration");
    Ok(())
}

/// Migration v1: check definitions and their run history
async fn run_migration_v1(conn: &Connection) -> Result<(), StoreError> {
    // Definition as JSON, scheduling state in columns
    conn.execute(
        "CREATE TABLE IF NOT EXISTS checks (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            definition TEXT NOT NULL,
            last_status TEXT NOT NULL DEFAULT 'unknown',
            last_run_at INTEGER,
            next_run_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS check_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            check_id TEXT NOT NULL,
            run_number INTEGER NOT NULL,
            status TEXT NOT NULL,
            failure_reason TEXT,
            started_at INTEGER NOT NULL,
            total_time_ms INTEGER NOT NULL,
            attempts INTEGER NOT NULL,
            result TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (check_id, run_number)
        )",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: indexes for due-check discovery
async fn run_migration_v2(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_checks_due ON checks (enabled, next_run_at)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_check_runs_check ON check_runs (check_id, created_at)",
        (),
    )
    .await?;
    Ok(())
}
