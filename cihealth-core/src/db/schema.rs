//! Snapshot database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//!
//! References between tables are deliberately not declared as foreign keys:
//! the tables mirror the CI server's records as exported, and dangling
//! references are reported by the aggregator as integrity errors.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: CI snapshot tables
    r#"
    CREATE TABLE IF NOT EXISTS retention_policies (
        id               TEXT PRIMARY KEY,
        keep_forever     INTEGER NOT NULL DEFAULT 0,
        max_results      INTEGER,
        max_age_days     INTEGER
    );

    CREATE TABLE IF NOT EXISTS build_plans (
        id                  TEXT PRIMARY KEY,
        plan_key            TEXT NOT NULL,
        name                TEXT NOT NULL,
        project_key         TEXT NOT NULL,
        plan_type           TEXT NOT NULL,
        retention_policy_id TEXT
    );

    CREATE TABLE IF NOT EXISTS build_results (
        id               TEXT PRIMARY KEY,
        plan_id          TEXT NOT NULL,
        status           TEXT NOT NULL,
        created_at       DATETIME NOT NULL,
        duration_ms      INTEGER NOT NULL DEFAULT 0
    );

    -- size_bytes / file_count are NULL when the copy pattern could not be sized
    CREATE TABLE IF NOT EXISTS artifacts (
        id               TEXT PRIMARY KEY,
        result_id        TEXT NOT NULL,
        name             TEXT NOT NULL,
        pattern          TEXT NOT NULL,
        size_bytes       INTEGER,
        file_count       INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_build_results_plan ON build_results(plan_id);
    CREATE INDEX IF NOT EXISTS idx_artifacts_result ON artifacts(result_id);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
