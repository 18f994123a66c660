//! Snapshot database repository layer
//!
//! Provides import operations for CI records and the paged, read-only
//! [`BuildStore`] queries the extractor runs against them.

use crate::error::{Error, Result};
use crate::source::{BuildStore, PageRequest, SnapshotSupport};
use crate::types::*;
use chrono::{DateTime, NaiveDateTime, Utc};
use super::schema::{get_schema_version, SCHEMA_VERSION};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Separator used when folding artifact ids into one column.
const ID_SEPARATOR: char = '\u{1f}';

/// Handle to a SQLite copy of a CI server's state (single connection)
pub struct SnapshotDatabase {
    conn: Mutex<Connection>,
}

impl SnapshotDatabase {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing database for analysis without writing to it.
    ///
    /// No migration runs and no pragma is persisted. A missing file, or one
    /// whose schema version differs from [`SCHEMA_VERSION`], is a data
    /// source error.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            Error::DataSource(format!("cannot open {} read-only: {}", path.display(), e))
        })?;

        let version = get_schema_version(&conn)
            .map_err(|e| e.into_data_source(&path.display().to_string()))?;
        if version != SCHEMA_VERSION {
            return Err(Error::DataSource(format!(
                "{} has schema version {}, expected {}",
                path.display(),
                version,
                SCHEMA_VERSION
            )));
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection()?;
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::DataSource("snapshot database lock poisoned".to_string()))
    }

    // ============================================
    // Import operations
    // ============================================

    /// Insert a retention policy
    pub fn insert_retention_policy(&self, policy: &RetentionPolicy) -> Result<()> {
        let conn = self.connection()?;
        Self::write_policy(&conn, policy)
    }

    /// Insert a build plan
    pub fn insert_plan(&self, plan: &BuildPlan) -> Result<()> {
        let conn = self.connection()?;
        Self::write_plan(&conn, plan)
    }

    /// Insert a build result
    ///
    /// `artifact_ids` is not stored: it is derived from the artifacts table
    /// when results are fetched.
    pub fn insert_result(&self, result: &BuildResult) -> Result<()> {
        let conn = self.connection()?;
        Self::write_result(&conn, result)
    }

    /// Insert an artifact
    pub fn insert_artifact(&self, artifact: &Artifact) -> Result<()> {
        let conn = self.connection()?;
        Self::write_artifact(&conn, artifact)
    }

    /// Import a whole snapshot in one transaction
    pub fn import_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;

        for policy in &snapshot.policies {
            Self::write_policy(&tx, policy)?;
        }
        for plan in &snapshot.plans {
            Self::write_plan(&tx, plan)?;
        }
        for result in &snapshot.results {
            Self::write_result(&tx, result)?;
        }
        for artifact in &snapshot.artifacts {
            Self::write_artifact(&tx, artifact)?;
        }

        tx.commit()?;

        tracing::info!(records = snapshot.record_count(), "Snapshot imported");
        Ok(())
    }

    fn write_policy(conn: &Connection, policy: &RetentionPolicy) -> Result<()> {
        let (keep_forever, max_results, max_age_days) = match policy.rule {
            RetentionRule::KeepForever => (true, None, None),
            RetentionRule::Expire {
                max_results,
                max_age_days,
            } => (false, max_results, max_age_days),
        };
        conn.execute(
            "INSERT INTO retention_policies (id, keep_forever, max_results, max_age_days)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                policy.id,
                keep_forever,
                max_results.map(to_sql_int).transpose()?,
                max_age_days.map(to_sql_int).transpose()?,
            ],
        )?;
        Ok(())
    }

    fn write_plan(conn: &Connection, plan: &BuildPlan) -> Result<()> {
        conn.execute(
            "INSERT INTO build_plans (id, plan_key, name, project_key, plan_type, retention_policy_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                plan.id,
                plan.key,
                plan.name,
                plan.project_key,
                plan.kind.as_str(),
                plan.retention_policy_id,
            ],
        )?;
        Ok(())
    }

    fn write_result(conn: &Connection, result: &BuildResult) -> Result<()> {
        conn.execute(
            "INSERT INTO build_results (id, plan_id, status, created_at, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.id,
                result.plan_id,
                result.status.as_str(),
                result.created_at.to_rfc3339(),
                to_sql_int(result.duration_ms)?,
            ],
        )?;
        Ok(())
    }

    fn write_artifact(conn: &Connection, artifact: &Artifact) -> Result<()> {
        let (size_bytes, file_count) = match artifact.size {
            ArtifactSize::Known { bytes, files } => (Some(to_sql_int(bytes)?), Some(to_sql_int(files)?)),
            ArtifactSize::Unresolved => (None, None),
        };
        conn.execute(
            "INSERT INTO artifacts (id, result_id, name, pattern, size_bytes, file_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                artifact.id,
                artifact.result_id,
                artifact.name,
                artifact.pattern,
                size_bytes,
                file_count,
            ],
        )?;
        Ok(())
    }

    // ============================================
    // Snapshot pinning
    // ============================================

    fn begin_read(&self) -> Result<()> {
        let conn = self.connection()?;
        // A deferred transaction takes its read snapshot at the first read.
        conn.execute_batch("BEGIN DEFERRED")?;
        let pinned: rusqlite::Result<i64> =
            conn.query_row("SELECT COUNT(*) FROM build_plans", [], |r| r.get(0));
        if let Err(e) = pinned {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }
        tracing::debug!("Pinned read snapshot");
        Ok(())
    }

    fn end_read(&self) -> Result<()> {
        let conn = self.connection()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }
}

// ============================================
// Row conversion
// ============================================

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| Error::DataSource(format!("value {} does not fit in an INTEGER column", value)))
}

fn non_negative(value: i64, what: &str, id: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| Error::DataSource(format!("{} {}: negative value {}", what, id, value)))
}

/// Parse a stored timestamp: RFC 3339, or the server's `YYYY-MM-DD HH:MM:SS` in UTC.
fn parse_timestamp(value: &str, id: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::DataSource(format!("result {}: malformed created_at '{}'", id, value)))
}

type PolicyRow = (String, i64, Option<i64>, Option<i64>);
type ResultRow = (String, String, String, String, i64, Option<String>);
type ArtifactRow = (String, String, String, String, Option<i64>, Option<i64>);

fn policy_from_row((id, keep_forever, max_results, max_age_days): PolicyRow) -> Result<RetentionPolicy> {
    let rule = match keep_forever {
        1 => RetentionRule::KeepForever,
        0 => RetentionRule::Expire {
            max_results: max_results
                .map(|v| non_negative(v, "retention policy", &id))
                .transpose()?,
            max_age_days: max_age_days
                .map(|v| non_negative(v, "retention policy", &id))
                .transpose()?,
        },
        other => {
            return Err(Error::DataSource(format!(
                "retention policy {}: unknown keep_forever flag {}",
                id, other
            )))
        }
    };
    Ok(RetentionPolicy { id, rule })
}

fn result_from_row(
    (id, plan_id, status, created_at, duration_ms, artifact_ids): ResultRow,
) -> Result<BuildResult> {
    let created_at = parse_timestamp(&created_at, &id)?;
    let duration_ms = non_negative(duration_ms, "result", &id)?;
    let artifact_ids = artifact_ids
        .map(|ids| ids.split(ID_SEPARATOR).map(str::to_string).collect())
        .unwrap_or_default();

    Ok(BuildResult {
        id,
        plan_id,
        status: BuildStatus::from_storage(&status),
        created_at,
        duration_ms,
        artifact_ids,
    })
}

fn artifact_from_row(
    (id, result_id, name, pattern, size_bytes, file_count): ArtifactRow,
) -> Result<Artifact> {
    let size = match (size_bytes, file_count) {
        (Some(bytes), Some(files)) => ArtifactSize::Known {
            bytes: non_negative(bytes, "artifact", &id)?,
            files: non_negative(files, "artifact", &id)?,
        },
        (None, None) => ArtifactSize::Unresolved,
        _ => {
            return Err(Error::DataSource(format!(
                "artifact {}: size and file count must both be known or both unresolved",
                id
            )))
        }
    };

    Ok(Artifact {
        id,
        result_id,
        name,
        pattern,
        size,
    })
}

impl BuildStore for SnapshotDatabase {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn fetch_plans(&self, page: PageRequest) -> Result<Vec<BuildPlan>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, plan_key, name, project_key, plan_type, retention_policy_id
             FROM build_plans ORDER BY rowid LIMIT ?1 OFFSET ?2",
        )?;

        let plans = stmt
            .query_map(params![page.limit as i64, page.offset as i64], |row| {
                let plan_type: String = row.get(4)?;
                Ok(BuildPlan {
                    id: row.get(0)?,
                    key: row.get(1)?,
                    name: row.get(2)?,
                    project_key: row.get(3)?,
                    kind: PlanKind::from_storage(&plan_type),
                    retention_policy_id: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(plans)
    }

    fn fetch_results(&self, page: PageRequest) -> Result<Vec<BuildResult>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.plan_id, r.status, r.created_at, r.duration_ms,
                    (SELECT group_concat(a.id, char(31))
                     FROM (SELECT id FROM artifacts WHERE result_id = r.id ORDER BY rowid) a)
             FROM build_results r ORDER BY r.rowid LIMIT ?1 OFFSET ?2",
        )?;

        let rows = stmt
            .query_map(params![page.limit as i64, page.offset as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<ResultRow>, _>>()?;

        rows.into_iter().map(result_from_row).collect()
    }

    fn fetch_artifacts(&self, page: PageRequest) -> Result<Vec<Artifact>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, result_id, name, pattern, size_bytes, file_count
             FROM artifacts ORDER BY rowid LIMIT ?1 OFFSET ?2",
        )?;

        let rows = stmt
            .query_map(params![page.limit as i64, page.offset as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<ArtifactRow>, _>>()?;

        rows.into_iter().map(artifact_from_row).collect()
    }

    fn fetch_retention_policies(&self, page: PageRequest) -> Result<Vec<RetentionPolicy>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, keep_forever, max_results, max_age_days
             FROM retention_policies ORDER BY rowid LIMIT ?1 OFFSET ?2",
        )?;

        let rows = stmt
            .query_map(params![page.limit as i64, page.offset as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<std::result::Result<Vec<PolicyRow>, _>>()?;

        rows.into_iter().map(policy_from_row).collect()
    }

    fn begin_snapshot(&self) -> Result<SnapshotSupport> {
        self.begin_read()?;
        Ok(SnapshotSupport::Pinned)
    }

    fn end_snapshot(&self) -> Result<()> {
        self.end_read()
    }
}
