//! Sync Run Persistence
//!
//! The per-file error log is stored as a JSON column; it is read and written
//! whole with the run, never queried into.

use crate::error::{Result, SyncError};
use crate::mapping::CaseId;
use crate::run::{FileError, SyncCounts, SyncRun, SyncRunId, SyncStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Storage contract for sync runs.
#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    async fn insert(&self, run: &SyncRun) -> Result<()>;

    /// Persist the run's current counts, progress, errors, and status.
    async fn update(&self, run: &SyncRun) -> Result<()>;

    async fn find(&self, id: SyncRunId) -> Result<Option<SyncRun>>;

    /// Runs for a case, most recent first.
    async fn list_for_case(&self, case_id: CaseId) -> Result<Vec<SyncRun>>;
}

/// SQLite implementation of [`SyncRunRepository`].
pub struct SqliteSyncRunRepository {
    pool: SqlitePool,
}

impl SqliteSyncRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_runs (
                id TEXT PRIMARY KEY,
                case_id TEXT NOT NULL,
                status TEXT NOT NULL,
                files_found INTEGER NOT NULL DEFAULT 0,
                files_new INTEGER NOT NULL DEFAULT 0,
                files_updated INTEGER NOT NULL DEFAULT 0,
                files_skipped INTEGER NOT NULL DEFAULT 0,
                files_error INTEGER NOT NULL DEFAULT 0,
                files_queued INTEGER NOT NULL DEFAULT 0,
                errors TEXT NOT NULL DEFAULT '[]',
                files_processed INTEGER NOT NULL DEFAULT 0,
                total_files INTEGER NOT NULL DEFAULT 0,
                started_at INTEGER NOT NULL,
                completed_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Backstop for the in-memory guard: at most one run in progress per
        // case even if a second process shares the database
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_runs_active
            ON sync_runs (case_id)
            WHERE status = 'in_progress'
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_runs_case ON sync_runs (case_id, started_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_run(row: &SqliteRow) -> Result<SyncRun> {
        let id: String = row.get("id");
        let case_id: String = row.get("case_id");
        let status: String = row.get("status");
        let errors: String = row.get("errors");
        let errors: Vec<FileError> = serde_json::from_str(&errors)
            .map_err(|e| SyncError::Database(format!("bad error log: {}", e)))?;

        Ok(SyncRun {
            id: SyncRunId::from_string(&id)
                .map_err(|e| SyncError::Database(format!("bad run id: {}", e)))?,
            case_id: CaseId::from_string(&case_id)
                .map_err(|e| SyncError::Database(format!("bad case id: {}", e)))?,
            status: SyncStatus::parse(&status)
                .ok_or_else(|| SyncError::Database(format!("bad status: {}", status)))?,
            counts: SyncCounts {
                files_found: row.get::<i64, _>("files_found") as u32,
                files_new: row.get::<i64, _>("files_new") as u32,
                files_updated: row.get::<i64, _>("files_updated") as u32,
                files_skipped: row.get::<i64, _>("files_skipped") as u32,
                files_error: row.get::<i64, _>("files_error") as u32,
                files_queued: row.get::<i64, _>("files_queued") as u32,
            },
            errors,
            files_processed: row.get::<i64, _>("files_processed") as u32,
            total_files: row.get::<i64, _>("total_files") as u32,
            started_at: timestamp(row.get("started_at"))?,
            completed_at: row
                .get::<Option<i64>, _>("completed_at")
                .map(timestamp)
                .transpose()?,
        })
    }

    fn errors_json(run: &SyncRun) -> Result<String> {
        serde_json::to_string(&run.errors)
            .map_err(|e| SyncError::Database(format!("error log serialization: {}", e)))
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| SyncError::Database(format!("bad timestamp: {}", secs)))
}

#[async_trait]
impl SyncRunRepository for SqliteSyncRunRepository {
    async fn insert(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (
                id, case_id, status,
                files_found, files_new, files_updated, files_skipped, files_error, files_queued,
                errors, files_processed, total_files, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.case_id.to_string())
        .bind(run.status.as_str())
        .bind(run.counts.files_found as i64)
        .bind(run.counts.files_new as i64)
        .bind(run.counts.files_updated as i64)
        .bind(run.counts.files_skipped as i64)
        .bind(run.counts.files_error as i64)
        .bind(run.counts.files_queued as i64)
        .bind(Self::errors_json(run)?)
        .bind(run.files_processed as i64)
        .bind(run.total_files as i64)
        .bind(run.started_at.timestamp())
        .bind(run.completed_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_runs SET
                status = ?,
                files_found = ?, files_new = ?, files_updated = ?,
                files_skipped = ?, files_error = ?, files_queued = ?,
                errors = ?, files_processed = ?, total_files = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.counts.files_found as i64)
        .bind(run.counts.files_new as i64)
        .bind(run.counts.files_updated as i64)
        .bind(run.counts.files_skipped as i64)
        .bind(run.counts.files_error as i64)
        .bind(run.counts.files_queued as i64)
        .bind(Self::errors_json(run)?)
        .bind(run.files_processed as i64)
        .bind(run.total_files as i64)
        .bind(run.completed_at.map(|t| t.timestamp()))
        .bind(run.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, id: SyncRunId) -> Result<Option<SyncRun>> {
        let row = sqlx::query("SELECT * FROM sync_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn list_for_case(&self, case_id: CaseId) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_runs WHERE case_id = ? ORDER BY started_at DESC, id DESC",
        )
        .bind(case_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_run).collect()
    }
}
