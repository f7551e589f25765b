//! Case Folder Mappings
//!
//! Binds a case to the remote folder it synchronizes from. A case has at
//! most one mapping. Legacy rows written before the second backend existed
//! carry the folder in dropbox-specific columns; those are honored as a
//! read-only fallback and never written going forward.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_auth::ProviderKind;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaseId(Uuid);

impl CaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The remote folder a case synchronizes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderMapping {
    pub case_id: CaseId,
    pub provider: ProviderKind,
    pub folder_path: String,
    pub folder_id: String,
    /// None until the first successful sync; drives fresh-case queue priority
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Storage contract for case folder mappings.
#[async_trait]
pub trait CaseFolderRepository: Send + Sync {
    /// The active mapping for a case, if any. Legacy single-provider rows
    /// surface as dropbox mappings.
    async fn get(&self, case_id: CaseId) -> Result<Option<FolderMapping>>;

    /// Set or replace the mapping for a case.
    async fn set(&self, mapping: &FolderMapping) -> Result<()>;

    /// Clear the mapping. Returns false when none existed.
    async fn clear(&self, case_id: CaseId) -> Result<bool>;

    /// Record a successful sync completion time.
    async fn touch_last_synced(&self, case_id: CaseId, at: DateTime<Utc>) -> Result<()>;
}

/// SQLite implementation of [`CaseFolderRepository`].
pub struct SqliteCaseFolderRepository {
    pool: SqlitePool,
}

impl SqliteCaseFolderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS case_folder_mappings (
                case_id TEXT PRIMARY KEY,
                provider TEXT,
                folder_path TEXT,
                folder_id TEXT,
                dropbox_folder_path TEXT,
                dropbox_folder_id TEXT,
                last_synced_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_mapping(row: &SqliteRow) -> Result<Option<FolderMapping>> {
        let case_id: String = row.get("case_id");
        let case_id = CaseId::from_string(&case_id)
            .map_err(|e| SyncError::Database(format!("bad case id: {}", e)))?;
        let last_synced_at = row
            .get::<Option<i64>, _>("last_synced_at")
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        let provider: Option<String> = row.get("provider");
        if let Some(provider) = provider {
            let provider = ProviderKind::parse(&provider)
                .ok_or_else(|| SyncError::Database(format!("bad provider: {}", provider)))?;
            let folder_path: Option<String> = row.get("folder_path");
            let folder_id: Option<String> = row.get("folder_id");
            if let (Some(folder_path), Some(folder_id)) = (folder_path, folder_id) {
                return Ok(Some(FolderMapping {
                    case_id,
                    provider,
                    folder_path,
                    folder_id,
                    last_synced_at,
                }));
            }
        }

        // Legacy fallback: rows written before provider-agnostic columns
        let legacy_path: Option<String> = row.get("dropbox_folder_path");
        let legacy_id: Option<String> = row.get("dropbox_folder_id");
        if let (Some(folder_path), Some(folder_id)) = (legacy_path, legacy_id) {
            return Ok(Some(FolderMapping {
                case_id,
                provider: ProviderKind::Dropbox,
                folder_path,
                folder_id,
                last_synced_at,
            }));
        }

        Ok(None)
    }
}

#[async_trait]
impl CaseFolderRepository for SqliteCaseFolderRepository {
    async fn get(&self, case_id: CaseId) -> Result<Option<FolderMapping>> {
        let row = sqlx::query("SELECT * FROM case_folder_mappings WHERE case_id = ?")
            .bind(case_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_mapping(&row),
            None => Ok(None),
        }
    }

    async fn set(&self, mapping: &FolderMapping) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO case_folder_mappings (case_id, provider, folder_path, folder_id, last_synced_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(case_id) DO UPDATE SET
                provider = excluded.provider,
                folder_path = excluded.folder_path,
                folder_id = excluded.folder_id,
                last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(mapping.case_id.to_string())
        .bind(mapping.provider.as_str())
        .bind(&mapping.folder_path)
        .bind(&mapping.folder_id)
        .bind(mapping.last_synced_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self, case_id: CaseId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM case_folder_mappings WHERE case_id = ?")
            .bind(case_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_last_synced(&self, case_id: CaseId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE case_folder_mappings SET last_synced_at = ? WHERE case_id = ?")
            .bind(at.timestamp())
            .bind(case_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
