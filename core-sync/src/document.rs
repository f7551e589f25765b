//! Document Records and Deduplication Lookups
//!
//! A document row is written exactly once per ingested file and never
//! mutated by the sync path afterwards except `synced_at`. Dedup runs as two
//! bulk IN-queries per sync (hashes, then remote ids for hashless files)
//! so the database round trips stay O(1) in the file count.

use crate::error::{Result, SyncError};
use crate::mapping::CaseId;
use async_trait::async_trait;
use bridge_traits::provider::RemoteFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, SqlitePool};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a document entered the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    CloudSync,
    ManualUpload,
    Other(String),
}

impl DocumentSource {
    pub fn as_str(&self) -> &str {
        match self {
            DocumentSource::CloudSync => "cloud_sync",
            DocumentSource::ManualUpload => "manual_upload",
            DocumentSource::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cloud_sync" => DocumentSource::CloudSync,
            "manual_upload" => DocumentSource::ManualUpload,
            other => DocumentSource::Other(other.to_string()),
        }
    }
}

/// Persisted ingestion result.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub case_id: CaseId,
    pub source: DocumentSource,
    pub file_name: String,
    pub file_type: String,
    pub file_size: Option<u64>,
    pub storage_location: String,
    pub remote_file_id: Option<String>,
    pub remote_file_path: Option<String>,
    pub content_hash: Option<String>,
    pub synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Build a document row from an ingested remote file.
    pub fn from_remote_file(
        case_id: CaseId,
        file: &RemoteFile,
        storage_location: String,
        file_type: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId::new(),
            case_id,
            source: DocumentSource::CloudSync,
            file_name: file.name.clone(),
            file_type,
            file_size: file.size,
            storage_location,
            remote_file_id: Some(file.id.clone()),
            remote_file_path: Some(file.path.clone()),
            content_hash: file.content_hash.clone(),
            synced_at: now,
            created_at: now,
        }
    }
}

/// Storage contract for documents.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn insert(&self, document: &Document) -> Result<()>;

    /// The subset of `hashes` already present for this case. One bulk query.
    async fn find_duplicate_hashes(
        &self,
        case_id: CaseId,
        hashes: &[String],
    ) -> Result<HashSet<String>>;

    /// The subset of `remote_ids` already ingested for this case. Used for
    /// hashless files and change detection.
    async fn find_existing_remote_ids(
        &self,
        case_id: CaseId,
        remote_ids: &[String],
    ) -> Result<HashSet<String>>;

    async fn count_for_case(&self, case_id: CaseId) -> Result<u64>;
}

/// SQLite implementation of [`DocumentRepository`].
pub struct SqliteDocumentRepository {
    pool: SqlitePool,
}

impl SqliteDocumentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                case_id TEXT NOT NULL,
                source TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_type TEXT NOT NULL,
                file_size INTEGER,
                storage_location TEXT NOT NULL,
                remote_file_id TEXT,
                remote_file_path TEXT,
                content_hash TEXT,
                synced_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Content identity is unique per case when the hash is known
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_case_hash
            ON documents (case_id, content_hash)
            WHERE content_hash IS NOT NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_case_remote
             ON documents (case_id, remote_file_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_document(row: &SqliteRow) -> Result<Document> {
        let id: String = row.get("id");
        let case_id: String = row.get("case_id");
        let source: String = row.get("source");
        Ok(Document {
            id: DocumentId::from_string(&id)
                .map_err(|e| SyncError::Database(format!("bad document id: {}", e)))?,
            case_id: CaseId::from_string(&case_id)
                .map_err(|e| SyncError::Database(format!("bad case id: {}", e)))?,
            source: DocumentSource::parse(&source),
            file_name: row.get("file_name"),
            file_type: row.get("file_type"),
            file_size: row.get::<Option<i64>, _>("file_size").map(|s| s as u64),
            storage_location: row.get("storage_location"),
            remote_file_id: row.get("remote_file_id"),
            remote_file_path: row.get("remote_file_path"),
            content_hash: row.get("content_hash"),
            synced_at: timestamp(row.get("synced_at"))?,
            created_at: timestamp(row.get("created_at"))?,
        })
    }

    /// All documents for a case, oldest first. Test and tooling surface.
    pub async fn list_for_case(&self, case_id: CaseId) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE case_id = ? ORDER BY created_at, id")
            .bind(case_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_document).collect()
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| SyncError::Database(format!("bad timestamp: {}", secs)))
}

#[async_trait]
impl DocumentRepository for SqliteDocumentRepository {
    async fn insert(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (
                id, case_id, source, file_name, file_type, file_size,
                storage_location, remote_file_id, remote_file_path,
                content_hash, synced_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(document.id.to_string())
        .bind(document.case_id.to_string())
        .bind(document.source.as_str())
        .bind(&document.file_name)
        .bind(&document.file_type)
        .bind(document.file_size.map(|s| s as i64))
        .bind(&document.storage_location)
        .bind(&document.remote_file_id)
        .bind(&document.remote_file_path)
        .bind(&document.content_hash)
        .bind(document.synced_at.timestamp())
        .bind(document.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_duplicate_hashes(
        &self,
        case_id: CaseId,
        hashes: &[String],
    ) -> Result<HashSet<String>> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT content_hash FROM documents WHERE case_id = ");
        builder.push_bind(case_id.to_string());
        builder.push(" AND content_hash IN (");
        let mut separated = builder.separated(", ");
        for hash in hashes {
            separated.push_bind(hash);
        }
        builder.push(")");

        let rows = builder.build().fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get::<Option<String>, _>(0))
            .collect())
    }

    async fn find_existing_remote_ids(
        &self,
        case_id: CaseId,
        remote_ids: &[String],
    ) -> Result<HashSet<String>> {
        if remote_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT remote_file_id FROM documents WHERE case_id = ");
        builder.push_bind(case_id.to_string());
        builder.push(" AND remote_file_id IN (");
        let mut separated = builder.separated(", ");
        for id in remote_ids {
            separated.push_bind(id);
        }
        builder.push(")");

        let rows = builder.build().fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get::<Option<String>, _>(0))
            .collect())
    }

    async fn count_for_case(&self, case_id: CaseId) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM documents WHERE case_id = ?")
            .bind(case_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}
