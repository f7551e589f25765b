//! Processing Queue
//!
//! Newly ingested documents wait here for downstream classification. Items
//! are claimed highest-priority first, oldest first within a priority, with
//! bounded retries scheduled by exponential backoff. Terminal states are
//! `completed` and `failed`; a failed item is never claimed again.

use crate::document::{Document, DocumentId};
use crate::error::{Result, SyncError};
use crate::mapping::CaseId;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default retry budget per item
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Unique identifier for a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueItemId(Uuid);

impl QueueItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "completed" => Some(QueueStatus::Completed),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

/// One document's classification job.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub document_id: DocumentId,
    pub case_id: CaseId,
    pub status: QueueStatus,
    /// Higher runs sooner
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_ms: Option<i64>,
    pub tokens_used: Option<i64>,
    pub model_used: Option<String>,
}

impl QueueItem {
    pub fn new(document_id: DocumentId, case_id: CaseId, priority: i32) -> Self {
        Self {
            id: QueueItemId::new(),
            document_id,
            case_id,
            status: QueueStatus::Pending,
            priority,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_error: None,
            next_retry_at: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processing_ms: None,
            tokens_used: None,
            model_used: None,
        }
    }
}

/// Exponential retry schedule: `base * 2^(attempts-1)`, capped.
///
/// The curve is a tunable, not a contract; these defaults put the third and
/// final retry two minutes after the first failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    pub base_secs: i64,
    pub cap_secs: i64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base_secs: 30,
            cap_secs: 3600,
        }
    }
}

impl RetryBackoff {
    pub fn delay_secs(&self, attempts: u32) -> i64 {
        let exp = attempts.saturating_sub(1).min(20);
        (self.base_secs.saturating_mul(1i64 << exp)).min(self.cap_secs)
    }
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Storage contract for queue items.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn insert(&self, item: &QueueItem) -> Result<()>;

    async fn find(&self, id: QueueItemId) -> Result<Option<QueueItem>>;

    /// Atomically claim the best eligible pending item: highest priority
    /// first, then earliest enqueue time, skipping items whose retry time
    /// has not elapsed. Returns the item already marked `processing`.
    async fn claim_next(&self) -> Result<Option<QueueItem>>;

    async fn mark_completed(
        &self,
        id: QueueItemId,
        processing_ms: i64,
        tokens_used: Option<i64>,
        model_used: Option<&str>,
    ) -> Result<()>;

    /// Schedule another attempt.
    async fn mark_retry(
        &self,
        id: QueueItemId,
        attempts: u32,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Terminal failure after the retry budget is spent.
    async fn mark_failed(&self, id: QueueItemId, attempts: u32, error: &str) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats>;

    /// Terminally failed items for a case, for the monitoring surface.
    async fn list_failed(&self, case_id: CaseId) -> Result<Vec<QueueItem>>;
}

/// SQLite implementation of [`QueueRepository`].
pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processing_queue (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                case_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                last_error TEXT,
                next_retry_at INTEGER,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                processing_ms INTEGER,
                tokens_used INTEGER,
                model_used TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queue_claim
             ON processing_queue (status, priority DESC, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_item(row: &SqliteRow) -> Result<QueueItem> {
        let id: String = row.get("id");
        let document_id: String = row.get("document_id");
        let case_id: String = row.get("case_id");
        let status: String = row.get("status");

        Ok(QueueItem {
            id: QueueItemId::from_string(&id)
                .map_err(|e| SyncError::Database(format!("bad queue item id: {}", e)))?,
            document_id: DocumentId::from_string(&document_id)
                .map_err(|e| SyncError::Database(format!("bad document id: {}", e)))?,
            case_id: CaseId::from_string(&case_id)
                .map_err(|e| SyncError::Database(format!("bad case id: {}", e)))?,
            status: QueueStatus::parse(&status)
                .ok_or_else(|| SyncError::Database(format!("bad status: {}", status)))?,
            priority: row.get::<i64, _>("priority") as i32,
            attempts: row.get::<i64, _>("attempts") as u32,
            max_attempts: row.get::<i64, _>("max_attempts") as u32,
            last_error: row.get("last_error"),
            next_retry_at: row
                .get::<Option<i64>, _>("next_retry_at")
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            created_at: DateTime::<Utc>::from_timestamp(row.get("created_at"), 0)
                .ok_or_else(|| SyncError::Database("bad created_at".to_string()))?,
            started_at: row
                .get::<Option<i64>, _>("started_at")
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            completed_at: row
                .get::<Option<i64>, _>("completed_at")
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            processing_ms: row.get("processing_ms"),
            tokens_used: row.get("tokens_used"),
            model_used: row.get("model_used"),
        })
    }
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn insert(&self, item: &QueueItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_queue (
                id, document_id, case_id, status, priority, attempts, max_attempts,
                last_error, next_retry_at, created_at, started_at, completed_at,
                processing_ms, tokens_used, model_used
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.document_id.to_string())
        .bind(item.case_id.to_string())
        .bind(item.status.as_str())
        .bind(item.priority as i64)
        .bind(item.attempts as i64)
        .bind(item.max_attempts as i64)
        .bind(&item.last_error)
        .bind(item.next_retry_at.map(|t| t.timestamp()))
        .bind(item.created_at.timestamp())
        .bind(item.started_at.map(|t| t.timestamp()))
        .bind(item.completed_at.map(|t| t.timestamp()))
        .bind(item.processing_ms)
        .bind(item.tokens_used)
        .bind(&item.model_used)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, id: QueueItemId) -> Result<Option<QueueItem>> {
        let row = sqlx::query("SELECT * FROM processing_queue WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_item).transpose()
    }

    async fn claim_next(&self) -> Result<Option<QueueItem>> {
        // Select-then-conditionally-update; a concurrent claimer losing the
        // race simply selects again.
        loop {
            let candidate = sqlx::query(
                r#"
                SELECT id FROM processing_queue
                WHERE status = 'pending'
                  AND (next_retry_at IS NULL OR next_retry_at <= ?)
                  AND attempts < max_attempts
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
                "#,
            )
            .bind(Utc::now().timestamp())
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = candidate else {
                return Ok(None);
            };
            let id: String = row.get("id");

            let claimed = sqlx::query(
                "UPDATE processing_queue SET status = 'processing', started_at = ?
                 WHERE id = ? AND status = 'pending'",
            )
            .bind(Utc::now().timestamp())
            .bind(&id)
            .execute(&self.pool)
            .await?;

            if claimed.rows_affected() == 1 {
                let id = QueueItemId::from_string(&id)
                    .map_err(|e| SyncError::Database(format!("bad queue item id: {}", e)))?;
                return self.find(id).await;
            }
        }
    }

    async fn mark_completed(
        &self,
        id: QueueItemId,
        processing_ms: i64,
        tokens_used: Option<i64>,
        model_used: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE processing_queue
             SET status = 'completed', completed_at = ?, processing_ms = ?,
                 tokens_used = ?, model_used = ?, last_error = NULL, next_retry_at = NULL
             WHERE id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(processing_ms)
        .bind(tokens_used)
        .bind(model_used)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: QueueItemId,
        attempts: u32,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE processing_queue
             SET status = 'pending', attempts = ?, last_error = ?, next_retry_at = ?
             WHERE id = ?",
        )
        .bind(attempts as i64)
        .bind(error)
        .bind(next_retry_at.timestamp())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: QueueItemId, attempts: u32, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE processing_queue
             SET status = 'failed', attempts = ?, last_error = ?, completed_at = ?,
                 next_retry_at = NULL
             WHERE id = ?",
        )
        .bind(attempts as i64)
        .bind(error)
        .bind(Utc::now().timestamp())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS n FROM processing_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let n = row.get::<i64, _>("n") as u64;
            match QueueStatus::parse(&status) {
                Some(QueueStatus::Pending) => stats.pending = n,
                Some(QueueStatus::Processing) => stats.processing = n,
                Some(QueueStatus::Completed) => stats.completed = n,
                Some(QueueStatus::Failed) => stats.failed = n,
                None => {}
            }
        }
        Ok(stats)
    }

    async fn list_failed(&self, case_id: CaseId) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(
            "SELECT * FROM processing_queue
             WHERE case_id = ? AND status = 'failed'
             ORDER BY completed_at DESC",
        )
        .bind(case_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_item).collect()
    }
}

/// Queue policy layer: enqueue, claim, and the retry/terminal transition
/// decisions. Repositories stay mechanical; the budget lives here.
pub struct ProcessingQueue {
    repository: Arc<dyn QueueRepository>,
    backoff: RetryBackoff,
}

impl ProcessingQueue {
    pub fn new(repository: Arc<dyn QueueRepository>) -> Self {
        Self {
            repository,
            backoff: RetryBackoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Queue a freshly ingested document for classification.
    #[instrument(skip(self, document), fields(document_id = %document.id, priority))]
    pub async fn enqueue(&self, document: &Document, priority: i32) -> Result<QueueItem> {
        let item = QueueItem::new(document.id, document.case_id, priority);
        self.repository.insert(&item).await?;
        debug!(item_id = %item.id, "Document queued for classification");
        Ok(item)
    }

    pub async fn claim_next(&self) -> Result<Option<QueueItem>> {
        self.repository.claim_next().await
    }

    /// Record a successful classification.
    pub async fn complete(
        &self,
        item: &QueueItem,
        tokens_used: Option<i64>,
        model_used: Option<&str>,
    ) -> Result<()> {
        let processing_ms = item
            .started_at
            .map(|s| (Utc::now() - s).num_milliseconds())
            .unwrap_or(0);
        self.repository
            .mark_completed(item.id, processing_ms, tokens_used, model_used)
            .await?;
        info!(item_id = %item.id, processing_ms, "Queue item completed");
        Ok(())
    }

    /// Record a failed attempt: back on the queue with a retry time while
    /// budget remains, terminal `failed` once it is spent.
    pub async fn fail(&self, item: &QueueItem, error: &str) -> Result<QueueStatus> {
        if item.status.is_terminal() {
            return Err(SyncError::QueueItemExhausted {
                item_id: item.id.to_string(),
            });
        }

        let attempts = item.attempts + 1;
        if attempts >= item.max_attempts {
            self.repository.mark_failed(item.id, attempts, error).await?;
            warn!(item_id = %item.id, attempts, "Queue item failed terminally");
            Ok(QueueStatus::Failed)
        } else {
            let next_retry_at =
                Utc::now() + Duration::seconds(self.backoff.delay_secs(attempts));
            self.repository
                .mark_retry(item.id, attempts, error, next_retry_at)
                .await?;
            debug!(item_id = %item.id, attempts, "Queue item scheduled for retry");
            Ok(QueueStatus::Pending)
        }
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.repository.stats().await
    }

    pub async fn list_failed(&self, case_id: CaseId) -> Result<Vec<QueueItem>> {
        self.repository.list_failed(case_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn queue_with(backoff: RetryBackoff) -> (ProcessingQueue, Arc<SqliteQueueRepository>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        let repo = SqliteQueueRepository::new(pool);
        repo.initialize().await.unwrap();
        let repo = Arc::new(repo);
        (
            ProcessingQueue::new(repo.clone()).with_backoff(backoff),
            repo,
        )
    }

    fn item(case: CaseId, priority: i32, age_secs: i64) -> QueueItem {
        let mut item = QueueItem::new(DocumentId::new(), case, priority);
        item.created_at = Utc::now() - Duration::seconds(age_secs);
        item
    }

    #[test]
    fn test_backoff_curve() {
        let backoff = RetryBackoff::default();
        assert_eq!(backoff.delay_secs(1), 30);
        assert_eq!(backoff.delay_secs(2), 60);
        assert_eq!(backoff.delay_secs(3), 120);
        assert_eq!(backoff.delay_secs(10), 3600);
    }

    #[tokio::test]
    async fn test_claim_order_priority_then_age() {
        let (_, repo) = queue_with(RetryBackoff::default()).await;
        let case = CaseId::new();

        let low_old = item(case, 0, 300);
        let high_new = item(case, 10, 10);
        let high_old = item(case, 10, 200);
        for it in [&low_old, &high_new, &high_old] {
            repo.insert(it).await.unwrap();
        }

        let first = repo.claim_next().await.unwrap().unwrap();
        assert_eq!(first.id, high_old.id);
        assert_eq!(first.status, QueueStatus::Processing);
        assert!(first.started_at.is_some());

        let second = repo.claim_next().await.unwrap().unwrap();
        assert_eq!(second.id, high_new.id);
        let third = repo.claim_next().await.unwrap().unwrap();
        assert_eq!(third.id, low_old.id);
        assert!(repo.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_bound_reaches_terminal_failed() {
        let (queue, repo) = queue_with(RetryBackoff {
            base_secs: 0,
            cap_secs: 0,
        })
        .await;
        let case = CaseId::new();
        let queued = item(case, 0, 0);
        repo.insert(&queued).await.unwrap();

        // Attempts 1 and 2 go back to pending and stay claimable (zero backoff)
        for _ in 0..2 {
            let claimed = queue.claim_next().await.unwrap().unwrap();
            let status = queue.fail(&claimed, "model unavailable").await.unwrap();
            assert_eq!(status, QueueStatus::Pending);
        }

        // Attempt 3 exhausts the budget
        let claimed = queue.claim_next().await.unwrap().unwrap();
        let status = queue.fail(&claimed, "model unavailable").await.unwrap();
        assert_eq!(status, QueueStatus::Failed);

        // Never claimed again
        assert!(queue.claim_next().await.unwrap().is_none());
        let found = repo.find(queued.id).await.unwrap().unwrap();
        assert_eq!(found.status, QueueStatus::Failed);
        assert_eq!(found.attempts, 3);
        assert_eq!(found.last_error.as_deref(), Some("model unavailable"));

        // Failing a terminal item is a caller bug, surfaced loudly
        assert!(matches!(
            queue.fail(&found, "again").await,
            Err(SyncError::QueueItemExhausted { .. })
        ));

        let failed = queue.list_failed(case).await.unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_waits_for_backoff() {
        let (queue, repo) = queue_with(RetryBackoff::default()).await;
        repo.insert(&item(CaseId::new(), 0, 0)).await.unwrap();

        let claimed = queue.claim_next().await.unwrap().unwrap();
        queue.fail(&claimed, "transient").await.unwrap();

        // next_retry_at is 30s out; nothing is eligible yet
        assert!(queue.claim_next().await.unwrap().is_none());
        let found = repo.find(claimed.id).await.unwrap().unwrap();
        assert_eq!(found.status, QueueStatus::Pending);
        assert!(found.next_retry_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_complete_records_outcome() {
        let (queue, repo) = queue_with(RetryBackoff::default()).await;
        repo.insert(&item(CaseId::new(), 0, 0)).await.unwrap();

        let claimed = queue.claim_next().await.unwrap().unwrap();
        queue
            .complete(&claimed, Some(1234), Some("classifier-v2"))
            .await
            .unwrap();

        let found = repo.find(claimed.id).await.unwrap().unwrap();
        assert_eq!(found.status, QueueStatus::Completed);
        assert_eq!(found.tokens_used, Some(1234));
        assert_eq!(found.model_used.as_deref(), Some("classifier-v2"));
        assert!(found.processing_ms.is_some());
        assert!(found.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_stats() {
        let (queue, repo) = queue_with(RetryBackoff {
            base_secs: 0,
            cap_secs: 0,
        })
        .await;
        let case = CaseId::new();
        for _ in 0..3 {
            repo.insert(&item(case, 0, 0)).await.unwrap();
        }

        let claimed = queue.claim_next().await.unwrap().unwrap();
        queue.complete(&claimed, None, None).await.unwrap();
        let claimed = queue.claim_next().await.unwrap().unwrap();
        let mut doomed = claimed.clone();
        doomed.attempts = doomed.max_attempts - 1;
        queue.fail(&doomed, "boom").await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                pending: 1,
                processing: 0,
                completed: 1,
                failed: 1,
            }
        );
    }
}
