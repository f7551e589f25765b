//! # Sync Core
//!
//! Folder synchronization and ingestion for case files:
//!
//! - [`SyncEngine`]: one run per case at a time; enumerate, dedup, ingest,
//!   queue, with live progress and cancellation
//! - [`FolderEnumerator`]: deterministic depth-first traversal with bounded
//!   rate-limit retries
//! - [`IngestionWriter`]: download, blob write, document row
//! - [`ProcessingQueue`] and [`QueueWorker`]: priority classification queue
//!   with bounded exponential retries
//!
//! Per-file failures are recorded on the run and never abort it; a run only
//! fails outright when enumeration, the access token, or persistence does.

pub mod document;
pub mod engine;
pub mod enumerator;
pub mod error;
pub mod ingest;
pub mod mapping;
pub mod queue;
pub mod repository;
pub mod run;
pub mod worker;

pub use document::{Document, DocumentId, DocumentRepository, SqliteDocumentRepository};
pub use engine::{SyncEngine, SyncProgress, FRESH_CASE_PRIORITY};
pub use enumerator::FolderEnumerator;
pub use error::{Result, SyncError};
pub use ingest::IngestionWriter;
pub use mapping::{CaseFolderRepository, CaseId, FolderMapping, SqliteCaseFolderRepository};
pub use queue::{
    ProcessingQueue, QueueItem, QueueItemId, QueueRepository, QueueStats, QueueStatus,
    RetryBackoff, SqliteQueueRepository,
};
pub use repository::{SqliteSyncRunRepository, SyncRunRepository};
pub use run::{FileError, SyncCounts, SyncRun, SyncRunId, SyncStatus};
pub use worker::{Classification, DocumentClassifier, QueueWorker};
