//! Sync Engine
//!
//! Orchestrates one sync run per case: resolve the folder mapping, get a
//! valid access token, enumerate the remote tree, dedup against existing
//! documents, ingest what is new or changed, and queue the ingested
//! documents for classification. At most one run per case is in flight at a
//! time; a second start request is rejected, not queued.

use crate::document::{Document, DocumentRepository};
use crate::enumerator::FolderEnumerator;
use crate::error::{Result, SyncError};
use crate::ingest::IngestionWriter;
use crate::mapping::{CaseFolderRepository, CaseId, FolderMapping};
use crate::queue::ProcessingQueue;
use crate::repository::SyncRunRepository;
use crate::run::{FileError, SyncCounts, SyncRun, SyncRunId, SyncStatus};
use bridge_traits::blob::BlobStore;
use bridge_traits::provider::RemoteFile;
use chrono::{DateTime, Utc};
use core_auth::{CredentialStore, ProviderRegistry, UserId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Queue priority for a case's first-ever sync; later syncs enqueue at the
/// default priority
pub const FRESH_CASE_PRIORITY: i32 = 10;

/// Poller-facing view of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncProgress {
    pub run_id: SyncRunId,
    pub case_id: CaseId,
    pub status: SyncStatus,
    pub progress_percent: u8,
    pub files_processed: u32,
    pub total_files: u32,
    pub counts: SyncCounts,
    pub errors: Vec<FileError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

impl From<SyncRun> for SyncProgress {
    fn from(run: SyncRun) -> Self {
        Self {
            run_id: run.id,
            case_id: run.case_id,
            status: run.status,
            progress_percent: run.progress_percent(),
            files_processed: run.files_processed,
            total_files: run.total_files,
            counts: run.counts,
            duration_secs: run.duration_secs(),
            errors: run.errors,
            started_at: run.started_at,
            completed_at: run.completed_at,
        }
    }
}

struct ActiveSync {
    run_id: SyncRunId,
    cancel: CancellationToken,
}

pub struct SyncEngine {
    credentials: Arc<CredentialStore>,
    registry: Arc<ProviderRegistry>,
    mappings: Arc<dyn CaseFolderRepository>,
    runs: Arc<dyn SyncRunRepository>,
    documents: Arc<dyn DocumentRepository>,
    blob_store: Arc<dyn BlobStore>,
    queue: Arc<ProcessingQueue>,
    active: Mutex<HashMap<CaseId, ActiveSync>>,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        credentials: Arc<CredentialStore>,
        registry: Arc<ProviderRegistry>,
        mappings: Arc<dyn CaseFolderRepository>,
        runs: Arc<dyn SyncRunRepository>,
        documents: Arc<dyn DocumentRepository>,
        blob_store: Arc<dyn BlobStore>,
        queue: Arc<ProcessingQueue>,
    ) -> Self {
        Self {
            credentials,
            registry,
            mappings,
            runs,
            documents,
            blob_store,
            queue,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start a sync run for a case. Returns the run id immediately; the work
    /// continues on a background task. Fails fast when no folder is mapped
    /// or a run is already in flight for the case.
    #[instrument(skip(self), fields(user_id = %user_id, case_id = %case_id))]
    pub async fn start_sync(
        self: &Arc<Self>,
        user_id: UserId,
        case_id: CaseId,
    ) -> Result<SyncRunId> {
        let mapping = self
            .mappings
            .get(case_id)
            .await?
            .ok_or_else(|| SyncError::NoFolderMapped {
                case_id: case_id.to_string(),
            })?;

        // The guard entry is registered before this method returns, so a
        // caller observing a successful start can rely on a second start
        // being rejected until the run finishes.
        let mut active = self.active.lock().await;
        if active.contains_key(&case_id) {
            return Err(SyncError::SyncAlreadyInProgress {
                case_id: case_id.to_string(),
            });
        }

        let run = SyncRun::new(case_id);
        let run_id = run.id;
        self.runs.insert(&run).await?;

        let cancel = CancellationToken::new();
        active.insert(
            case_id,
            ActiveSync {
                run_id,
                cancel: cancel.clone(),
            },
        );
        drop(active);

        info!(run_id = %run_id, provider = mapping.provider.as_str(), "Sync run started");
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.execute(user_id, mapping, run, cancel).await;
            engine.active.lock().await.remove(&case_id);
        });

        Ok(run_id)
    }

    /// Request cancellation of the case's active run. Returns false when no
    /// run is in flight. The run reaches `cancelled` asynchronously.
    pub async fn cancel_sync(&self, case_id: CaseId) -> Result<bool> {
        let active = self.active.lock().await;
        match active.get(&case_id) {
            Some(entry) => {
                info!(case_id = %case_id, run_id = %entry.run_id, "Cancellation requested");
                entry.cancel.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Progress snapshot for a run.
    pub async fn get_progress(&self, run_id: SyncRunId) -> Result<SyncProgress> {
        let run = self
            .runs
            .find(run_id)
            .await?
            .ok_or_else(|| SyncError::RunNotFound(run_id.to_string()))?;
        Ok(run.into())
    }

    /// Past and current runs for a case, most recent first.
    pub async fn list_history(&self, case_id: CaseId) -> Result<Vec<SyncProgress>> {
        let runs = self.runs.list_for_case(case_id).await?;
        Ok(runs.into_iter().map(SyncProgress::from).collect())
    }

    pub async fn is_syncing(&self, case_id: CaseId) -> bool {
        self.active.lock().await.contains_key(&case_id)
    }

    async fn execute(
        &self,
        user_id: UserId,
        mapping: FolderMapping,
        mut run: SyncRun,
        cancel: CancellationToken,
    ) {
        let case_id = run.case_id;
        match self
            .execute_inner(user_id, &mapping, &mut run, &cancel)
            .await
        {
            Ok(()) => {
                info!(
                    run_id = %run.id,
                    found = run.counts.files_found,
                    new = run.counts.files_new,
                    updated = run.counts.files_updated,
                    skipped = run.counts.files_skipped,
                    errors = run.counts.files_error,
                    "Sync run completed"
                );
            }
            Err(SyncError::Cancelled) => {
                info!(run_id = %run.id, "Sync run cancelled");
                run.cancel();
            }
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "Sync run failed");
                run.fail(e.to_string());
            }
        }

        if let Err(e) = self.runs.update(&run).await {
            error!(run_id = %run.id, error = %e, "Failed to persist final run state");
        }
        if run.status == SyncStatus::Completed {
            if let Err(e) = self.mappings.touch_last_synced(case_id, Utc::now()).await {
                warn!(case_id = %case_id, error = %e, "Failed to record last sync time");
            }
        }
    }

    /// The run body. Per-file failures are recorded on the run and never
    /// abort it; enumeration, token, and persistence failures do.
    async fn execute_inner(
        &self,
        user_id: UserId,
        mapping: &FolderMapping,
        run: &mut SyncRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let case_id = run.case_id;
        let provider = self.registry.get(mapping.provider)?;
        let access_token = self
            .credentials
            .get_valid_token(user_id, mapping.provider)
            .await?;

        let enumerator = FolderEnumerator::new(provider.clone());
        let files = enumerator
            .list_all_files(&access_token, &mapping.folder_path, cancel)
            .await?;

        run.counts.files_found = files.len() as u32;
        run.total_files = files.len() as u32;
        self.runs.update(run).await?;

        // Two bulk lookups seed the dedup sets; each ingested file joins
        // them so a second copy of the same content inside this run is a
        // skip, not a constraint violation
        let hashes: Vec<String> = files
            .iter()
            .filter_map(|f| f.content_hash.clone())
            .collect();
        let remote_ids: Vec<String> = files.iter().map(|f| f.id.clone()).collect();
        let mut duplicate_hashes =
            self.documents.find_duplicate_hashes(case_id, &hashes).await?;
        let mut existing_ids = self
            .documents
            .find_existing_remote_ids(case_id, &remote_ids)
            .await?;

        let writer = IngestionWriter::new(
            provider,
            self.blob_store.clone(),
            self.documents.clone(),
        );

        let mut ingested: Vec<Document> = Vec::new();
        for file in &files {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match Self::decide(file, &duplicate_hashes, &existing_ids) {
                FileDecision::Skip => run.counts.files_skipped += 1,
                FileDecision::Ingest { known_remote } => {
                    match writer.ingest(&access_token, case_id, file).await {
                        Ok(document) => {
                            if known_remote {
                                run.counts.files_updated += 1;
                            } else {
                                run.counts.files_new += 1;
                            }
                            if let Some(hash) = &file.content_hash {
                                duplicate_hashes.insert(hash.clone());
                            }
                            existing_ids.insert(file.id.clone());
                            ingested.push(document);
                        }
                        Err(e) => {
                            warn!(file = %file.name, error = %e, "File ingestion failed");
                            run.record_file_error(&file.name, e.to_string());
                        }
                    }
                }
            }

            // Persist after every file so pollers see live progress
            run.files_processed += 1;
            self.runs.update(run).await?;
        }

        let priority = if mapping.last_synced_at.is_none() {
            FRESH_CASE_PRIORITY
        } else {
            0
        };
        for document in &ingested {
            self.queue.enqueue(document, priority).await?;
            run.counts.files_queued += 1;
        }

        run.complete();
        Ok(())
    }

    /// Dedup decision for one enumerated file:
    /// - not downloadable: skip
    /// - hash already ingested for this case: skip
    /// - hashless but the remote id is already ingested: skip
    /// - otherwise ingest; a known remote id with a fresh hash counts as an
    ///   update (content changed), anything else as new
    fn decide(
        file: &RemoteFile,
        duplicate_hashes: &std::collections::HashSet<String>,
        existing_ids: &std::collections::HashSet<String>,
    ) -> FileDecision {
        if !file.is_downloadable {
            return FileDecision::Skip;
        }
        match &file.content_hash {
            Some(hash) => {
                if duplicate_hashes.contains(hash) {
                    FileDecision::Skip
                } else {
                    FileDecision::Ingest {
                        known_remote: existing_ids.contains(&file.id),
                    }
                }
            }
            None => {
                if existing_ids.contains(&file.id) {
                    FileDecision::Skip
                } else {
                    FileDecision::Ingest {
                        known_remote: false,
                    }
                }
            }
        }
    }
}

enum FileDecision {
    Skip,
    Ingest { known_remote: bool },
}
