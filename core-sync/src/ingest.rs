//! Ingestion Writer
//!
//! Downloads a remote file, writes the bytes to blob storage under a
//! case-scoped key, and records the document row. A failure at any step
//! surfaces to the orchestrator as this file's error; nothing here aborts
//! the wider run.

use crate::document::{Document, DocumentRepository};
use crate::error::Result;
use crate::mapping::CaseId;
use bridge_traits::blob::BlobStore;
use bridge_traits::mime::mime_type_for;
use bridge_traits::provider::{CloudProvider, RemoteFile};
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct IngestionWriter {
    provider: Arc<dyn CloudProvider>,
    blob_store: Arc<dyn BlobStore>,
    documents: Arc<dyn DocumentRepository>,
}

impl IngestionWriter {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        blob_store: Arc<dyn BlobStore>,
        documents: Arc<dyn DocumentRepository>,
    ) -> Self {
        Self {
            provider,
            blob_store,
            documents,
        }
    }

    /// Blob key scoped by case and remote file id so re-ingestion of changed
    /// content never clobbers an unrelated case's blobs.
    fn blob_key(case_id: CaseId, file: &RemoteFile) -> String {
        let id = file.id.replace(['/', ':'], "_");
        format!("cases/{}/{}/{}", case_id, id, file.name)
    }

    /// Download, store, and record one file.
    #[instrument(skip(self, access_token, file), fields(case_id = %case_id, file = %file.name))]
    pub async fn ingest(
        &self,
        access_token: &str,
        case_id: CaseId,
        file: &RemoteFile,
    ) -> Result<Document> {
        let body = self.provider.download_file(access_token, &file.id).await?;
        let size = body.len();

        let key = Self::blob_key(case_id, file);
        let storage_location = self.blob_store.put(&key, body).await?;

        let mut document = Document::from_remote_file(
            case_id,
            file,
            storage_location,
            mime_type_for(&file.name).to_string(),
        );
        // Prefer the measured size over provider metadata
        document.file_size = Some(size as u64);
        self.documents.insert(&document).await?;

        debug!(document_id = %document.id, bytes = size, "File ingested");
        Ok(document)
    }
}
