//! Blob Storage Abstraction
//!
//! The persisted-file store is an external collaborator; the sync core only
//! writes ingested bytes under a case-scoped key and reads them back for
//! downstream processing.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Opaque blob read/write service.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `data` under `key`, overwriting any existing blob.
    /// Returns the storage location recorded on the document row.
    async fn put(&self, key: &str, data: Bytes) -> Result<String>;

    /// Read the blob at `key`.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Delete the blob at `key`. Deleting a missing blob is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
