use bridge_traits::error::BridgeError;
use bridge_traits::provider::ProviderError;
use core_auth::AuthError;
use thiserror::Error;

/// Errors that can occur during sync and queue operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync already in progress for case {case_id}")]
    SyncAlreadyInProgress { case_id: String },

    #[error("No folder mapped for case {case_id}")]
    NoFolderMapped { case_id: String },

    #[error("Sync run not found: {0}")]
    RunNotFound(String),

    #[error("Sync was cancelled")]
    Cancelled,

    #[error("Queue item {item_id} has exhausted its retry attempts")]
    QueueItemExhausted { item_id: String },

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Blob storage error: {0}")]
    Blob(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Database(e.to_string())
    }
}

impl From<BridgeError> for SyncError {
    fn from(e: BridgeError) -> Self {
        SyncError::Blob(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
