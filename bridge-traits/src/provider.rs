//! Cloud Provider Contract
//!
//! One trait, implemented once per storage backend. Both backends normalize
//! their native metadata into the shared [`RemoteFile`]/[`RemoteFolder`]
//! shapes so the rest of the system never sees provider wire formats.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy for cloud provider operations.
///
/// Kinds are distinguishable so the orchestrator can decide what is fatal
/// (token problems on the initial listing) versus per-file (a single download
/// timing out).
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Access token expired or rejected")]
    TokenExpired,

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Rate limited by provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Missing provider configuration: {0}")]
    Config(String),

    #[error("Failed to parse provider response: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Whether the error is transient enough to retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Network(_)
        )
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Normalized file metadata returned by a provider.
///
/// Transient: produced during enumeration, consumed by dedup and ingestion,
/// never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Provider-scoped stable file identifier
    pub id: String,
    /// File name including extension
    pub name: String,
    /// Canonical (lowercased where the provider does so) path
    pub path: String,
    /// Display path as the user sees it
    pub display_path: String,
    /// Size in bytes, when reported
    pub size: Option<u64>,
    /// Last modification time (Unix seconds), when reported
    pub modified_at: Option<i64>,
    /// Whether the provider will serve the file bytes
    pub is_downloadable: bool,
    /// Content fingerprint; always present for Dropbox, often absent for
    /// OneDrive. Absence downgrades dedup to remote-id uniqueness.
    pub content_hash: Option<String>,
}

/// Normalized folder metadata returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    /// Provider-scoped stable folder identifier
    pub id: String,
    /// Folder name
    pub name: String,
    /// Canonical path
    pub path: String,
    /// Display path as the user sees it
    pub display_path: String,
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default)]
pub struct FolderPage {
    pub folders: Vec<RemoteFolder>,
    pub files: Vec<RemoteFile>,
    /// Whether another page exists; when true, `cursor` continues the listing
    pub has_more: bool,
    pub cursor: Option<String>,
}

/// OAuth token set returned by code exchange or refresh.
#[derive(Clone)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires
    pub expires_in: i64,
}

impl std::fmt::Debug for ProviderTokens {
    // Token values never appear in logs
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTokens")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Remote account identity, captured at connect time and on re-verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAccount {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Cloud storage provider contract.
///
/// Implemented by `provider-dropbox` and `provider-onedrive`; the two are
/// functionally interchangeable behind this trait. Constructors must fail with
/// [`ProviderError::Config`] when required configuration is absent rather than
/// degrade silently.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Stable provider tag ("dropbox", "onedrive"), used in state blobs,
    /// persistence and logging.
    fn tag(&self) -> &'static str;

    /// Build the provider consent URL for `user_id`, embedding a signed,
    /// time-boxed opaque state blob for CSRF protection.
    fn authorization_url(&self, user_id: &str, redirect_uri: &str) -> ProviderResult<String>;

    /// One-time exchange of an authorization code for tokens.
    async fn exchange_code(&self, code: &str, redirect_uri: &str)
        -> ProviderResult<ProviderTokens>;

    /// Obtain a fresh access token from a refresh token.
    async fn refresh(&self, refresh_token: &str) -> ProviderResult<ProviderTokens>;

    /// Best-effort token revocation; "already invalid" counts as success.
    async fn revoke(&self, access_token: &str) -> ProviderResult<bool>;

    /// Lightweight liveness probe for an access token.
    async fn verify(&self, access_token: &str) -> ProviderResult<bool>;

    /// Fetch the remote account identity behind an access token.
    async fn account_info(&self, access_token: &str) -> ProviderResult<RemoteAccount>;

    /// List one page of a folder. The first call supplies `path` and no
    /// cursor; continuation calls use the cursor only.
    async fn list_folder(
        &self,
        access_token: &str,
        path: &str,
        cursor: Option<&str>,
    ) -> ProviderResult<FolderPage>;

    /// Search folders by name.
    async fn search_folders(
        &self,
        access_token: &str,
        query: &str,
        max_results: u32,
    ) -> ProviderResult<Vec<RemoteFolder>>;

    /// Download the full file body.
    async fn download_file(&self, access_token: &str, file_id: &str) -> ProviderResult<Bytes>;

    /// Temporary direct download link, where the backend supports it.
    async fn get_download_url(&self, access_token: &str, file_id: &str) -> ProviderResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ProviderError::RateLimited {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(!ProviderError::TokenExpired.is_retryable());
        assert!(!ProviderError::FolderNotFound("/x".into()).is_retryable());
    }

    #[test]
    fn test_tokens_debug_redacts() {
        let tokens = ProviderTokens {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            expires_in: 3600,
        };
        let rendered = format!("{:?}", tokens);
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
        assert!(rendered.contains("3600"));
    }
}
