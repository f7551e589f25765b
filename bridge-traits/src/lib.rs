//! # Bridge Traits
//!
//! Service abstractions shared across the sync core.
//!
//! ## Overview
//!
//! This crate defines the contracts between the sync engine and the services
//! it collaborates with:
//!
//! - **HTTP** (`http`): async HTTP client abstraction with retry policy
//! - **Cloud providers** (`provider`): the normalized cloud-storage contract
//!   implemented once per backend, plus the shared error taxonomy
//! - **Blob storage** (`blob`): opaque read/write store for ingested file bytes
//! - **MIME lookup** (`mime`): extension-based content-type helper
//!
//! Implementations live elsewhere (`bridge-native` for reqwest-backed HTTP and
//! blob access, `provider-dropbox`/`provider-onedrive` for the two backends).
//! Keeping only traits here lets the engine be tested entirely against fakes.

pub mod blob;
pub mod error;
pub mod http;
pub mod mime;
pub mod provider;

pub use blob::BlobStore;
pub use error::{BridgeError, Result};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use provider::{
    CloudProvider, FolderPage, ProviderError, ProviderTokens, RemoteAccount, RemoteFile,
    RemoteFolder,
};
