//! # CaseSync
//!
//! Cloud folder synchronization and document ingestion for case management.
//!
//! The workspace splits along service seams:
//!
//! - [`bridge_traits`]: contracts (HTTP, cloud provider, blob storage)
//! - [`bridge_native`]: reqwest-backed HTTP client and blob store
//! - [`core_auth`]: OAuth credential lifecycle and token refresh
//! - [`provider_dropbox`] / [`provider_onedrive`]: the two storage backends,
//!   interchangeable behind [`bridge_traits::CloudProvider`]
//! - [`core_sync`]: the sync engine, ingestion, and the classification queue
//!
//! A typical embedding wires the pieces together once at startup:
//!
//! ```no_run
//! use std::sync::Arc;
//! use casesync::bridge_native::ReqwestHttpClient;
//! use casesync::bridge_traits::HttpClient;
//! use casesync::core_auth::{ProviderKind, ProviderRegistry};
//! use casesync::provider_dropbox::DropboxConnector;
//! use casesync::provider_onedrive::OneDriveConnector;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new()?);
//! let registry = Arc::new(
//!     ProviderRegistry::new()
//!         .register(ProviderKind::Dropbox, Arc::new(DropboxConnector::from_env(http.clone())?))
//!         .register(ProviderKind::OneDrive, Arc::new(OneDriveConnector::from_env(http)?)),
//! );
//! # Ok(())
//! # }
//! ```

pub use bridge_native;
pub use bridge_traits;
pub use core_auth;
pub use core_sync;
pub use provider_dropbox;
pub use provider_onedrive;
