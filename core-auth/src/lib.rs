//! # Credential Core
//!
//! OAuth 2.0 credential lifecycle for cloud storage providers:
//!
//! - [`CredentialStore`]: connect, disconnect, status, verification, and
//!   transparent token refresh
//! - [`ProviderRegistry`]: maps a persisted [`ProviderKind`] back to its
//!   adapter
//! - Signed state blobs ([`state`]) binding an authorization callback to the
//!   user who initiated it
//! - SQLite persistence for connections ([`repository`])
//!
//! Tokens are stored server-side and never exposed past
//! [`CredentialStore::get_valid_token`]; status surfaces carry account
//! identity only.

pub mod error;
pub mod registry;
pub mod repository;
pub mod state;
pub mod store;
pub mod types;

pub use error::{AuthError, Result};
pub use registry::ProviderRegistry;
pub use repository::{ConnectionRepository, SqliteConnectionRepository};
pub use store::CredentialStore;
pub use types::{Connection, ConnectionStatus, ProviderKind, UserId};
