//! # Dropbox Provider
//!
//! Dropbox API v2 adapter implementing the shared `CloudProvider` contract.
//! Content hashes are always present on file entries, so dedup downstream
//! never needs the remote-id fallback for this backend.

pub mod connector;
pub mod types;

pub use connector::DropboxConnector;
