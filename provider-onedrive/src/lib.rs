//! # OneDrive Provider
//!
//! Microsoft Graph adapter implementing the shared `CloudProvider` contract.
//! Content hashes are often absent on Graph items, so dedup downstream falls
//! back to remote-id uniqueness for the files that lack one.

pub mod connector;
pub mod types;

pub use connector::OneDriveConnector;
