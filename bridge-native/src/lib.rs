//! # Native Bridge
//!
//! Production implementations of the `bridge-traits` contracts:
//!
//! - [`ReqwestHttpClient`]: connection-pooled HTTP with retry on transient
//!   failures
//! - [`HttpBlobStore`]: blob-storage client authenticated by a write token
//!
//! Both are constructed once at process start and passed down by dependency
//! injection; nothing in this crate holds global state.

pub mod blob;
pub mod http;

pub use blob::HttpBlobStore;
pub use http::ReqwestHttpClient;
