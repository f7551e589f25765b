//! Blob Store Client
//!
//! Talks to the external blob-storage service over HTTP. The service is an
//! opaque collaborator: we PUT bytes under a key, GET them back, DELETE them.
//! Authentication is a static write token supplied at process start.

use async_trait::async_trait;
use bridge_traits::{
    blob::BlobStore,
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest},
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Environment variable holding the blob service base URL
const ENV_BLOB_URL: &str = "BLOB_STORE_URL";

/// Environment variable holding the blob write token
const ENV_BLOB_TOKEN: &str = "BLOB_STORE_TOKEN";

/// HTTP-backed blob store client.
pub struct HttpBlobStore {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    write_token: String,
}

impl HttpBlobStore {
    /// Create a blob store client against `base_url`.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        write_token: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http_client,
            base_url,
            write_token: write_token.into(),
        }
    }

    /// Construct from environment. Fails when either variable is absent so a
    /// misconfigured process refuses to start instead of degrading.
    pub fn from_env(http_client: Arc<dyn HttpClient>) -> Result<Self> {
        let base_url = std::env::var(ENV_BLOB_URL)
            .map_err(|_| BridgeError::NotAvailable(format!("{} is not set", ENV_BLOB_URL)))?;
        let write_token = std::env::var(ENV_BLOB_TOKEN)
            .map_err(|_| BridgeError::NotAvailable(format!("{} is not set", ENV_BLOB_TOKEN)))?;
        Ok(Self::new(http_client, base_url, write_token))
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    #[instrument(skip(self, data), fields(key = %key, bytes = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> Result<String> {
        let url = self.url_for(key);
        let request = HttpRequest::new(HttpMethod::Put, url.clone())
            .bearer_token(&self.write_token)
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .timeout(Duration::from_secs(120));

        let response = self.http_client.execute(request).await?;
        if !response.is_success() {
            return Err(BridgeError::BlobStore(format!(
                "PUT {} returned {}",
                key, response.status
            )));
        }

        debug!("Stored blob");
        Ok(url)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        let request = HttpRequest::new(HttpMethod::Get, self.url_for(key))
            .bearer_token(&self.write_token)
            .timeout(Duration::from_secs(120));

        let response = self.http_client.execute(request).await?;
        if !response.is_success() {
            return Err(BridgeError::BlobStore(format!(
                "GET {} returned {}",
                key, response.status
            )));
        }
        Ok(response.body)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        let request = HttpRequest::new(HttpMethod::Delete, self.url_for(key))
            .bearer_token(&self.write_token)
            .timeout(Duration::from_secs(30));

        let response = self.http_client.execute(request).await?;
        // Missing blob is fine; the caller is cleaning up.
        if !response.is_success() && response.status != 404 {
            return Err(BridgeError::BlobStore(format!(
                "DELETE {} returned {}",
                key, response.status
            )));
        }
        Ok(())
    }
}
