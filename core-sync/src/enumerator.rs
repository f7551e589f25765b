//! Folder Enumerator
//!
//! Depth-first traversal of a mapped folder tree. Each folder is drained
//! page by page (cursor until `has_more` is false), its files collected in
//! listing order, then its subfolders visited in listing order. For a fixed
//! remote tree the output order is deterministic, which keeps discovery-order
//! derived properties reproducible across runs.

use crate::error::{Result, SyncError};
use bridge_traits::provider::{CloudProvider, ProviderError, RemoteFile};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Bounded retries for a rate-limited listing page before the page counts as
/// failed
const MAX_PAGE_ATTEMPTS: u32 = 4;

/// Fallback backoff when the provider sends no Retry-After
const PAGE_BACKOFF_BASE_MS: u64 = 500;

pub struct FolderEnumerator {
    provider: Arc<dyn CloudProvider>,
}

impl FolderEnumerator {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self { provider }
    }

    /// Collect every file under `root_path`, recursively.
    #[instrument(skip(self, access_token, cancel), fields(root = %root_path))]
    pub async fn list_all_files(
        &self,
        access_token: &str,
        root_path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteFile>> {
        let mut files = Vec::new();
        self.walk(access_token, root_path.to_string(), cancel, &mut files)
            .await?;
        debug!(total = files.len(), "Enumeration finished");
        Ok(files)
    }

    fn walk<'a>(
        &'a self,
        access_token: &'a str,
        path: String,
        cancel: &'a CancellationToken,
        out: &'a mut Vec<RemoteFile>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut subfolders = Vec::new();
            let mut cursor: Option<String> = None;

            loop {
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }

                let page = self
                    .list_page_with_backoff(access_token, &path, cursor.as_deref(), cancel)
                    .await?;
                out.extend(page.files);
                subfolders.extend(page.folders);

                if !page.has_more {
                    break;
                }
                cursor = page.cursor;
                if cursor.is_none() {
                    // has_more without a cursor cannot be followed; stop
                    // rather than loop on the same page
                    warn!(path = %path, "Listing reported has_more without a cursor");
                    break;
                }
            }

            for folder in subfolders {
                self.walk(access_token, folder.path, cancel, out).await?;
            }
            Ok(())
        })
    }

    /// One page, retrying rate limits a bounded number of times. Honors the
    /// provider's Retry-After when given, exponential backoff otherwise.
    async fn list_page_with_backoff(
        &self,
        access_token: &str,
        path: &str,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<bridge_traits::provider::FolderPage> {
        let mut attempt = 0;
        loop {
            match self.provider.list_folder(access_token, path, cursor).await {
                Ok(page) => return Ok(page),
                Err(ProviderError::RateLimited { retry_after_secs }) => {
                    attempt += 1;
                    if attempt >= MAX_PAGE_ATTEMPTS {
                        return Err(ProviderError::RateLimited { retry_after_secs }.into());
                    }
                    let delay = retry_after_secs
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| {
                            Duration::from_millis(PAGE_BACKOFF_BASE_MS * 2u64.pow(attempt))
                        });
                    warn!(
                        path = %path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited while listing; backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::provider::{
        FolderPage, ProviderResult, ProviderTokens, RemoteAccount, RemoteFolder,
    };
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// In-memory tree keyed by path; each folder's listing may be split into
    /// pages of `page_size`.
    struct TreeProvider {
        tree: Mutex<HashMap<String, FolderPage>>,
        rate_limit_first_n: AtomicU32,
        calls: AtomicU32,
    }

    impl TreeProvider {
        fn new() -> Self {
            Self {
                tree: Mutex::new(HashMap::new()),
                rate_limit_first_n: AtomicU32::new(0),
                calls: AtomicU32::new(0),
            }
        }

        fn folder(path: &str, name: &str) -> RemoteFolder {
            RemoteFolder {
                id: format!("id:{}", path),
                name: name.to_string(),
                path: path.to_string(),
                display_path: path.to_string(),
            }
        }

        fn file(name: &str) -> RemoteFile {
            RemoteFile {
                id: format!("id:{}", name),
                name: name.to_string(),
                path: format!("/{}", name),
                display_path: format!("/{}", name),
                size: Some(1),
                modified_at: None,
                is_downloadable: true,
                content_hash: None,
            }
        }

        fn insert(&self, path: &str, page: FolderPage) {
            self.tree.lock().unwrap().insert(path.to_string(), page);
        }
    }

    #[async_trait]
    impl CloudProvider for TreeProvider {
        fn tag(&self) -> &'static str {
            "dropbox"
        }
        fn authorization_url(&self, _: &str, _: &str) -> ProviderResult<String> {
            unimplemented!()
        }
        async fn exchange_code(&self, _: &str, _: &str) -> ProviderResult<ProviderTokens> {
            unimplemented!()
        }
        async fn refresh(&self, _: &str) -> ProviderResult<ProviderTokens> {
            unimplemented!()
        }
        async fn revoke(&self, _: &str) -> ProviderResult<bool> {
            Ok(true)
        }
        async fn verify(&self, _: &str) -> ProviderResult<bool> {
            Ok(true)
        }
        async fn account_info(&self, _: &str) -> ProviderResult<RemoteAccount> {
            unimplemented!()
        }
        async fn list_folder(
            &self,
            _: &str,
            path: &str,
            cursor: Option<&str>,
        ) -> ProviderResult<FolderPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.rate_limit_first_n.load(Ordering::SeqCst);
            if remaining > 0 {
                self.rate_limit_first_n.store(remaining - 1, Ordering::SeqCst);
                return Err(ProviderError::RateLimited {
                    retry_after_secs: Some(0),
                });
            }

            // Cursors address a stashed continuation page directly
            let key = cursor.unwrap_or(path);
            let tree = self.tree.lock().unwrap();
            let page = tree
                .get(key)
                .ok_or_else(|| ProviderError::FolderNotFound(key.to_string()))?;
            Ok(FolderPage {
                folders: page.folders.clone(),
                files: page.files.clone(),
                has_more: page.has_more,
                cursor: page.cursor.clone(),
            })
        }
        async fn search_folders(
            &self,
            _: &str,
            _: &str,
            _: u32,
        ) -> ProviderResult<Vec<RemoteFolder>> {
            Ok(vec![])
        }
        async fn download_file(&self, _: &str, _: &str) -> ProviderResult<Bytes> {
            Ok(Bytes::new())
        }
        async fn get_download_url(&self, _: &str, _: &str) -> ProviderResult<String> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_depth_first_deterministic_order() {
        let provider = TreeProvider::new();
        provider.insert(
            "/root",
            FolderPage {
                folders: vec![
                    TreeProvider::folder("/root/a", "a"),
                    TreeProvider::folder("/root/b", "b"),
                ],
                files: vec![TreeProvider::file("root1.pdf")],
                has_more: false,
                cursor: None,
            },
        );
        provider.insert(
            "/root/a",
            FolderPage {
                folders: vec![TreeProvider::folder("/root/a/deep", "deep")],
                files: vec![TreeProvider::file("a1.pdf")],
                has_more: false,
                cursor: None,
            },
        );
        provider.insert(
            "/root/a/deep",
            FolderPage {
                files: vec![TreeProvider::file("deep1.pdf")],
                ..FolderPage::default()
            },
        );
        provider.insert(
            "/root/b",
            FolderPage {
                files: vec![TreeProvider::file("b1.pdf")],
                ..FolderPage::default()
            },
        );

        let enumerator = FolderEnumerator::new(Arc::new(provider));
        let files = enumerator
            .list_all_files("tok", "/root", &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["root1.pdf", "a1.pdf", "deep1.pdf", "b1.pdf"]);
    }

    #[tokio::test]
    async fn test_pagination_is_drained_before_recursion() {
        let provider = TreeProvider::new();
        provider.insert(
            "/root",
            FolderPage {
                folders: vec![TreeProvider::folder("/root/sub", "sub")],
                files: vec![TreeProvider::file("p1.pdf")],
                has_more: true,
                cursor: Some("cursor-2".to_string()),
            },
        );
        provider.insert(
            "cursor-2",
            FolderPage {
                files: vec![TreeProvider::file("p2.pdf")],
                ..FolderPage::default()
            },
        );
        provider.insert(
            "/root/sub",
            FolderPage {
                files: vec![TreeProvider::file("s1.pdf")],
                ..FolderPage::default()
            },
        );

        let enumerator = FolderEnumerator::new(Arc::new(provider));
        let files = enumerator
            .list_all_files("tok", "/root", &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["p1.pdf", "p2.pdf", "s1.pdf"]);
    }

    #[tokio::test]
    async fn test_rate_limit_retried_within_bound() {
        let provider = TreeProvider::new();
        provider.insert(
            "/root",
            FolderPage {
                files: vec![TreeProvider::file("f.pdf")],
                ..FolderPage::default()
            },
        );
        provider.rate_limit_first_n.store(2, Ordering::SeqCst);

        let enumerator = FolderEnumerator::new(Arc::new(provider));
        let files = enumerator
            .list_all_files("tok", "/root", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_fails() {
        let provider = TreeProvider::new();
        provider.insert("/root", FolderPage::default());
        provider
            .rate_limit_first_n
            .store(MAX_PAGE_ATTEMPTS + 1, Ordering::SeqCst);

        let enumerator = FolderEnumerator::new(Arc::new(provider));
        let err = enumerator
            .list_all_files("tok", "/root", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Provider(ProviderError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_stops_traversal() {
        let provider = TreeProvider::new();
        provider.insert(
            "/root",
            FolderPage {
                files: vec![TreeProvider::file("f.pdf")],
                ..FolderPage::default()
            },
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let enumerator = FolderEnumerator::new(Arc::new(provider));
        let err = enumerator
            .list_all_files("tok", "/root", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_root_propagates() {
        let provider = TreeProvider::new();
        let enumerator = FolderEnumerator::new(Arc::new(provider));
        let err = enumerator
            .list_all_files("tok", "/nowhere", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Provider(ProviderError::FolderNotFound(_))
        ));
    }
}
