//! Microsoft Graph connector for OneDrive
//!
//! Implements the `CloudProvider` trait against Graph v1.0. Listings page
//! through `@odata.nextLink`, which is a complete URL and becomes the cursor
//! unchanged. Microsoft identity has no token revocation endpoint, so
//! `revoke` reports success and disconnect relies on local deactivation plus
//! natural token expiry.

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::provider::{
    CloudProvider, FolderPage, ProviderError, ProviderResult, ProviderTokens, RemoteAccount,
    RemoteFile, RemoteFolder,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_auth::state::encode_state;
use core_auth::types::{ProviderKind, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::types::{DriveItem, DriveItemList, GraphErrorResponse, TokenResponse, UserResponse};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

/// OAuth scopes: read-only drive access plus `offline_access` for refresh
/// tokens and `User.Read` for account identity.
const SCOPES: &str = "Files.Read.All offline_access User.Read";

/// Page size for folder listings
const PAGE_SIZE: u32 = 200;

const SELECT_FIELDS: &str = "id,name,size,folder,file,parentReference,lastModifiedDateTime";

const ENV_CLIENT_ID: &str = "ONEDRIVE_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "ONEDRIVE_CLIENT_SECRET";
const ENV_TENANT_ID: &str = "ONEDRIVE_TENANT_ID";
const ENV_STATE_SECRET: &str = "SYNC_STATE_SECRET";

/// OneDrive connector
pub struct OneDriveConnector {
    http_client: Arc<dyn HttpClient>,
    client_id: String,
    client_secret: String,
    tenant_id: String,
    state_secret: String,
}

impl OneDriveConnector {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        tenant_id: impl Into<String>,
        state_secret: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            tenant_id: tenant_id.into(),
            state_secret: state_secret.into(),
        }
    }

    /// Construct from environment, failing when any variable is missing.
    pub fn from_env(http_client: Arc<dyn HttpClient>) -> ProviderResult<Self> {
        let client_id = require_env(ENV_CLIENT_ID)?;
        let client_secret = require_env(ENV_CLIENT_SECRET)?;
        let tenant_id = require_env(ENV_TENANT_ID)?;
        let state_secret = require_env(ENV_STATE_SECRET)?;
        Ok(Self::new(
            http_client,
            client_id,
            client_secret,
            tenant_id,
            state_secret,
        ))
    }

    fn login_url(&self, endpoint: &str) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/{}",
            self.tenant_id, endpoint
        )
    }

    /// GET a Graph URL and map non-2xx statuses to the shared taxonomy.
    async fn api_get(
        &self,
        access_token: &str,
        url: String,
        context: &str,
    ) -> ProviderResult<HttpResponse> {
        let request = HttpRequest::new(HttpMethod::Get, url)
            .bearer_token(access_token)
            .header("Accept", "application/json")
            .timeout(Duration::from_secs(30));

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(map_graph_error(&response, context))
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> ProviderResult<ProviderTokens> {
        let body = serde_urlencoded::to_string(form)
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let request = HttpRequest::new(HttpMethod::Post, self.login_url("token"))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(Bytes::from(body))
            .timeout(Duration::from_secs(30));

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(ProviderError::TokenRefreshFailed(format!(
                "token endpoint returned {}: {}",
                response.status, detail
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(ProviderTokens {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            expires_in: parsed.expires_in,
        })
    }

    /// URL addressing the children of `path` relative to the drive root.
    fn children_url(path: &str) -> ProviderResult<String> {
        if path.is_empty() || path == "/" {
            return Ok(format!(
                "{}/me/drive/root/children?$top={}&$select={}",
                GRAPH_BASE, PAGE_SIZE, SELECT_FIELDS
            ));
        }
        if !path.starts_with('/') {
            return Err(ProviderError::InvalidPath(path.to_string()));
        }
        let encoded: Vec<String> = path
            .trim_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        Ok(format!(
            "{}/me/drive/root:/{}:/children?$top={}&$select={}",
            GRAPH_BASE,
            encoded.join("/"),
            PAGE_SIZE,
            SELECT_FIELDS
        ))
    }

    fn parse_timestamp(rfc3339: &str) -> Option<i64> {
        DateTime::parse_from_rfc3339(rfc3339)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).timestamp())
    }

    /// Rebuild the item's display path from its parent reference, e.g.
    /// `/drive/root:/Cases` + `Smith.pdf` -> `/Cases/Smith.pdf`.
    fn display_path(item: &DriveItem) -> String {
        let parent = item
            .parent_reference
            .as_ref()
            .and_then(|p| p.path.as_deref())
            .and_then(|p| p.split_once(':').map(|(_, rest)| rest))
            .unwrap_or("");
        format!("{}/{}", parent, item.name)
    }

    fn convert_file(item: DriveItem) -> Option<RemoteFile> {
        let file = item.file.as_ref()?;
        let content_hash = file
            .hashes
            .as_ref()
            .and_then(|h| h.quick_xor_hash.clone());
        let display_path = Self::display_path(&item);
        Some(RemoteFile {
            path: display_path.to_lowercase(),
            display_path,
            id: item.id,
            name: item.name,
            size: item.size,
            modified_at: item
                .last_modified_date_time
                .as_deref()
                .and_then(Self::parse_timestamp),
            is_downloadable: true,
            content_hash,
        })
    }

    fn convert_folder(item: DriveItem) -> Option<RemoteFolder> {
        item.folder.as_ref()?;
        let display_path = Self::display_path(&item);
        Some(RemoteFolder {
            path: display_path.to_lowercase(),
            display_path,
            id: item.id,
            name: item.name,
        })
    }

    fn convert_page(list: DriveItemList) -> FolderPage {
        let mut folders = Vec::new();
        let mut files = Vec::new();
        for item in list.value {
            if item.folder.is_some() {
                folders.extend(Self::convert_folder(item));
            } else if item.file.is_some() {
                files.extend(Self::convert_file(item));
            }
            // packages, notebooks and other facets are skipped
        }
        FolderPage {
            folders,
            files,
            has_more: list.next_link.is_some(),
            cursor: list.next_link,
        }
    }
}

fn require_env(name: &str) -> ProviderResult<String> {
    std::env::var(name).map_err(|_| ProviderError::Config(format!("{} is not set", name)))
}

fn map_graph_error(response: &HttpResponse, context: &str) -> ProviderError {
    let (code, message) = response
        .json::<GraphErrorResponse>()
        .ok()
        .and_then(|e| e.error)
        .map(|e| (e.code.unwrap_or_default(), e.message.unwrap_or_default()))
        .unwrap_or_default();
    let summary = format!("{}: {} {}", context, code, message);

    match response.status {
        401 => ProviderError::TokenExpired,
        403 => ProviderError::PermissionDenied(summary),
        404 => {
            if context.contains("/content") || context.contains("items/") {
                ProviderError::FileNotFound(summary)
            } else {
                ProviderError::FolderNotFound(summary)
            }
        }
        400 if code == "invalidRequest" => ProviderError::InvalidPath(summary),
        429 => ProviderError::RateLimited {
            retry_after_secs: response.retry_after_secs(),
        },
        status if status >= 500 => ProviderError::Network(summary),
        _ => ProviderError::Provider(summary),
    }
}

#[async_trait]
impl CloudProvider for OneDriveConnector {
    fn tag(&self) -> &'static str {
        "onedrive"
    }

    fn authorization_url(&self, user_id: &str, redirect_uri: &str) -> ProviderResult<String> {
        let user = UserId::from_string(user_id)
            .map_err(|e| ProviderError::Provider(format!("bad user id: {}", e)))?;
        let state = encode_state(&self.state_secret, user, ProviderKind::OneDrive);

        Ok(format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&scope={}&state={}",
            self.login_url("authorize"),
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(SCOPES),
            urlencoding::encode(&state),
        ))
    }

    #[instrument(skip(self, code))]
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> ProviderResult<ProviderTokens> {
        info!("Exchanging authorization code");
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("scope", SCOPES),
        ])
        .await
    }

    #[instrument(skip(self, refresh_token))]
    async fn refresh(&self, refresh_token: &str) -> ProviderResult<ProviderTokens> {
        debug!("Refreshing access token");
        // Microsoft rotates refresh tokens; the response carries the new one
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("scope", SCOPES),
        ])
        .await
    }

    async fn revoke(&self, _access_token: &str) -> ProviderResult<bool> {
        // Microsoft identity exposes no token revocation endpoint; local
        // deactivation plus token expiry is the whole story.
        debug!("Revocation not supported by provider; reporting success");
        Ok(true)
    }

    async fn verify(&self, access_token: &str) -> ProviderResult<bool> {
        match self.account_info(access_token).await {
            Ok(_) => Ok(true),
            Err(ProviderError::TokenExpired) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, access_token))]
    async fn account_info(&self, access_token: &str) -> ProviderResult<RemoteAccount> {
        let response = self
            .api_get(access_token, format!("{}/me", GRAPH_BASE), "me")
            .await?;
        let user: UserResponse = response
            .json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(RemoteAccount {
            id: user.id,
            email: user.mail.or(user.user_principal_name),
            display_name: user.display_name,
        })
    }

    #[instrument(skip(self, access_token), fields(path = %path, continued = cursor.is_some()))]
    async fn list_folder(
        &self,
        access_token: &str,
        path: &str,
        cursor: Option<&str>,
    ) -> ProviderResult<FolderPage> {
        let url = match cursor {
            Some(next_link) => next_link.to_string(),
            None => Self::children_url(path)?,
        };

        let response = self.api_get(access_token, url, "children").await?;
        let parsed: DriveItemList = response
            .json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let page = Self::convert_page(parsed);
        debug!(
            folders = page.folders.len(),
            files = page.files.len(),
            has_more = page.has_more,
            "Listed folder page"
        );
        Ok(page)
    }

    #[instrument(skip(self, access_token), fields(query = %query))]
    async fn search_folders(
        &self,
        access_token: &str,
        query: &str,
        max_results: u32,
    ) -> ProviderResult<Vec<RemoteFolder>> {
        // Single quotes are doubled inside the q='...' literal
        let escaped = query.replace('\'', "''");
        let url = format!(
            "{}/me/drive/root/search(q='{}')?$top={}&$select={}",
            GRAPH_BASE,
            urlencoding::encode(&escaped),
            max_results,
            SELECT_FIELDS
        );

        let response = self.api_get(access_token, url, "search").await?;
        let parsed: DriveItemList = response
            .json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed
            .value
            .into_iter()
            .filter_map(Self::convert_folder)
            .collect())
    }

    #[instrument(skip(self, access_token), fields(file_id = %file_id))]
    async fn download_file(&self, access_token: &str, file_id: &str) -> ProviderResult<Bytes> {
        let request = HttpRequest::new(
            HttpMethod::Get,
            format!("{}/me/drive/items/{}/content", GRAPH_BASE, file_id),
        )
        .bearer_token(access_token)
        .timeout(Duration::from_secs(300));

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.is_success() {
            return Err(map_graph_error(&response, "items/content"));
        }
        Ok(response.body)
    }

    #[instrument(skip(self, access_token), fields(file_id = %file_id))]
    async fn get_download_url(
        &self,
        access_token: &str,
        file_id: &str,
    ) -> ProviderResult<String> {
        let response = self
            .api_get(
                access_token,
                format!("{}/me/drive/items/{}", GRAPH_BASE, file_id),
                "items/metadata",
            )
            .await?;
        let item: DriveItem = response
            .json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        item.download_url.ok_or_else(|| {
            ProviderError::Provider(format!("no download URL for item {}", file_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use core_auth::state::validate_state;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn connector(http: MockHttp) -> OneDriveConnector {
        OneDriveConnector::new(
            Arc::new(http),
            "cid",
            "csecret",
            "tenant-1",
            "state-secret",
        )
    }

    fn response(status: u16, body: &'static str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_authorization_url_is_tenant_scoped() {
        let conn = connector(MockHttp::new());
        let user = UserId::new();
        let url = conn
            .authorization_url(&user.to_string(), "https://app.example.com/cb")
            .unwrap();
        assert!(url.starts_with("https://login.microsoftonline.com/tenant-1/oauth2/v2.0/authorize"));
        assert!(url.contains("offline_access"));

        let state = url.split("state=").nth(1).unwrap();
        let state = urlencoding::decode(state).unwrap();
        let recovered = validate_state("state-secret", &state, ProviderKind::OneDrive).unwrap();
        assert_eq!(recovered, user);
    }

    #[test]
    fn test_children_url_shapes() {
        assert!(OneDriveConnector::children_url("")
            .unwrap()
            .contains("/me/drive/root/children"));
        assert!(OneDriveConnector::children_url("/Cases/Smith v. Jones")
            .unwrap()
            .contains("/me/drive/root:/Cases/Smith%20v.%20Jones:/children"));
        assert!(matches!(
            OneDriveConnector::children_url("relative/path"),
            Err(ProviderError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_code_hits_tenant_token_endpoint() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|req| {
            assert_eq!(
                req.url,
                "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/token"
            );
            let body = String::from_utf8(req.body.unwrap().to_vec()).unwrap();
            assert!(body.contains("grant_type=authorization_code"));
            Ok(response(
                200,
                r#"{"access_token":"at","expires_in":3600,"refresh_token":"rt"}"#,
            ))
        });

        let tokens = connector(http)
            .exchange_code("code-1", "https://app.example.com/cb")
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt"));
    }

    #[tokio::test]
    async fn test_list_folder_maps_items_and_next_link() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|req| {
            assert!(req.url.contains("/me/drive/root:/Cases:/children"));
            Ok(response(
                200,
                r#"{
                    "value": [
                        {"id":"f1","name":"Discovery","folder":{"childCount":3},
                         "parentReference":{"path":"/drive/root:/Cases"}},
                        {"id":"a1","name":"Motion.docx","size":4096,
                         "lastModifiedDateTime":"2026-02-03T04:05:06Z",
                         "file":{"mimeType":"application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                                 "hashes":{"quickXorHash":"qx1"}},
                         "parentReference":{"path":"/drive/root:/Cases"}},
                        {"id":"a2","name":"scan.pdf","size":100,
                         "file":{"mimeType":"application/pdf"},
                         "parentReference":{"path":"/drive/root:/Cases"}}
                    ],
                    "@odata.nextLink":"https://graph.microsoft.com/v1.0/next-page"
                }"#,
            ))
        });

        let page = connector(http)
            .list_folder("tok", "/Cases", None)
            .await
            .unwrap();
        assert_eq!(page.folders.len(), 1);
        assert_eq!(page.folders[0].display_path, "/Cases/Discovery");
        assert_eq!(page.folders[0].path, "/cases/discovery");
        assert_eq!(page.files.len(), 2);
        assert_eq!(page.files[0].content_hash.as_deref(), Some("qx1"));
        // Hash is frequently absent on OneDrive items
        assert_eq!(page.files[1].content_hash, None);
        assert!(page.has_more);
        assert_eq!(
            page.cursor.as_deref(),
            Some("https://graph.microsoft.com/v1.0/next-page")
        );
    }

    #[tokio::test]
    async fn test_cursor_is_followed_verbatim() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.url, "https://graph.microsoft.com/v1.0/next-page");
            Ok(response(200, r#"{"value":[]}"#))
        });

        let page = connector(http)
            .list_folder(
                "tok",
                "/ignored",
                Some("https://graph.microsoft.com/v1.0/next-page"),
            )
            .await
            .unwrap();
        assert!(!page.has_more);
        assert!(page.cursor.is_none());
    }

    #[tokio::test]
    async fn test_missing_folder_maps() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|_| {
            Ok(response(
                404,
                r#"{"error":{"code":"itemNotFound","message":"The resource could not be found."}}"#,
            ))
        });

        let err = connector(http)
            .list_folder("tok", "/gone", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FolderNotFound(_)));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_token_expired() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(401, r#"{"error":{"code":"InvalidAuthenticationToken"}}"#)));

        let err = connector(http)
            .list_folder("tok", "", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::TokenExpired));
    }

    #[tokio::test]
    async fn test_rate_limited_carries_retry_after() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|_| {
            Ok(HttpResponse {
                status: 429,
                headers: HashMap::from([("Retry-After".to_string(), "30".to_string())]),
                body: Bytes::new(),
            })
        });

        let err = connector(http)
            .list_folder("tok", "", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::RateLimited {
                retry_after_secs: Some(30)
            }
        ));
    }

    #[tokio::test]
    async fn test_account_info_falls_back_to_principal_name() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|_| {
            Ok(response(
                200,
                r#"{"id":"u1","mail":null,"userPrincipalName":"jdoe@firm.example","displayName":"J. Doe"}"#,
            ))
        });

        let account = connector(http).account_info("tok").await.unwrap();
        assert_eq!(account.id, "u1");
        assert_eq!(account.email.as_deref(), Some("jdoe@firm.example"));
        assert_eq!(account.display_name.as_deref(), Some("J. Doe"));
    }

    #[tokio::test]
    async fn test_download_url_from_item_metadata() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|req| {
            assert!(req.url.ends_with("/me/drive/items/a1"));
            Ok(response(
                200,
                r#"{"id":"a1","name":"Motion.docx",
                    "@microsoft.graph.downloadUrl":"https://dl.example.com/y"}"#,
            ))
        });

        let url = connector(http).get_download_url("tok", "a1").await.unwrap();
        assert_eq!(url, "https://dl.example.com/y");
    }

    #[tokio::test]
    async fn test_revoke_is_best_effort_success() {
        assert!(connector(MockHttp::new()).revoke("tok").await.unwrap());
    }

    #[tokio::test]
    async fn test_search_returns_folders_only() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|req| {
            assert!(req.url.contains("search(q="));
            Ok(response(
                200,
                r#"{"value":[
                    {"id":"f1","name":"Smith v. Jones","folder":{"childCount":9},
                     "parentReference":{"path":"/drive/root:"}},
                    {"id":"a1","name":"smith.pdf","file":{"mimeType":"application/pdf"},
                     "parentReference":{"path":"/drive/root:"}}
                ]}"#,
            ))
        });

        let folders = connector(http)
            .search_folders("tok", "smith", 20)
            .await
            .unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].display_path, "/Smith v. Jones");
    }
}
