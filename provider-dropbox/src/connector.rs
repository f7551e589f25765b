//! Dropbox API v2 connector
//!
//! Implements the `CloudProvider` trait against the Dropbox HTTP API. All
//! metadata calls are POSTs with JSON bodies against `api.dropboxapi.com`;
//! file content moves through `content.dropboxapi.com` where the argument
//! travels in the `Dropbox-API-Arg` header instead of the body.

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
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::types::{
    AccountResponse, ApiErrorResponse, ListFolderResponse, MetadataEntry, SearchResponse,
    TemporaryLinkResponse, TokenResponse,
};

const AUTHORIZE_URL: &str = "https://www.dropbox.com/oauth2/authorize";
const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";
const API_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

/// Page size for folder listings (Dropbox maximum is 2000)
const LIST_FOLDER_LIMIT: u32 = 2000;

const ENV_CLIENT_ID: &str = "DROPBOX_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "DROPBOX_CLIENT_SECRET";
const ENV_STATE_SECRET: &str = "SYNC_STATE_SECRET";

/// Dropbox connector
pub struct DropboxConnector {
    http_client: Arc<dyn HttpClient>,
    client_id: String,
    client_secret: String,
    state_secret: String,
}

impl DropboxConnector {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        state_secret: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            state_secret: state_secret.into(),
        }
    }

    /// Construct from environment, failing when any variable is missing.
    pub fn from_env(http_client: Arc<dyn HttpClient>) -> ProviderResult<Self> {
        let client_id = require_env(ENV_CLIENT_ID)?;
        let client_secret = require_env(ENV_CLIENT_SECRET)?;
        let state_secret = require_env(ENV_STATE_SECRET)?;
        Ok(Self::new(http_client, client_id, client_secret, state_secret))
    }

    /// POST a JSON-bodied API call and map non-2xx statuses to the shared
    /// error taxonomy. Single-shot; retry policy belongs to callers.
    async fn api_post<B: serde::Serialize>(
        &self,
        access_token: &str,
        url: String,
        body: &B,
        context: &str,
    ) -> ProviderResult<HttpResponse> {
        let request = HttpRequest::new(HttpMethod::Post, url)
            .bearer_token(access_token)
            .json(body)
            .map_err(|e| ProviderError::Parse(e.to_string()))?
            .timeout(Duration::from_secs(30));

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(self.map_api_error(&response, context))
        }
    }

    fn map_api_error(&self, response: &HttpResponse, context: &str) -> ProviderError {
        let summary = response
            .json::<ApiErrorResponse>()
            .ok()
            .and_then(|e| e.error_summary)
            .unwrap_or_else(|| format!("HTTP {}", response.status));

        match response.status {
            401 => ProviderError::TokenExpired,
            403 => ProviderError::PermissionDenied(summary),
            429 => ProviderError::RateLimited {
                retry_after_secs: response.retry_after_secs(),
            },
            409 if summary.contains("not_found") => {
                if context.starts_with("files/download")
                    || context.starts_with("files/get_temporary_link")
                {
                    ProviderError::FileNotFound(summary)
                } else {
                    ProviderError::FolderNotFound(summary)
                }
            }
            409 if summary.contains("malformed_path") => ProviderError::InvalidPath(summary),
            status if status >= 500 => {
                ProviderError::Network(format!("{} returned {}", context, status))
            }
            status => ProviderError::Provider(format!("{}: {} ({})", context, summary, status)),
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> ProviderResult<ProviderTokens> {
        let body = serde_urlencoded::to_string(form)
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let request = HttpRequest::new(HttpMethod::Post, TOKEN_URL)
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

    fn parse_timestamp(rfc3339: &str) -> Option<i64> {
        DateTime::parse_from_rfc3339(rfc3339)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).timestamp())
    }

    fn convert_file(entry: MetadataEntry) -> Option<RemoteFile> {
        let id = entry.id?;
        let path = entry.path_lower.clone()?;
        Some(RemoteFile {
            id,
            name: entry.name,
            display_path: entry.path_display.unwrap_or_else(|| path.clone()),
            path,
            size: entry.size,
            modified_at: entry.server_modified.as_deref().and_then(Self::parse_timestamp),
            is_downloadable: entry.is_downloadable.unwrap_or(true),
            content_hash: entry.content_hash,
        })
    }

    fn convert_folder(entry: MetadataEntry) -> Option<RemoteFolder> {
        let id = entry.id?;
        let path = entry.path_lower.clone()?;
        Some(RemoteFolder {
            id,
            name: entry.name,
            display_path: entry.path_display.unwrap_or_else(|| path.clone()),
            path,
        })
    }

    fn convert_page(response: ListFolderResponse) -> FolderPage {
        let mut folders = Vec::new();
        let mut files = Vec::new();
        for entry in response.entries {
            match entry.tag.as_str() {
                "folder" => folders.extend(Self::convert_folder(entry)),
                "file" => files.extend(Self::convert_file(entry)),
                // deleted entries and unknown tags are skipped
                _ => {}
            }
        }
        FolderPage {
            folders,
            files,
            has_more: response.has_more,
            cursor: Some(response.cursor),
        }
    }
}

fn require_env(name: &str) -> ProviderResult<String> {
    std::env::var(name).map_err(|_| ProviderError::Config(format!("{} is not set", name)))
}

#[async_trait]
impl CloudProvider for DropboxConnector {
    fn tag(&self) -> &'static str {
        "dropbox"
    }

    fn authorization_url(&self, user_id: &str, redirect_uri: &str) -> ProviderResult<String> {
        let user = UserId::from_string(user_id)
            .map_err(|e| ProviderError::Provider(format!("bad user id: {}", e)))?;
        let state = encode_state(&self.state_secret, user, ProviderKind::Dropbox);

        Ok(format!(
            "{}?client_id={}&response_type=code&token_access_type=offline&redirect_uri={}&state={}",
            AUTHORIZE_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
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
        ])
        .await
    }

    #[instrument(skip(self, refresh_token))]
    async fn refresh(&self, refresh_token: &str) -> ProviderResult<ProviderTokens> {
        debug!("Refreshing access token");
        // Dropbox does not rotate refresh tokens; the response omits one
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ])
        .await
    }

    #[instrument(skip(self, access_token))]
    async fn revoke(&self, access_token: &str) -> ProviderResult<bool> {
        let request = HttpRequest::new(
            HttpMethod::Post,
            format!("{}/auth/token/revoke", API_BASE),
        )
        .bearer_token(access_token)
        .timeout(Duration::from_secs(30));

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        // 401 means the token is already dead, which is the goal
        match response.status {
            200 | 401 => Ok(true),
            status => {
                warn!(status, "Token revocation rejected");
                Ok(false)
            }
        }
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
            .api_post(
                access_token,
                format!("{}/users/get_current_account", API_BASE),
                &json!(null),
                "users/get_current_account",
            )
            .await?;

        let account: AccountResponse = response
            .json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(RemoteAccount {
            id: account.account_id,
            email: account.email,
            display_name: account.name.map(|n| n.display_name),
        })
    }

    #[instrument(skip(self, access_token), fields(path = %path, continued = cursor.is_some()))]
    async fn list_folder(
        &self,
        access_token: &str,
        path: &str,
        cursor: Option<&str>,
    ) -> ProviderResult<FolderPage> {
        let response = match cursor {
            Some(cursor) => {
                self.api_post(
                    access_token,
                    format!("{}/files/list_folder/continue", API_BASE),
                    &json!({ "cursor": cursor }),
                    "files/list_folder/continue",
                )
                .await?
            }
            None => {
                // Root is the empty string; anything else must be absolute
                if !path.is_empty() && !path.starts_with('/') {
                    return Err(ProviderError::InvalidPath(path.to_string()));
                }
                self.api_post(
                    access_token,
                    format!("{}/files/list_folder", API_BASE),
                    &json!({
                        "path": path,
                        "recursive": false,
                        "limit": LIST_FOLDER_LIMIT,
                        "include_non_downloadable_files": true,
                    }),
                    "files/list_folder",
                )
                .await?
            }
        };

        let parsed: ListFolderResponse = response
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
        let response = self
            .api_post(
                access_token,
                format!("{}/files/search_v2", API_BASE),
                &json!({
                    "query": query,
                    "options": {
                        "max_results": max_results,
                        "filename_only": true,
                        "file_status": "active",
                    },
                }),
                "files/search_v2",
            )
            .await?;

        let parsed: SearchResponse = response
            .json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed
            .matches
            .into_iter()
            .map(|m| m.metadata.metadata)
            .filter(|entry| entry.tag == "folder")
            .filter_map(Self::convert_folder)
            .collect())
    }

    #[instrument(skip(self, access_token), fields(file_id = %file_id))]
    async fn download_file(&self, access_token: &str, file_id: &str) -> ProviderResult<Bytes> {
        let arg = serde_json::to_string(&json!({ "path": file_id }))
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let request = HttpRequest::new(
            HttpMethod::Post,
            format!("{}/files/download", CONTENT_BASE),
        )
        .bearer_token(access_token)
        .header("Dropbox-API-Arg", arg)
        .timeout(Duration::from_secs(300));

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.is_success() {
            return Err(self.map_api_error(&response, "files/download"));
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
            .api_post(
                access_token,
                format!("{}/files/get_temporary_link", API_BASE),
                &json!({ "path": file_id }),
                "files/get_temporary_link",
            )
            .await?;

        let parsed: TemporaryLinkResponse = response
            .json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed.link)
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

    fn connector(http: MockHttp) -> DropboxConnector {
        DropboxConnector::new(Arc::new(http), "cid", "csecret", "state-secret")
    }

    fn response(status: u16, body: &'static str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_authorization_url_embeds_valid_state() {
        let conn = connector(MockHttp::new());
        let user = UserId::new();
        let url = conn
            .authorization_url(&user.to_string(), "https://app.example.com/cb")
            .unwrap();
        assert!(url.starts_with(AUTHORIZE_URL));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("token_access_type=offline"));

        let state = url.split("state=").nth(1).unwrap();
        let state = urlencoding::decode(state).unwrap();
        let recovered = validate_state("state-secret", &state, ProviderKind::Dropbox).unwrap();
        assert_eq!(recovered, user);
    }

    #[tokio::test]
    async fn test_exchange_code_parses_tokens() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.url, TOKEN_URL);
            let body = String::from_utf8(req.body.unwrap().to_vec()).unwrap();
            assert!(body.contains("grant_type=authorization_code"));
            assert!(body.contains("code=the-code"));
            Ok(response(
                200,
                r#"{"access_token":"at","expires_in":14400,"refresh_token":"rt"}"#,
            ))
        });

        let tokens = connector(http)
            .exchange_code("the-code", "https://app.example.com/cb")
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt"));
        assert_eq!(tokens.expires_in, 14400);
    }

    #[tokio::test]
    async fn test_refresh_failure_maps() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(400, r#"{"error":"invalid_grant"}"#)));

        let err = connector(http).refresh("dead-rt").await.unwrap_err();
        assert!(matches!(err, ProviderError::TokenRefreshFailed(_)));
    }

    #[tokio::test]
    async fn test_list_folder_maps_entries() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|req| {
            assert!(req.url.ends_with("/files/list_folder"));
            Ok(response(
                200,
                r#"{
                    "entries": [
                        {".tag":"folder","id":"id:f1","name":"Pleadings",
                         "path_lower":"/case/pleadings","path_display":"/Case/Pleadings"},
                        {".tag":"file","id":"id:a1","name":"complaint.pdf",
                         "path_lower":"/case/complaint.pdf","path_display":"/Case/complaint.pdf",
                         "size":2048,"server_modified":"2026-01-02T03:04:05Z",
                         "content_hash":"abc123","is_downloadable":true},
                        {".tag":"deleted","name":"gone.txt"}
                    ],
                    "cursor":"cur-1",
                    "has_more":true
                }"#,
            ))
        });

        let page = connector(http)
            .list_folder("tok", "/case", None)
            .await
            .unwrap();
        assert_eq!(page.folders.len(), 1);
        assert_eq!(page.folders[0].path, "/case/pleadings");
        assert_eq!(page.files.len(), 1);
        assert_eq!(page.files[0].content_hash.as_deref(), Some("abc123"));
        assert_eq!(page.files[0].size, Some(2048));
        assert!(page.has_more);
        assert_eq!(page.cursor.as_deref(), Some("cur-1"));
    }

    #[tokio::test]
    async fn test_list_folder_continue_uses_cursor() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|req| {
            assert!(req.url.ends_with("/files/list_folder/continue"));
            let body = String::from_utf8(req.body.unwrap().to_vec()).unwrap();
            assert!(body.contains("cur-1"));
            Ok(response(200, r#"{"entries":[],"cursor":"cur-2","has_more":false}"#))
        });

        let page = connector(http)
            .list_folder("tok", "/ignored", Some("cur-1"))
            .await
            .unwrap();
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_list_folder_relative_path_rejected() {
        let err = connector(MockHttp::new())
            .list_folder("tok", "case/docs", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_not_found_maps_to_folder_not_found() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|_| {
            Ok(response(
                409,
                r#"{"error_summary":"path/not_found/..","error":{}}"#,
            ))
        });

        let err = connector(http)
            .list_folder("tok", "/missing", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FolderNotFound(_)));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_token_expired() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(401, "")));

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
                headers: HashMap::from([("retry-after".to_string(), "7".to_string())]),
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
                retry_after_secs: Some(7)
            }
        ));
    }

    #[tokio::test]
    async fn test_download_uses_api_arg_header() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|req| {
            assert!(req.url.starts_with(CONTENT_BASE));
            let arg = req.headers.get("Dropbox-API-Arg").unwrap();
            assert!(arg.contains("id:a1"));
            Ok(response(200, "file-bytes"))
        });

        let body = connector(http).download_file("tok", "id:a1").await.unwrap();
        assert_eq!(&body[..], b"file-bytes");
    }

    #[tokio::test]
    async fn test_temporary_link() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|_| {
            Ok(response(
                200,
                r#"{"metadata":{},"link":"https://dl.example.com/x"}"#,
            ))
        });

        let link = connector(http)
            .get_download_url("tok", "id:a1")
            .await
            .unwrap();
        assert_eq!(link, "https://dl.example.com/x");
    }

    #[tokio::test]
    async fn test_revoke_tolerates_dead_token() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(401, "")));

        assert!(connector(http).revoke("dead").await.unwrap());
    }

    #[tokio::test]
    async fn test_search_filters_to_folders() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|_| {
            Ok(response(
                200,
                r#"{"matches":[
                    {"metadata":{"metadata":{".tag":"folder","id":"id:f1","name":"Smith v. Jones",
                        "path_lower":"/smith v. jones","path_display":"/Smith v. Jones"}}},
                    {"metadata":{"metadata":{".tag":"file","id":"id:a1","name":"smith.pdf",
                        "path_lower":"/smith.pdf","path_display":"/smith.pdf"}}}
                ]}"#,
            ))
        });

        let folders = connector(http)
            .search_folders("tok", "smith", 20)
            .await
            .unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name, "Smith v. Jones");
    }
}
