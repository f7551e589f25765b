//! Dropbox API v2 wire types
//!
//! Response shapes only; request bodies are built inline as serde values at
//! the call sites that own them.

use serde::Deserialize;

/// OAuth token endpoint response
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: Option<String>,
}

/// One entry from `files/list_folder`; files and folders share the shape and
/// are distinguished by the `.tag` discriminator.
#[derive(Debug, Deserialize)]
pub struct MetadataEntry {
    #[serde(rename = ".tag")]
    pub tag: String,
    pub id: Option<String>,
    pub name: String,
    pub path_lower: Option<String>,
    pub path_display: Option<String>,
    pub size: Option<u64>,
    pub server_modified: Option<String>,
    pub content_hash: Option<String>,
    pub is_downloadable: Option<bool>,
}

/// `files/list_folder` and `files/list_folder/continue` response
#[derive(Debug, Deserialize)]
pub struct ListFolderResponse {
    pub entries: Vec<MetadataEntry>,
    pub cursor: String,
    pub has_more: bool,
}

/// `files/search_v2` response
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub matches: Vec<SearchMatch>,
}

#[derive(Debug, Deserialize)]
pub struct SearchMatch {
    pub metadata: SearchMetadataWrapper,
}

#[derive(Debug, Deserialize)]
pub struct SearchMetadataWrapper {
    pub metadata: MetadataEntry,
}

/// `files/get_temporary_link` response
#[derive(Debug, Deserialize)]
pub struct TemporaryLinkResponse {
    pub link: String,
}

/// `users/get_current_account` response
#[derive(Debug, Deserialize)]
pub struct AccountResponse {
    pub account_id: String,
    pub email: Option<String>,
    pub name: Option<AccountName>,
}

#[derive(Debug, Deserialize)]
pub struct AccountName {
    pub display_name: String,
}

/// Error envelope returned with 409 responses
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error_summary: Option<String>,
}
