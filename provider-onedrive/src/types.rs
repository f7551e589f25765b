//! Microsoft Graph wire types for OneDrive

use serde::Deserialize;

/// OAuth token endpoint response
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: Option<String>,
}

/// Drive item collection page
#[derive(Debug, Deserialize)]
pub struct DriveItemList {
    pub value: Vec<DriveItem>,
    /// Full continuation URL; used verbatim as the paging cursor
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// A file or folder. Folders carry the `folder` facet, files the `file`
/// facet; exactly one is present for items we care about.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    pub size: Option<u64>,
    pub last_modified_date_time: Option<String>,
    pub folder: Option<FolderFacet>,
    pub file: Option<FileFacet>,
    pub parent_reference: Option<ParentReference>,
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    pub download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    pub child_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    pub mime_type: Option<String>,
    pub hashes: Option<Hashes>,
}

/// Content hashes; `quick_xor_hash` is the only one OneDrive reliably
/// computes for business accounts, and even that is frequently absent.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hashes {
    pub quick_xor_hash: Option<String>,
    pub sha1_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ParentReference {
    /// Path of the containing folder, e.g. `/drive/root:/Cases/Smith`
    pub path: Option<String>,
}

/// `/me` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub mail: Option<String>,
    pub user_principal_name: Option<String>,
    pub display_name: Option<String>,
}

/// Graph error envelope
#[derive(Debug, Deserialize)]
pub struct GraphErrorResponse {
    pub error: Option<GraphError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphError {
    pub code: Option<String>,
    pub message: Option<String>,
}
