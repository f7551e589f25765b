use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an application user.
///
/// A user can hold at most one active connection per provider; connecting a
/// second account for the same provider replaces the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Create a new random user ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a user ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Supported cloud storage providers.
///
/// Each provider has its own OAuth 2.0 configuration and API endpoints, but
/// the two are interchangeable everywhere past the credential layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Dropbox cloud storage
    Dropbox,
    /// Microsoft OneDrive cloud storage
    OneDrive,
}

impl ProviderKind {
    /// Get the human-readable display name for this provider
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Dropbox => "Dropbox",
            ProviderKind::OneDrive => "OneDrive",
        }
    }

    /// Get the provider identifier string
    ///
    /// Used in persistence, state blobs, and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Dropbox => "dropbox",
            ProviderKind::OneDrive => "onedrive",
        }
    }

    /// Parse a provider kind from a string identifier
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dropbox" => Some(ProviderKind::Dropbox),
            "onedrive" | "one_drive" => Some(ProviderKind::OneDrive),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A persisted provider connection for one user.
///
/// Carries the OAuth token set plus the remote account identity captured at
/// connect time. At most one row per (user, provider) is active.
///
/// # Security
///
/// Tokens must never be logged; the `Debug` implementation redacts them.
#[derive(Clone)]
pub struct Connection {
    pub id: Uuid,
    pub user_id: UserId,
    pub provider: ProviderKind,
    pub access_token: String,
    /// Absent for providers/grants that do not issue one; without it an
    /// expired access token cannot be refreshed and the user must reconnect.
    pub refresh_token: Option<String>,
    pub token_expires_at: DateTime<Utc>,
    /// Provider-scoped account identifier
    pub account_id: String,
    pub account_email: Option<String>,
    pub account_name: Option<String>,
    pub is_active: bool,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// Create a new active connection from freshly exchanged tokens.
    pub fn new(
        user_id: UserId,
        provider: ProviderKind,
        access_token: String,
        refresh_token: Option<String>,
        expires_in: i64,
        account_id: String,
        account_email: Option<String>,
        account_name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            provider,
            access_token,
            refresh_token,
            token_expires_at: now + Duration::seconds(expires_in),
            account_id,
            account_email,
            account_name,
            is_active: true,
            last_verified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the access token is expired or will expire soon.
    ///
    /// The buffer ensures we refresh before the token actually lapses
    /// mid-operation.
    pub fn is_token_expired(&self, buffer_seconds: i64) -> bool {
        Utc::now() >= self.token_expires_at - Duration::seconds(buffer_seconds)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_expires_at", &self.token_expires_at)
            .field("account_id", &self.account_id)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Connection status summary, safe to expose to callers (no tokens).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub provider: String,
    pub account_email: Option<String>,
    pub account_name: Option<String>,
    pub last_verified_at: Option<DateTime<Utc>>,
    /// True when a connection exists but its tokens can no longer be
    /// refreshed; the user must go through authorization again.
    pub needs_reauthorization: bool,
}

impl ConnectionStatus {
    /// Status for a user with no active connection.
    pub fn disconnected(provider: ProviderKind) -> Self {
        Self {
            connected: false,
            provider: provider.as_str().to_string(),
            account_email: None,
            account_name: None,
            last_verified_at: None,
            needs_reauthorization: false,
        }
    }
}
