use bridge_traits::provider::ProviderError;
use thiserror::Error;

/// Errors that can occur during credential operations
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No active {provider} connection for this user")]
    NotConnected { provider: String },

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Invalid authorization state: {0}")]
    InvalidState(String),

    #[error("Authorization state expired")]
    StateExpired,

    #[error("Authorization state was issued for {actual}, not {expected}")]
    StateProviderMismatch { expected: String, actual: String },

    #[error("Unknown provider: {0}")]
    InvalidProvider(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        AuthError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
