//! Credential Store
//!
//! Orchestrates the OAuth connect/disconnect lifecycle and hands out access
//! tokens that are valid at the moment of use. Callers never see refresh
//! tokens; they ask for a usable access token and the store refreshes behind
//! the scenes when the stored one has lapsed.

use crate::error::{AuthError, Result};
use crate::registry::ProviderRegistry;
use crate::repository::ConnectionRepository;
use crate::state::validate_state;
use crate::types::{Connection, ConnectionStatus, ProviderKind, UserId};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Buffer before token expiration that already counts as expired (5 minutes)
const TOKEN_REFRESH_BUFFER_SECS: i64 = 300;

/// High-level credential lifecycle API.
///
/// One instance serves all users and both providers; per-connection refresh
/// locks keep concurrent callers from racing the same refresh token.
pub struct CredentialStore {
    repository: Arc<dyn ConnectionRepository>,
    registry: Arc<ProviderRegistry>,
    state_secret: String,
    refresh_locks: Mutex<HashMap<(UserId, ProviderKind), Arc<Mutex<()>>>>,
}

impl CredentialStore {
    pub fn new(
        repository: Arc<dyn ConnectionRepository>,
        registry: Arc<ProviderRegistry>,
        state_secret: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            registry,
            state_secret: state_secret.into(),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Build the provider consent URL to start an authorization flow.
    #[instrument(skip(self), fields(user_id = %user_id, provider = provider.as_str()))]
    pub fn begin_authorization(
        &self,
        user_id: UserId,
        provider: ProviderKind,
        redirect_uri: &str,
    ) -> Result<String> {
        let adapter = self.registry.get(provider)?;
        let url = adapter.authorization_url(&user_id.to_string(), redirect_uri)?;
        info!("Authorization flow initiated");
        Ok(url)
    }

    /// Complete an authorization flow from the OAuth callback parameters.
    ///
    /// Validates the state blob, exchanges the code, captures the remote
    /// account identity, and persists the connection as the single active one
    /// for (user, provider).
    #[instrument(skip(self, code, state), fields(provider = provider.as_str()))]
    pub async fn complete_connect(
        &self,
        provider: ProviderKind,
        code: &str,
        state: &str,
        redirect_uri: &str,
    ) -> Result<Connection> {
        let user_id = validate_state(&self.state_secret, state, provider)?;
        let adapter = self.registry.get(provider)?;

        let tokens = adapter.exchange_code(code, redirect_uri).await?;
        let account = adapter.account_info(&tokens.access_token).await?;

        let connection = Connection::new(
            user_id,
            provider,
            tokens.access_token,
            tokens.refresh_token,
            tokens.expires_in,
            account.id,
            account.email,
            account.display_name,
        );
        self.repository.insert_active(&connection).await?;

        info!(user_id = %user_id, account_id = %connection.account_id, "Provider connected");
        Ok(connection)
    }

    /// Return an access token valid at the moment of the call.
    ///
    /// When the stored token has expired (within a safety buffer) exactly one
    /// refresh is attempted; a failed refresh surfaces as
    /// [`AuthError::TokenRefreshFailed`] and the stored tokens are left as
    /// they were.
    #[instrument(skip(self), fields(user_id = %user_id, provider = provider.as_str()))]
    pub async fn get_valid_token(&self, user_id: UserId, provider: ProviderKind) -> Result<String> {
        let connection = self.require_connection(user_id, provider).await?;
        if !connection.is_token_expired(TOKEN_REFRESH_BUFFER_SECS) {
            return Ok(connection.access_token);
        }

        // Serialize refreshes per connection; the loser of the race reuses
        // the winner's result instead of burning the refresh token twice.
        let lock = self.refresh_lock(user_id, provider).await;
        let _guard = lock.lock().await;

        let connection = self.require_connection(user_id, provider).await?;
        if !connection.is_token_expired(TOKEN_REFRESH_BUFFER_SECS) {
            return Ok(connection.access_token);
        }

        self.refresh_connection(&connection).await
    }

    /// Disconnect the active connection, revoking tokens best-effort.
    ///
    /// Returns false when there was nothing to disconnect. A revocation
    /// failure never blocks the local deactivation.
    #[instrument(skip(self), fields(user_id = %user_id, provider = provider.as_str()))]
    pub async fn disconnect(&self, user_id: UserId, provider: ProviderKind) -> Result<bool> {
        let Some(connection) = self.repository.find_active(user_id, provider).await? else {
            return Ok(false);
        };

        let adapter = self.registry.get(provider)?;
        if let Err(e) = adapter.revoke(&connection.access_token).await {
            warn!(error = %e, "Token revocation failed; deactivating anyway");
        }

        self.repository.deactivate(connection.id).await?;
        info!("Provider disconnected");
        Ok(true)
    }

    /// Connection status summary for a user and provider.
    pub async fn status(&self, user_id: UserId, provider: ProviderKind) -> Result<ConnectionStatus> {
        match self.repository.find_active(user_id, provider).await? {
            None => Ok(ConnectionStatus::disconnected(provider)),
            Some(connection) => {
                let needs_reauthorization =
                    connection.is_token_expired(0) && connection.refresh_token.is_none();
                Ok(ConnectionStatus {
                    connected: true,
                    provider: provider.as_str().to_string(),
                    account_email: connection.account_email,
                    account_name: connection.account_name,
                    last_verified_at: connection.last_verified_at,
                    needs_reauthorization,
                })
            }
        }
    }

    /// Check the token against the provider with a live call and record the
    /// outcome.
    ///
    /// Returns false when tokens can no longer produce an accepted call,
    /// meaning the user must reconnect.
    #[instrument(skip(self), fields(user_id = %user_id, provider = provider.as_str()))]
    pub async fn verify_connection(
        &self,
        user_id: UserId,
        provider: ProviderKind,
    ) -> Result<bool> {
        let token = match self.get_valid_token(user_id, provider).await {
            Ok(token) => token,
            Err(AuthError::TokenRefreshFailed(e)) => {
                warn!(error = %e, "Verification failed at refresh");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let adapter = self.registry.get(provider)?;
        let alive = adapter.verify(&token).await?;
        if alive {
            if let Some(connection) = self.repository.find_active(user_id, provider).await? {
                self.repository.mark_verified(connection.id, Utc::now()).await?;
            }
        }
        Ok(alive)
    }

    async fn require_connection(
        &self,
        user_id: UserId,
        provider: ProviderKind,
    ) -> Result<Connection> {
        self.repository
            .find_active(user_id, provider)
            .await?
            .ok_or_else(|| AuthError::NotConnected {
                provider: provider.as_str().to_string(),
            })
    }

    async fn refresh_lock(&self, user_id: UserId, provider: ProviderKind) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry((user_id, provider))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn refresh_connection(&self, connection: &Connection) -> Result<String> {
        let refresh_token = connection.refresh_token.as_deref().ok_or_else(|| {
            AuthError::TokenRefreshFailed("no refresh token stored".to_string())
        })?;

        let adapter = self.registry.get(connection.provider)?;
        let tokens = adapter
            .refresh(refresh_token)
            .await
            .map_err(|e| AuthError::TokenRefreshFailed(e.to_string()))?;

        let expires_at = Utc::now() + Duration::seconds(tokens.expires_in);
        self.repository
            .update_tokens(
                connection.id,
                &tokens.access_token,
                tokens.refresh_token.as_deref(),
                expires_at,
            )
            .await?;

        info!(connection_id = %connection.id, "Access token refreshed");
        Ok(tokens.access_token)
    }
}
