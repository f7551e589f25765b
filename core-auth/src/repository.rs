//! Connection Persistence
//!
//! SQLite-backed storage for provider connections. One row per connect; at
//! most one row is active per (user, provider) and inserting a new active
//! connection deactivates the previous one in the same transaction.

use crate::error::{AuthError, Result};
use crate::types::{Connection, ProviderKind, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Storage contract for provider connections.
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// Insert a new active connection, deactivating any existing active
    /// connection for the same (user, provider).
    async fn insert_active(&self, connection: &Connection) -> Result<()>;

    /// Find the active connection for a user and provider.
    async fn find_active(
        &self,
        user_id: UserId,
        provider: ProviderKind,
    ) -> Result<Option<Connection>>;

    /// Replace the token set after a successful refresh.
    ///
    /// A refresh response without a rotated refresh token keeps the stored
    /// one, so `refresh_token` here is only written when `Some`.
    async fn update_tokens(
        &self,
        id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Record a successful liveness check.
    async fn mark_verified(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Deactivate a connection. Returns false when no row matched.
    async fn deactivate(&self, id: Uuid) -> Result<bool>;
}

/// SQLite implementation of [`ConnectionRepository`].
pub struct SqliteConnectionRepository {
    pool: SqlitePool,
}

impl SqliteConnectionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schema if it does not exist.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS provider_connections (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                token_expires_at INTEGER NOT NULL,
                account_id TEXT NOT NULL,
                account_email TEXT,
                account_name TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_verified_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One active connection per user and provider
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_provider_connections_active
            ON provider_connections (user_id, provider)
            WHERE is_active = 1
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_connection(row: &SqliteRow) -> Result<Connection> {
        let id: String = row.get("id");
        let user_id: String = row.get("user_id");
        let provider: String = row.get("provider");

        Ok(Connection {
            id: Uuid::parse_str(&id)
                .map_err(|e| AuthError::Database(format!("bad connection id: {}", e)))?,
            user_id: UserId::from_string(&user_id)
                .map_err(|e| AuthError::Database(format!("bad user id: {}", e)))?,
            provider: ProviderKind::parse(&provider)
                .ok_or_else(|| AuthError::Database(format!("bad provider: {}", provider)))?,
            access_token: row.get("access_token"),
            refresh_token: row.get("refresh_token"),
            token_expires_at: timestamp(row.get("token_expires_at"))?,
            account_id: row.get("account_id"),
            account_email: row.get("account_email"),
            account_name: row.get("account_name"),
            is_active: row.get::<i64, _>("is_active") != 0,
            last_verified_at: row
                .get::<Option<i64>, _>("last_verified_at")
                .map(timestamp)
                .transpose()?,
            created_at: timestamp(row.get("created_at"))?,
            updated_at: timestamp(row.get("updated_at"))?,
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| AuthError::Database(format!("bad timestamp: {}", secs)))
}

#[async_trait]
impl ConnectionRepository for SqliteConnectionRepository {
    async fn insert_active(&self, connection: &Connection) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE provider_connections SET is_active = 0, updated_at = ?
             WHERE user_id = ? AND provider = ? AND is_active = 1",
        )
        .bind(Utc::now().timestamp())
        .bind(connection.user_id.to_string())
        .bind(connection.provider.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO provider_connections (
                id, user_id, provider, access_token, refresh_token,
                token_expires_at, account_id, account_email, account_name,
                is_active, last_verified_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, NULL, ?, ?)
            "#,
        )
        .bind(connection.id.to_string())
        .bind(connection.user_id.to_string())
        .bind(connection.provider.as_str())
        .bind(&connection.access_token)
        .bind(&connection.refresh_token)
        .bind(connection.token_expires_at.timestamp())
        .bind(&connection.account_id)
        .bind(&connection.account_email)
        .bind(&connection.account_name)
        .bind(connection.created_at.timestamp())
        .bind(connection.updated_at.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_active(
        &self,
        user_id: UserId,
        provider: ProviderKind,
    ) -> Result<Option<Connection>> {
        let row = sqlx::query(
            "SELECT * FROM provider_connections
             WHERE user_id = ? AND provider = ? AND is_active = 1",
        )
        .bind(user_id.to_string())
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_connection).transpose()
    }

    async fn update_tokens(
        &self,
        id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE provider_connections
             SET access_token = ?,
                 refresh_token = COALESCE(?, refresh_token),
                 token_expires_at = ?,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at.timestamp())
        .bind(Utc::now().timestamp())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_verified(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE provider_connections SET last_verified_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(at.timestamp())
        .bind(Utc::now().timestamp())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE provider_connections SET is_active = 0, updated_at = ?
             WHERE id = ? AND is_active = 1",
        )
        .bind(Utc::now().timestamp())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn repo() -> SqliteConnectionRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        let repo = SqliteConnectionRepository::new(pool);
        repo.initialize().await.unwrap();
        repo
    }

    fn connection(user: UserId, provider: ProviderKind) -> Connection {
        Connection::new(
            user,
            provider,
            "access-1".into(),
            Some("refresh-1".into()),
            3600,
            "acct-1".into(),
            Some("user@example.com".into()),
            Some("Test User".into()),
        )
    }

    #[tokio::test]
    async fn test_insert_and_find_active() {
        let repo = repo().await;
        let user = UserId::new();
        let conn = connection(user, ProviderKind::Dropbox);
        repo.insert_active(&conn).await.unwrap();

        let found = repo
            .find_active(user, ProviderKind::Dropbox)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, conn.id);
        assert_eq!(found.access_token, "access-1");
        assert_eq!(found.account_email.as_deref(), Some("user@example.com"));
        assert!(found.is_active);

        // Other provider is independent
        assert!(repo
            .find_active(user, ProviderKind::OneDrive)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_active() {
        let repo = repo().await;
        let user = UserId::new();
        let first = connection(user, ProviderKind::Dropbox);
        repo.insert_active(&first).await.unwrap();

        let mut second = connection(user, ProviderKind::Dropbox);
        second.access_token = "access-2".into();
        repo.insert_active(&second).await.unwrap();

        let found = repo
            .find_active(user, ProviderKind::Dropbox)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, second.id);
        assert_eq!(found.access_token, "access-2");
    }

    #[tokio::test]
    async fn test_update_tokens_keeps_refresh_when_not_rotated() {
        let repo = repo().await;
        let user = UserId::new();
        let conn = connection(user, ProviderKind::OneDrive);
        repo.insert_active(&conn).await.unwrap();

        let new_expiry = Utc::now() + chrono::Duration::hours(2);
        repo.update_tokens(conn.id, "access-2", None, new_expiry)
            .await
            .unwrap();

        let found = repo
            .find_active(user, ProviderKind::OneDrive)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.access_token, "access-2");
        assert_eq!(found.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(found.token_expires_at.timestamp(), new_expiry.timestamp());
    }

    #[tokio::test]
    async fn test_deactivate() {
        let repo = repo().await;
        let user = UserId::new();
        let conn = connection(user, ProviderKind::Dropbox);
        repo.insert_active(&conn).await.unwrap();

        assert!(repo.deactivate(conn.id).await.unwrap());
        assert!(!repo.deactivate(conn.id).await.unwrap());
        assert!(repo
            .find_active(user, ProviderKind::Dropbox)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_mark_verified() {
        let repo = repo().await;
        let user = UserId::new();
        let conn = connection(user, ProviderKind::Dropbox);
        repo.insert_active(&conn).await.unwrap();

        let at = Utc::now();
        repo.mark_verified(conn.id, at).await.unwrap();

        let found = repo
            .find_active(user, ProviderKind::Dropbox)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            found.last_verified_at.map(|t| t.timestamp()),
            Some(at.timestamp())
        );
    }
}
