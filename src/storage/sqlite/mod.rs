//! SQLite storage implementations
//!
//! This module provides SQLite-based implementations of all storage traits.
//! SQLite is suitable for single-instance deployments and development.

mod access_tokens;
mod authorization_codes;
mod oauth_clients;
mod pending_authorizations;
mod refresh_tokens;

use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use std::sync::Arc;

pub use access_tokens::SqliteAccessTokenStore;
pub use authorization_codes::SqliteAuthorizationCodeStore;
pub use oauth_clients::SqliteOAuthClientStore;
pub use pending_authorizations::SqlitePendingAuthorizationStore;
pub use refresh_tokens::SqliteRefreshTokenStore;

/// Read a column, naming it in the error.
pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StorageError::DatabaseError(format!("Failed to get {}: {}", name, e)))
}

/// Read an RFC3339 timestamp column.
pub(crate) fn timestamp(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>> {
    let value: String = column(row, name)?;
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("Invalid {} timestamp: {}", name, e)))
}

/// Read a 0/1 integer column as a bool.
pub(crate) fn flag(row: &SqliteRow, name: &str) -> Result<bool> {
    let value: i64 = column(row, name)?;
    Ok(value != 0)
}

/// Fixed-width UTC timestamps so that string comparison in SQL orders correctly.
pub(crate) fn rfc3339(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn db_error(e: sqlx::Error) -> StorageError {
    StorageError::DatabaseError(e.to_string())
}

/// Comprehensive SQLite OAuth storage implementation
pub struct SqliteOAuthStorage {
    pool: SqlitePool,
    client_store: Arc<SqliteOAuthClientStore>,
    pending_store: Arc<SqlitePendingAuthorizationStore>,
    authorization_code_store: Arc<SqliteAuthorizationCodeStore>,
    access_token_store: Arc<SqliteAccessTokenStore>,
    refresh_token_store: Arc<SqliteRefreshTokenStore>,
}

impl SqliteOAuthStorage {
    /// Create a new SQLite OAuth storage instance
    pub fn new(pool: SqlitePool) -> Self {
        let client_store = Arc::new(SqliteOAuthClientStore::new(pool.clone()));
        let pending_store = Arc::new(SqlitePendingAuthorizationStore::new(pool.clone()));
        let authorization_code_store = Arc::new(SqliteAuthorizationCodeStore::new(pool.clone()));
        let access_token_store = Arc::new(SqliteAccessTokenStore::new(pool.clone()));
        let refresh_token_store = Arc::new(SqliteRefreshTokenStore::new(pool.clone()));

        Self {
            pool,
            client_store,
            pending_store,
            authorization_code_store,
            access_token_store,
            refresh_token_store,
        }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Migration failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl OAuthClientStore for SqliteOAuthStorage {
    async fn store_client(&self, client: &OAuthClient) -> Result<()> {
        self.client_store.store_client(client).await
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>> {
        self.client_store.get_client(client_id).await
    }

    async fn update_client(&self, client: &OAuthClient) -> Result<()> {
        self.client_store.update_client(client).await
    }

    async fn delete_client(&self, client_id: &str) -> Result<()> {
        self.client_store.delete_client(client_id).await
    }
}

#[async_trait]
impl PendingAuthorizationStore for SqliteOAuthStorage {
    async fn store_pending(&self, pending: &PendingAuthorization) -> Result<()> {
        self.pending_store.store_pending(pending).await
    }

    async fn consume_pending(&self, request_id: &str) -> Result<Option<PendingAuthorization>> {
        self.pending_store.consume_pending(request_id).await
    }

    async fn cleanup_expired_pending(&self) -> Result<usize> {
        self.pending_store.cleanup_expired_pending().await
    }
}

#[async_trait]
impl AuthorizationCodeStore for SqliteOAuthStorage {
    async fn store_code(&self, code: &AuthorizationCode) -> Result<()> {
        self.authorization_code_store.store_code(code).await
    }

    async fn consume_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        self.authorization_code_store.consume_code(code).await
    }

    async fn cleanup_expired_codes(&self) -> Result<usize> {
        self.authorization_code_store.cleanup_expired_codes().await
    }
}

#[async_trait]
impl AccessTokenStore for SqliteOAuthStorage {
    async fn store_token(&self, token: &AccessToken) -> Result<()> {
        self.access_token_store.store_token(token).await
    }

    async fn get_token(&self, token: &str) -> Result<Option<AccessToken>> {
        self.access_token_store.get_token(token).await
    }

    async fn revoke_token(&self, token: &str) -> Result<bool> {
        self.access_token_store.revoke_token(token).await
    }

    async fn revoke_client_tokens(&self, client_id: &str) -> Result<usize> {
        self.access_token_store.revoke_client_tokens(client_id).await
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        self.access_token_store.cleanup_expired_tokens().await
    }
}

#[async_trait]
impl RefreshTokenStore for SqliteOAuthStorage {
    async fn store_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        self.refresh_token_store.store_refresh_token(token).await
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        self.refresh_token_store.get_refresh_token(token).await
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        self.refresh_token_store.consume_refresh_token(token).await
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<bool> {
        self.refresh_token_store.revoke_refresh_token(token).await
    }

    async fn revoke_client_refresh_tokens(&self, client_id: &str) -> Result<usize> {
        self.refresh_token_store
            .revoke_client_refresh_tokens(client_id)
            .await
    }

    async fn cleanup_expired_refresh_tokens(&self) -> Result<usize> {
        self.refresh_token_store
            .cleanup_expired_refresh_tokens()
            .await
    }
}

impl OAuthStorage for SqliteOAuthStorage {}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    /// A single-connection in-memory database with the schema applied.
    pub async fn storage() -> SqliteOAuthStorage {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = SqliteOAuthStorage::new(pool);
        storage.migrate().await.unwrap();
        storage
    }
}
