//! SQLite implementation for access token storage

use super::{column, db_error, flag, rfc3339, timestamp};
use crate::oauth::types::*;
use crate::storage::traits::{AccessTokenStore, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};

/// SQLite implementation of access token storage
pub struct SqliteAccessTokenStore {
    pool: SqlitePool,
}

impl SqliteAccessTokenStore {
    /// Create a new SQLite access token store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_access_token(row: &SqliteRow) -> Result<AccessToken> {
        Ok(AccessToken {
            token: column(row, "token")?,
            token_type: TokenType::Bearer,
            client_id: column(row, "client_id")?,
            user_id: column(row, "user_id")?,
            scope: column(row, "scope")?,
            created_at: timestamp(row, "created_at")?,
            expires_at: timestamp(row, "expires_at")?,
            revoked: flag(row, "revoked")?,
        })
    }
}

#[async_trait]
impl AccessTokenStore for SqliteAccessTokenStore {
    async fn store_token(&self, token: &AccessToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO access_tokens (
                token, token_type, client_id, user_id, scope, created_at, expires_at, revoked
            ) VALUES (?, 'Bearer', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.token)
        .bind(&token.client_id)
        .bind(&token.user_id)
        .bind(&token.scope)
        .bind(rfc3339(&token.created_at))
        .bind(rfc3339(&token.expires_at))
        .bind(token.revoked as i64)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn get_token(&self, token: &str) -> Result<Option<AccessToken>> {
        let row = sqlx::query("SELECT * FROM access_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::row_to_access_token).transpose()
    }

    async fn revoke_token(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE access_tokens SET revoked = 1 WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_client_tokens(&self, client_id: &str) -> Result<usize> {
        let result =
            sqlx::query("UPDATE access_tokens SET revoked = 1 WHERE client_id = ? AND revoked = 0")
                .bind(client_id)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(result.rows_affected() as usize)
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE expires_at <= ?")
            .bind(rfc3339(&Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() as usize)
    }
}
