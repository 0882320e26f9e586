//! SQLite implementation for refresh token storage

use super::{column, db_error, flag, rfc3339, timestamp};
use crate::oauth::types::*;
use crate::storage::traits::{RefreshTokenStore, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};

/// SQLite implementation of refresh token storage
pub struct SqliteRefreshTokenStore {
    pool: SqlitePool,
}

impl SqliteRefreshTokenStore {
    /// Create a new SQLite refresh token store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_refresh_token(row: &SqliteRow) -> Result<RefreshToken> {
        Ok(RefreshToken {
            token: column(row, "token")?,
            access_token: column(row, "access_token")?,
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
impl RefreshTokenStore for SqliteRefreshTokenStore {
    async fn store_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (
                token, access_token, client_id, user_id, scope, created_at, expires_at, revoked
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.token)
        .bind(&token.access_token)
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

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let row = sqlx::query("SELECT * FROM refresh_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::row_to_refresh_token).transpose()
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let result =
            sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE token = ? AND revoked = 0")
                .bind(token)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

        if result.rows_affected() == 0 {
            tx.commit().await.map_err(db_error)?;
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM refresh_tokens WHERE token = ?")
            .bind(token)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;
        let refresh_token = Self::row_to_refresh_token(&row)?;

        tx.commit().await.map_err(db_error)?;
        Ok(Some(refresh_token))
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_client_refresh_tokens(&self, client_id: &str) -> Result<usize> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1 WHERE client_id = ? AND revoked = 0",
        )
        .bind(client_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() as usize)
    }

    async fn cleanup_expired_refresh_tokens(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ?")
            .bind(rfc3339(&Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() as usize)
    }
}
