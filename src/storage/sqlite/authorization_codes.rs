//! SQLite implementation for authorization code storage

use super::{column, db_error, flag, rfc3339, timestamp};
use crate::oauth::types::*;
use crate::storage::traits::{AuthorizationCodeStore, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};

/// SQLite implementation of authorization code storage
pub struct SqliteAuthorizationCodeStore {
    pool: SqlitePool,
}

impl SqliteAuthorizationCodeStore {
    /// Create a new SQLite authorization code store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Convert SQLite row to AuthorizationCode
    fn row_to_authorization_code(row: &SqliteRow) -> Result<AuthorizationCode> {
        Ok(AuthorizationCode {
            code: column(row, "code")?,
            client_id: column(row, "client_id")?,
            user_id: column(row, "user_id")?,
            redirect_uri: column(row, "redirect_uri")?,
            scope: column(row, "scope")?,
            code_challenge: column(row, "code_challenge")?,
            code_challenge_method: column(row, "code_challenge_method")?,
            created_at: timestamp(row, "created_at")?,
            expires_at: timestamp(row, "expires_at")?,
            revoked: flag(row, "revoked")?,
        })
    }
}

#[async_trait]
impl AuthorizationCodeStore for SqliteAuthorizationCodeStore {
    async fn store_code(&self, code: &AuthorizationCode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO authorization_codes (
                code, client_id, user_id, redirect_uri, scope,
                code_challenge, code_challenge_method, created_at, expires_at, revoked
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&code.code)
        .bind(&code.client_id)
        .bind(&code.user_id)
        .bind(&code.redirect_uri)
        .bind(&code.scope)
        .bind(&code.code_challenge)
        .bind(&code.code_challenge_method)
        .bind(rfc3339(&code.created_at))
        .bind(rfc3339(&code.expires_at))
        .bind(code.revoked as i64)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn consume_code(&self, code_value: &str) -> Result<Option<AuthorizationCode>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // The conditional update is the single point where a code changes hands.
        let result =
            sqlx::query("UPDATE authorization_codes SET revoked = 1 WHERE code = ? AND revoked = 0")
                .bind(code_value)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

        if result.rows_affected() == 0 {
            tx.commit().await.map_err(db_error)?;
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM authorization_codes WHERE code = ?")
            .bind(code_value)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;
        let authorization_code = Self::row_to_authorization_code(&row)?;

        tx.commit().await.map_err(db_error)?;
        Ok(Some(authorization_code))
    }

    async fn cleanup_expired_codes(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM authorization_codes WHERE expires_at <= ?")
            .bind(rfc3339(&Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_code_consumed_once() {
        let storage = test_support::storage().await;
        let code = AuthorizationCode {
            code: "code-1".to_string(),
            client_id: "client".to_string(),
            user_id: "alice".to_string(),
            redirect_uri: "https://app.example/cb".to_string(),
            scope: Some("tools".to_string()),
            code_challenge: Some("challenge".to_string()),
            code_challenge_method: Some("S256".to_string()),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::minutes(10),
            revoked: false,
        };
        storage.store_code(&code).await.unwrap();

        let consumed = storage.consume_code("code-1").await.unwrap().unwrap();
        assert!(consumed.revoked);
        assert_eq!(consumed.code_challenge.as_deref(), Some("challenge"));
        assert!(storage.consume_code("code-1").await.unwrap().is_none());
    }
}
