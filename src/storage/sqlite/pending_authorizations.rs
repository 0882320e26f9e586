//! SQLite implementation for authorization requests awaiting consent

use super::{column, db_error, rfc3339, timestamp};
use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::{PendingAuthorizationStore, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};

pub struct SqlitePendingAuthorizationStore {
    pool: SqlitePool,
}

impl SqlitePendingAuthorizationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_pending(row: &SqliteRow) -> Result<PendingAuthorization> {
        let request_json: String = column(row, "request")?;
        let request: AuthorizationRequest = serde_json::from_str(&request_json)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        Ok(PendingAuthorization {
            request_id: column(row, "request_id")?,
            request,
            scope: column(row, "scope")?,
            user_id: column(row, "user_id")?,
            created_at: timestamp(row, "created_at")?,
            expires_at: timestamp(row, "expires_at")?,
        })
    }
}

#[async_trait]
impl PendingAuthorizationStore for SqlitePendingAuthorizationStore {
    async fn store_pending(&self, pending: &PendingAuthorization) -> Result<()> {
        let request_json = serde_json::to_string(&pending.request)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO pending_authorizations (
                request_id, request, scope, user_id, created_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&pending.request_id)
        .bind(request_json)
        .bind(&pending.scope)
        .bind(&pending.user_id)
        .bind(rfc3339(&pending.created_at))
        .bind(rfc3339(&pending.expires_at))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn consume_pending(&self, request_id: &str) -> Result<Option<PendingAuthorization>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query("SELECT * FROM pending_authorizations WHERE request_id = ?")
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?;

        let Some(row) = row else {
            tx.commit().await.map_err(db_error)?;
            return Ok(None);
        };

        let result = sqlx::query("DELETE FROM pending_authorizations WHERE request_id = ?")
            .bind(request_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::row_to_pending(&row).map(Some)
    }

    async fn cleanup_expired_pending(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM pending_authorizations WHERE expires_at <= ?")
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
    async fn test_pending_round_trip() {
        let storage = test_support::storage().await;
        let pending = PendingAuthorization {
            request_id: "req".to_string(),
            request: AuthorizationRequest {
                response_type: "code".to_string(),
                client_id: "client".to_string(),
                redirect_uri: "https://app.example/cb".to_string(),
                scope: Some("tools".to_string()),
                state: Some("s1".to_string()),
                code_challenge: Some("c".repeat(43)),
                code_challenge_method: Some("S256".to_string()),
            },
            scope: Some("tools".to_string()),
            user_id: "alice".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::minutes(10),
        };
        storage.store_pending(&pending).await.unwrap();

        let consumed = storage.consume_pending("req").await.unwrap().unwrap();
        assert_eq!(consumed.request.state.as_deref(), Some("s1"));
        assert!(storage.consume_pending("req").await.unwrap().is_none());
    }
}
