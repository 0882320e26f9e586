//! SQLite implementation for OAuth client storage

use super::{column, db_error, rfc3339, timestamp};
use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::{OAuthClientStore, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};

/// SQLite implementation of OAuth client storage
pub struct SqliteOAuthClientStore {
    pool: SqlitePool,
}

impl SqliteOAuthClientStore {
    /// Create a new SQLite OAuth client store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T> {
        serde_json::from_str(json).map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    /// Convert string to ClientType enum
    fn string_to_client_type(s: &str) -> Result<ClientType> {
        match s {
            "public" => Ok(ClientType::Public),
            "confidential" => Ok(ClientType::Confidential),
            _ => Err(StorageError::InvalidData(format!(
                "Unknown client type: {}",
                s
            ))),
        }
    }

    /// Convert SQLite row to OAuthClient
    fn row_to_oauth_client(row: &SqliteRow) -> Result<OAuthClient> {
        let redirect_uris: Vec<String> = Self::from_json(&column::<String>(row, "redirect_uris")?)?;
        let grant_types: Vec<GrantType> = Self::from_json(&column::<String>(row, "grant_types")?)?;
        let response_types: Vec<ResponseType> =
            Self::from_json(&column::<String>(row, "response_types")?)?;
        let metadata: serde_json::Value = Self::from_json(&column::<String>(row, "metadata")?)?;

        let auth_method: String = column(row, "token_endpoint_auth_method")?;
        let token_endpoint_auth_method = auth_method
            .parse::<ClientAuthMethod>()
            .map_err(|s| StorageError::InvalidData(format!("Unknown auth method: {}", s)))?;
        let client_type = Self::string_to_client_type(&column::<String>(row, "client_type")?)?;

        Ok(OAuthClient {
            client_id: column(row, "client_id")?,
            client_secret: column(row, "client_secret")?,
            client_name: column(row, "client_name")?,
            redirect_uris,
            grant_types,
            response_types,
            scope: column(row, "scope")?,
            token_endpoint_auth_method,
            client_type,
            registration_access_token: column(row, "registration_access_token")?,
            created_at: timestamp(row, "created_at")?,
            updated_at: timestamp(row, "updated_at")?,
            metadata,
        })
    }
}

#[async_trait]
impl OAuthClientStore for SqliteOAuthClientStore {
    async fn store_client(&self, client: &OAuthClient) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO oauth_clients (
                client_id, client_secret, client_name, redirect_uris, grant_types,
                response_types, scope, token_endpoint_auth_method, client_type,
                registration_access_token, created_at, updated_at, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&client.client_id)
        .bind(&client.client_secret)
        .bind(&client.client_name)
        .bind(Self::to_json(&client.redirect_uris)?)
        .bind(Self::to_json(&client.grant_types)?)
        .bind(Self::to_json(&client.response_types)?)
        .bind(&client.scope)
        .bind(client.token_endpoint_auth_method.as_str())
        .bind(client.client_type.as_str())
        .bind(&client.registration_access_token)
        .bind(rfc3339(&client.created_at))
        .bind(rfc3339(&client.updated_at))
        .bind(Self::to_json(&client.metadata)?)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>> {
        let row = sqlx::query("SELECT * FROM oauth_clients WHERE client_id = ?")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::row_to_oauth_client).transpose()
    }

    async fn update_client(&self, client: &OAuthClient) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_clients SET
                client_secret = ?, client_name = ?, redirect_uris = ?, grant_types = ?,
                response_types = ?, scope = ?, token_endpoint_auth_method = ?,
                client_type = ?, registration_access_token = ?, updated_at = ?, metadata = ?
            WHERE client_id = ?
            "#,
        )
        .bind(&client.client_secret)
        .bind(&client.client_name)
        .bind(Self::to_json(&client.redirect_uris)?)
        .bind(Self::to_json(&client.grant_types)?)
        .bind(Self::to_json(&client.response_types)?)
        .bind(&client.scope)
        .bind(client.token_endpoint_auth_method.as_str())
        .bind(client.client_type.as_str())
        .bind(&client.registration_access_token)
        .bind(rfc3339(&client.updated_at))
        .bind(Self::to_json(&client.metadata)?)
        .bind(&client.client_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::QueryFailed("Client not found".to_string()));
        }

        Ok(())
    }

    async fn delete_client(&self, client_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM oauth_clients WHERE client_id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;
    use chrono::Utc;

    fn client(client_id: &str) -> OAuthClient {
        OAuthClient {
            client_id: client_id.to_string(),
            client_secret: None,
            client_name: Some("Agent".to_string()),
            redirect_uris: vec!["https://app.example/cb".to_string()],
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            response_types: vec![ResponseType::Code],
            scope: Some("tools".to_string()),
            token_endpoint_auth_method: ClientAuthMethod::None,
            client_type: ClientType::Public,
            registration_access_token: "rat".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            metadata: serde_json::json!({"logo_uri": "https://app.example/logo.png"}),
        }
    }

    #[tokio::test]
    async fn test_client_round_trip_and_update() {
        let storage = test_support::storage().await;

        storage.store_client(&client("c1")).await.unwrap();
        let mut stored = storage.get_client("c1").await.unwrap().unwrap();
        assert_eq!(stored.token_endpoint_auth_method, ClientAuthMethod::None);
        assert_eq!(stored.grant_types.len(), 2);
        assert_eq!(stored.metadata["logo_uri"], "https://app.example/logo.png");

        stored.client_name = Some("Renamed".to_string());
        storage.update_client(&stored).await.unwrap();
        let updated = storage.get_client("c1").await.unwrap().unwrap();
        assert_eq!(updated.client_name.as_deref(), Some("Renamed"));

        storage.delete_client("c1").await.unwrap();
        assert!(storage.get_client("c1").await.unwrap().is_none());
        assert!(storage.update_client(&stored).await.is_err());
    }
}
