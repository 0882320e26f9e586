//! In-memory OAuth storage implementation
//!
//! Each map sits behind its own `Mutex`; every check-and-mark happens under a single lock
//! acquisition so consume operations are atomic.

use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// In-memory implementation for OAuth storage
#[derive(Default)]
pub struct MemoryOAuthStorage {
    clients: Mutex<HashMap<String, OAuthClient>>,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
    auth_codes: Mutex<HashMap<String, AuthorizationCode>>,
    access_tokens: Mutex<HashMap<String, AccessToken>>,
    refresh_tokens: Mutex<HashMap<String, RefreshToken>>,
}

impl MemoryOAuthStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| StorageError::LockPoisoned(format!("Lock error: {}", e)))
}

#[async_trait]
impl OAuthClientStore for MemoryOAuthStorage {
    async fn store_client(&self, client: &OAuthClient) -> Result<()> {
        let mut clients = lock(&self.clients)?;
        clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>> {
        let clients = lock(&self.clients)?;
        Ok(clients.get(client_id).cloned())
    }

    async fn update_client(&self, client: &OAuthClient) -> Result<()> {
        let mut clients = lock(&self.clients)?;
        if clients.contains_key(&client.client_id) {
            clients.insert(client.client_id.clone(), client.clone());
            Ok(())
        } else {
            Err(StorageError::QueryFailed("Client not found".to_string()))
        }
    }

    async fn delete_client(&self, client_id: &str) -> Result<()> {
        let mut clients = lock(&self.clients)?;
        clients.remove(client_id);
        Ok(())
    }
}

#[async_trait]
impl PendingAuthorizationStore for MemoryOAuthStorage {
    async fn store_pending(&self, pending: &PendingAuthorization) -> Result<()> {
        let mut requests = lock(&self.pending)?;
        requests.insert(pending.request_id.clone(), pending.clone());
        Ok(())
    }

    async fn consume_pending(&self, request_id: &str) -> Result<Option<PendingAuthorization>> {
        let mut requests = lock(&self.pending)?;
        Ok(requests.remove(request_id))
    }

    async fn cleanup_expired_pending(&self) -> Result<usize> {
        let mut requests = lock(&self.pending)?;
        let now = Utc::now();
        let before = requests.len();
        requests.retain(|_, pending| pending.expires_at > now);
        Ok(before - requests.len())
    }
}

#[async_trait]
impl AuthorizationCodeStore for MemoryOAuthStorage {
    async fn store_code(&self, code: &AuthorizationCode) -> Result<()> {
        let mut codes = lock(&self.auth_codes)?;
        codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn consume_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        let mut codes = lock(&self.auth_codes)?;
        match codes.get_mut(code) {
            Some(auth_code) if !auth_code.revoked => {
                auth_code.revoked = true;
                Ok(Some(auth_code.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn cleanup_expired_codes(&self) -> Result<usize> {
        let mut codes = lock(&self.auth_codes)?;
        let now = Utc::now();
        let before = codes.len();
        codes.retain(|_, code| code.expires_at > now);
        Ok(before - codes.len())
    }
}

#[async_trait]
impl AccessTokenStore for MemoryOAuthStorage {
    async fn store_token(&self, token: &AccessToken) -> Result<()> {
        let mut tokens = lock(&self.access_tokens)?;
        tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_token(&self, token: &str) -> Result<Option<AccessToken>> {
        let tokens = lock(&self.access_tokens)?;
        Ok(tokens.get(token).cloned())
    }

    async fn revoke_token(&self, token: &str) -> Result<bool> {
        let mut tokens = lock(&self.access_tokens)?;
        match tokens.get_mut(token) {
            Some(access_token) => {
                access_token.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_client_tokens(&self, client_id: &str) -> Result<usize> {
        let mut tokens = lock(&self.access_tokens)?;
        let mut revoked = 0;
        for token in tokens
            .values_mut()
            .filter(|t| t.client_id == client_id && !t.revoked)
        {
            token.revoked = true;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        let mut tokens = lock(&self.access_tokens)?;
        let now = Utc::now();
        let before = tokens.len();
        tokens.retain(|_, token| token.expires_at > now);
        Ok(before - tokens.len())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryOAuthStorage {
    async fn store_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        let mut tokens = lock(&self.refresh_tokens)?;
        tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let tokens = lock(&self.refresh_tokens)?;
        Ok(tokens.get(token).cloned())
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let mut tokens = lock(&self.refresh_tokens)?;
        match tokens.get_mut(token) {
            Some(refresh_token) if !refresh_token.revoked => {
                refresh_token.revoked = true;
                Ok(Some(refresh_token.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<bool> {
        let mut tokens = lock(&self.refresh_tokens)?;
        match tokens.get_mut(token) {
            Some(refresh_token) => {
                refresh_token.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_client_refresh_tokens(&self, client_id: &str) -> Result<usize> {
        let mut tokens = lock(&self.refresh_tokens)?;
        let mut revoked = 0;
        for token in tokens
            .values_mut()
            .filter(|t| t.client_id == client_id && !t.revoked)
        {
            token.revoked = true;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn cleanup_expired_refresh_tokens(&self) -> Result<usize> {
        let mut tokens = lock(&self.refresh_tokens)?;
        let now = Utc::now();
        let before = tokens.len();
        tokens.retain(|_, token| token.expires_at > now);
        Ok(before - tokens.len())
    }
}

impl OAuthStorage for MemoryOAuthStorage {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn code(value: &str, expires_in: Duration) -> AuthorizationCode {
        AuthorizationCode {
            code: value.to_string(),
            client_id: "test-client".to_string(),
            user_id: "test-user".to_string(),
            redirect_uri: "https://example.com/callback".to_string(),
            scope: Some("tools".to_string()),
            code_challenge: None,
            code_challenge_method: None,
            created_at: Utc::now(),
            expires_at: Utc::now() + expires_in,
            revoked: false,
        }
    }

    fn refresh(value: &str, client_id: &str) -> RefreshToken {
        RefreshToken {
            token: value.to_string(),
            access_token: "access".to_string(),
            client_id: client_id.to_string(),
            user_id: Some("test-user".to_string()),
            scope: Some("tools".to_string()),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::days(1),
            revoked: false,
        }
    }

    #[tokio::test]
    async fn test_authorization_code_lifecycle() {
        let storage = MemoryOAuthStorage::new();
        storage
            .store_code(&code("test-code", Duration::minutes(10)))
            .await
            .unwrap();

        let consumed = storage.consume_code("test-code").await.unwrap().unwrap();
        assert!(consumed.revoked);

        let consumed_again = storage.consume_code("test-code").await.unwrap();
        assert!(consumed_again.is_none());

        assert!(storage.consume_code("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_codes() {
        let storage = MemoryOAuthStorage::new();
        storage
            .store_code(&code("old", Duration::minutes(-1)))
            .await
            .unwrap();
        storage
            .store_code(&code("fresh", Duration::minutes(5)))
            .await
            .unwrap();

        assert_eq!(storage.cleanup_expired_codes().await.unwrap(), 1);
        assert!(storage.consume_code("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_token_consumed_once() {
        let storage = MemoryOAuthStorage::new();
        storage
            .store_refresh_token(&refresh("rt", "client-a"))
            .await
            .unwrap();

        assert!(storage.consume_refresh_token("rt").await.unwrap().is_some());
        assert!(storage.consume_refresh_token("rt").await.unwrap().is_none());

        let record = storage.get_refresh_token("rt").await.unwrap().unwrap();
        assert!(record.revoked);
    }

    #[tokio::test]
    async fn test_revoke_client_refresh_tokens() {
        let storage = MemoryOAuthStorage::new();
        storage
            .store_refresh_token(&refresh("a1", "client-a"))
            .await
            .unwrap();
        storage
            .store_refresh_token(&refresh("a2", "client-a"))
            .await
            .unwrap();
        storage
            .store_refresh_token(&refresh("b1", "client-b"))
            .await
            .unwrap();

        assert_eq!(
            storage.revoke_client_refresh_tokens("client-a").await.unwrap(),
            2
        );
        assert!(storage.consume_refresh_token("a1").await.unwrap().is_none());
        assert!(storage.consume_refresh_token("b1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pending_authorization_consumed_once() {
        let storage = MemoryOAuthStorage::new();
        let pending = PendingAuthorization {
            request_id: "req-1".to_string(),
            request: AuthorizationRequest {
                response_type: "code".to_string(),
                client_id: "test-client".to_string(),
                redirect_uri: "https://example.com/callback".to_string(),
                scope: None,
                state: Some("xyz".to_string()),
                code_challenge: None,
                code_challenge_method: None,
            },
            scope: Some("tools".to_string()),
            user_id: "alice".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::minutes(10),
        };
        storage.store_pending(&pending).await.unwrap();

        let consumed = storage.consume_pending("req-1").await.unwrap().unwrap();
        assert_eq!(consumed.user_id, "alice");
        assert!(storage.consume_pending("req-1").await.unwrap().is_none());
    }
}
