//! OAuth 2.1 resource server side: bearer token validation for protected endpoints.

use crate::errors::TokenError;
use crate::oauth::types::*;
use crate::storage::traits::OAuthStorage;
use chrono::Utc;
use std::sync::Arc;

/// Validates bearer access tokens against the token store.
pub struct TokenValidator {
    storage: Arc<dyn OAuthStorage>,
}

impl TokenValidator {
    pub fn new(storage: Arc<dyn OAuthStorage>) -> Self {
        Self { storage }
    }

    /// Validate a bearer token.
    ///
    /// Unknown, expired and revoked tokens all produce the same `InvalidToken` outcome.
    pub async fn validate(&self, token: &str) -> Result<TokenInfo, TokenError> {
        if token.is_empty() {
            return Err(TokenError::InvalidToken);
        }

        let access_token = self
            .storage
            .get_token(token)
            .await
            .map_err(|e| TokenError::Storage(e.to_string()))?
            .ok_or(TokenError::InvalidToken)?;

        if !access_token.is_active(Utc::now()) {
            tracing::debug!(client_id = %access_token.client_id, revoked = access_token.revoked, "inactive access token presented");
            return Err(TokenError::InvalidToken);
        }

        Ok(TokenInfo {
            scopes: access_token
                .scope
                .as_deref()
                .map(parse_scope)
                .unwrap_or_default(),
            access_token: access_token.token,
            client_id: access_token.client_id,
            user_id: access_token.user_id,
            expires_at: access_token.expires_at,
        })
    }

    /// Validate the value of an `Authorization` header.
    pub async fn validate_header(&self, header: Option<&str>) -> Result<TokenInfo, TokenError> {
        let token = bearer_token(header).ok_or(TokenError::Unauthorized)?;
        self.validate(token).await
    }

    /// Mark the token revoked whether it is an access or a refresh token. Idempotent.
    pub async fn revoke(&self, token: &str) -> Result<(), TokenError> {
        let access = self
            .storage
            .revoke_token(token)
            .await
            .map_err(|e| TokenError::Storage(e.to_string()))?;
        let refresh = self
            .storage
            .revoke_refresh_token(token)
            .await
            .map_err(|e| TokenError::Storage(e.to_string()))?;
        tracing::debug!(access, refresh, "token revoked");
        Ok(())
    }
}

/// Extract the credential from a `Bearer <token>` header value.
///
/// The scheme is matched case-insensitively (RFC 7235 section 2.1).
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let (scheme, token) = header?.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::inmemory::MemoryOAuthStorage;
    use crate::storage::traits::{AccessTokenStore, RefreshTokenStore};
    use chrono::Duration;

    fn token(value: &str, expires_in: Duration) -> AccessToken {
        AccessToken {
            token: value.to_string(),
            token_type: TokenType::Bearer,
            client_id: "client".to_string(),
            user_id: Some("alice".to_string()),
            scope: Some("tools read".to_string()),
            created_at: Utc::now(),
            expires_at: Utc::now() + expires_in,
            revoked: false,
        }
    }

    async fn validator() -> TokenValidator {
        let storage = Arc::new(MemoryOAuthStorage::new());
        storage
            .store_token(&token("live", Duration::hours(1)))
            .await
            .unwrap();
        storage
            .store_token(&token("stale", Duration::seconds(-1)))
            .await
            .unwrap();
        TokenValidator::new(storage)
    }

    #[tokio::test]
    async fn test_validate_live_token() {
        let validator = validator().await;
        let info = validator.validate("live").await.unwrap();
        assert_eq!(info.client_id, "client");
        assert_eq!(info.user_id.as_deref(), Some("alice"));
        assert!(info.scopes.contains("tools"));
        assert!(info.scopes.contains("read"));
    }

    #[tokio::test]
    async fn test_invalid_tokens_share_one_outcome() {
        let validator = validator().await;
        assert!(matches!(
            validator.validate("stale").await,
            Err(TokenError::InvalidToken)
        ));
        assert!(matches!(
            validator.validate("unknown").await,
            Err(TokenError::InvalidToken)
        ));

        validator.revoke("live").await.unwrap();
        validator.revoke("live").await.unwrap();
        assert!(matches!(
            validator.validate("live").await,
            Err(TokenError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_validate_header() {
        let validator = validator().await;
        assert!(validator.validate_header(Some("Bearer live")).await.is_ok());
        assert!(validator.validate_header(Some("bearer live")).await.is_ok());
        assert!(matches!(
            validator.validate_header(None).await,
            Err(TokenError::Unauthorized)
        ));
        assert!(matches!(
            validator.validate_header(Some("Basic abc")).await,
            Err(TokenError::Unauthorized)
        ));
        assert!(matches!(
            validator.validate_header(Some("Bearer ")).await,
            Err(TokenError::Unauthorized)
        ));
        assert!(matches!(
            validator.validate_header(Some("Bearer nope")).await,
            Err(TokenError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_revoke_refresh_token() {
        let storage = Arc::new(MemoryOAuthStorage::new());
        storage
            .store_refresh_token(&RefreshToken {
                token: "rt".to_string(),
                access_token: "at".to_string(),
                client_id: "client".to_string(),
                user_id: None,
                scope: None,
                created_at: Utc::now(),
                expires_at: Utc::now() + Duration::days(1),
                revoked: false,
            })
            .await
            .unwrap();
        let validator = TokenValidator::new(storage.clone());

        validator.revoke("rt").await.unwrap();
        assert!(
            storage
                .get_refresh_token("rt")
                .await
                .unwrap()
                .unwrap()
                .revoked
        );
    }
}
