//! Storage trait definitions for OAuth clients, consent requests, codes and tokens.
//!
//! Implementations provide their own atomicity for the consume operations: a code,
//! pending authorization or refresh token is handed out by `consume_*` at most once.

use crate::errors::StorageError;
use crate::oauth::types::*;
use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for storing and retrieving OAuth clients
#[async_trait]
pub trait OAuthClientStore {
    /// Store a new OAuth client
    async fn store_client(&self, client: &OAuthClient) -> Result<()>;

    /// Retrieve a client by ID
    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>>;

    /// Update an existing client
    async fn update_client(&self, client: &OAuthClient) -> Result<()>;

    /// Delete a client
    async fn delete_client(&self, client_id: &str) -> Result<()>;
}

/// Trait for authorization requests awaiting the resource owner's consent
#[async_trait]
pub trait PendingAuthorizationStore {
    async fn store_pending(&self, pending: &PendingAuthorization) -> Result<()>;

    /// Remove and return a pending request. Returns `None` if it was already consumed.
    async fn consume_pending(&self, request_id: &str) -> Result<Option<PendingAuthorization>>;

    async fn cleanup_expired_pending(&self) -> Result<usize>;
}

/// Trait for storing and retrieving authorization codes
#[async_trait]
pub trait AuthorizationCodeStore {
    /// Store a new authorization code
    async fn store_code(&self, code: &AuthorizationCode) -> Result<()>;

    /// Mark a code revoked and return it, unless it is unknown or already revoked.
    ///
    /// Expiry is left to the caller so that it can report a precise reason.
    async fn consume_code(&self, code: &str) -> Result<Option<AuthorizationCode>>;

    /// Clean up expired codes
    async fn cleanup_expired_codes(&self) -> Result<usize>;
}

/// Trait for storing and retrieving access tokens
#[async_trait]
pub trait AccessTokenStore {
    /// Store a new access token
    async fn store_token(&self, token: &AccessToken) -> Result<()>;

    /// Retrieve an access token record regardless of its state
    async fn get_token(&self, token: &str) -> Result<Option<AccessToken>>;

    /// Mark a token revoked. Returns whether the token exists.
    async fn revoke_token(&self, token: &str) -> Result<bool>;

    /// Revoke every access token issued to a client
    async fn revoke_client_tokens(&self, client_id: &str) -> Result<usize>;

    /// Clean up expired tokens
    async fn cleanup_expired_tokens(&self) -> Result<usize>;
}

/// Trait for storing and retrieving refresh tokens
#[async_trait]
pub trait RefreshTokenStore {
    /// Store a new refresh token
    async fn store_refresh_token(&self, token: &RefreshToken) -> Result<()>;

    /// Retrieve a refresh token record regardless of its state
    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>>;

    /// Mark a refresh token revoked and return it, unless it is unknown or already revoked
    async fn consume_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>>;

    /// Mark a refresh token revoked. Returns whether the token exists.
    async fn revoke_refresh_token(&self, token: &str) -> Result<bool>;

    /// Revoke every refresh token issued to a client
    async fn revoke_client_refresh_tokens(&self, client_id: &str) -> Result<usize>;

    /// Cleanup expired refresh tokens
    async fn cleanup_expired_refresh_tokens(&self) -> Result<usize>;
}

/// Combined OAuth storage trait
pub trait OAuthStorage:
    OAuthClientStore
    + PendingAuthorizationStore
    + AuthorizationCodeStore
    + AccessTokenStore
    + RefreshTokenStore
    + Send
    + Sync
{
}
