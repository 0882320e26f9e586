//! OAuth 2.1 authorization server, resource-owner login and bearer token validation.

pub mod auth_server;
pub mod clients;
pub mod owner;
pub mod pkce;
pub mod resource_server;
pub mod types;

// Re-export frequently used items from each module
pub use crate::storage::{
    inmemory::MemoryOAuthStorage,
    traits::{
        AccessTokenStore, AuthorizationCodeStore, OAuthClientStore, OAuthStorage,
        PendingAuthorizationStore, RefreshTokenStore,
    },
};
pub use auth_server::{
    AuthorizationServer, AuthorizeQuery, ClientAuthentication, ConsentPrompt, TokenForm,
    TokenLifetimes,
};
pub use clients::ClientRegistrationService;
pub use owner::{ResourceOwnerAuthenticator, SessionStore, StaticUserAuthenticator};
pub use resource_server::TokenValidator;
pub use types::{
    AccessToken, AuthorizationCode, AuthorizationRequest, ClientAuthMethod,
    ClientRegistrationRequest, ClientRegistrationResponse, ClientType, GrantType, OAuthClient,
    OAuthErrorResponse, PendingAuthorization, RefreshToken, ResponseType, TokenInfo,
    TokenRequest, TokenResponse, TokenType, parse_scope,
};
