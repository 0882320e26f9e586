//! OAuth 2.1 core types and data structures.
//!
//! Defines enums and structs for grants, tokens, clients, pending consent and requests.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// OAuth 2.1 Grant Types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    RefreshToken,
}

impl GrantType {
    pub const ALL: [GrantType; 3] = [
        GrantType::AuthorizationCode,
        GrantType::ClientCredentials,
        GrantType::RefreshToken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::ClientCredentials => "client_credentials",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "refresh_token" => Ok(GrantType::RefreshToken),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth 2.1 Response Types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
}

impl FromStr for ResponseType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "code" => Ok(ResponseType::Code),
            other => Err(other.to_string()),
        }
    }
}

/// OAuth 2.1 Token Types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Bearer,
}

/// OAuth 2.1 Client Authentication Methods
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    ClientSecretBasic,
    ClientSecretPost,
    None,
}

impl ClientAuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientAuthMethod::ClientSecretBasic => "client_secret_basic",
            ClientAuthMethod::ClientSecretPost => "client_secret_post",
            ClientAuthMethod::None => "none",
        }
    }

    /// Methods other than `none` require a client secret.
    pub fn is_confidential(&self) -> bool {
        !matches!(self, ClientAuthMethod::None)
    }
}

impl FromStr for ClientAuthMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "client_secret_basic" => Ok(ClientAuthMethod::ClientSecretBasic),
            "client_secret_post" => Ok(ClientAuthMethod::ClientSecretPost),
            "none" => Ok(ClientAuthMethod::None),
            other => Err(other.to_string()),
        }
    }
}

/// Client Type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Public,
    Confidential,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Public => "public",
            ClientType::Confidential => "confidential",
        }
    }
}

/// OAuth Client Registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    /// Unique client identifier
    pub client_id: String,
    /// Client secret, present iff the client is confidential
    pub client_secret: Option<String>,
    /// Client name
    pub client_name: Option<String>,
    /// Redirect URIs
    pub redirect_uris: Vec<String>,
    /// Grant types allowed for this client
    pub grant_types: Vec<GrantType>,
    /// Response types allowed for this client
    pub response_types: Vec<ResponseType>,
    /// Scopes that can be requested by this client
    pub scope: Option<String>,
    /// Client authentication method
    pub token_endpoint_auth_method: ClientAuthMethod,
    /// Client type (public or confidential)
    pub client_type: ClientType,
    /// Bearer credential for the client configuration endpoint
    pub registration_access_token: String,
    /// Registration timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
    /// Extra registration metadata echoed back to the client
    pub metadata: serde_json::Value,
}

impl OAuthClient {
    pub fn allows_grant(&self, grant_type: &GrantType) -> bool {
        self.grant_types.contains(grant_type)
    }
}

/// OAuth Authorization Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Response type
    pub response_type: String,
    /// Client ID
    pub client_id: String,
    /// Redirect URI
    pub redirect_uri: String,
    /// Requested scope
    pub scope: Option<String>,
    /// State parameter
    pub state: Option<String>,
    /// Code challenge for PKCE
    pub code_challenge: Option<String>,
    /// Code challenge method for PKCE
    pub code_challenge_method: Option<String>,
}

/// Authorization request that has been validated and awaits the resource owner's decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub request_id: String,
    pub request: AuthorizationRequest,
    /// Scope that will be granted on approval
    pub scope: Option<String>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// OAuth Authorization Code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// The authorization code
    pub code: String,
    /// Client ID that requested this code
    pub client_id: String,
    /// User ID that authorized this code
    pub user_id: String,
    /// Redirect URI used in the authorization request
    pub redirect_uri: String,
    /// Granted scope
    pub scope: Option<String>,
    /// Code challenge for PKCE
    pub code_challenge: Option<String>,
    /// Code challenge method for PKCE
    pub code_challenge_method: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
    /// Whether this code has been exchanged or revoked
    pub revoked: bool,
}

/// OAuth Access Token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// The access token
    pub token: String,
    /// Token type
    pub token_type: TokenType,
    /// Client ID
    pub client_id: String,
    /// User ID (None for client credentials)
    pub user_id: Option<String>,
    /// Granted scope
    pub scope: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl AccessToken {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

/// OAuth Refresh Token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    /// The refresh token
    pub token: String,
    /// Access token issued together with this refresh token
    pub access_token: String,
    /// Client ID
    pub client_id: String,
    /// User ID
    pub user_id: Option<String>,
    /// Granted scope
    pub scope: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshToken {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

/// Token Exchange Request
#[derive(Debug, Clone)]
pub struct TokenRequest {
    /// Grant type
    pub grant_type: GrantType,
    /// Authorization code (for authorization_code grant)
    pub code: Option<String>,
    /// Redirect URI (for authorization_code grant)
    pub redirect_uri: Option<String>,
    /// Code verifier (for PKCE)
    pub code_verifier: Option<String>,
    /// Refresh token (for refresh_token grant)
    pub refresh_token: Option<String>,
    /// Requested scope
    pub scope: Option<String>,
}

/// Token Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Token type
    pub token_type: TokenType,
    /// Expires in seconds
    pub expires_in: u64,
    /// Refresh token (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// OAuth Error Response
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    /// Error code
    pub error: String,
    /// Error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Client Registration Request (RFC 7591)
///
/// Enumerated fields stay as strings so that unsupported values can be
/// rejected with a readable `invalid_client_metadata` reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientRegistrationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uris: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
    /// Additional metadata
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Client Registration Response (RFC 7591)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
    /// Only present at registration and when an update generated a new secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<GrantType>,
    pub response_types: Vec<ResponseType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub token_endpoint_auth_method: ClientAuthMethod,
    pub registration_access_token: String,
    pub registration_client_uri: String,
    pub client_id_issued_at: i64,
    /// Zero means the secret never expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<i64>,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Validated bearer token details
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub access_token: String,
    pub client_id: String,
    pub user_id: Option<String>,
    pub scopes: HashSet<String>,
    pub expires_at: DateTime<Utc>,
}

/// Generate a secure random token
pub fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Compare two secrets in time independent of where they first differ
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Generate a client ID
pub fn generate_client_id() -> String {
    Uuid::new_v4().to_string()
}

/// Validate scope string against the RFC 6749 scope-token character set
pub fn validate_scope(scope: &str) -> bool {
    scope.split_whitespace().all(|s| {
        s.chars()
            .all(|c| c.is_ascii_graphic() && c != '"' && c != '\\')
    })
}

/// Parse scope string into a set
pub fn parse_scope(scope: &str) -> HashSet<String> {
    scope.split_whitespace().map(|s| s.to_string()).collect()
}

/// Join scopes into a space-separated string
pub fn join_scopes(scopes: &HashSet<String>) -> String {
    let mut scopes: Vec<_> = scopes.iter().collect();
    scopes.sort();
    scopes.into_iter().cloned().collect::<Vec<_>>().join(" ")
}
