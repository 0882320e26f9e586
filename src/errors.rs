//! Standardized error types following the `error-toolgate-<domain>-<number>` format.

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-toolgate-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when PORT cannot be parsed
    #[error("error-toolgate-config-2 Parsing port into u16 failed: {0:?}")]
    PortParsingFailed(std::num::ParseIntError),

    /// Error when version information is not available
    #[error("error-toolgate-config-3 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-toolgate-config-4 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when boolean string cannot be parsed
    #[error(
        "error-toolgate-config-5 Failed to parse boolean '{0}': expected true/false/1/0/yes/no/on/off"
    )]
    BoolParsingFailed(String),

    /// Error when the supported scope list is unusable
    #[error("error-toolgate-config-6 Invalid scope configuration: {0}")]
    InvalidScope(String),

    /// Error when a resource owner entry is not `user:password`
    #[error("error-toolgate-config-7 Invalid resource owner entry '{0}': expected user:password")]
    InvalidResourceOwner(String),

    /// Error when the gateway path is not an absolute path
    #[error("error-toolgate-config-8 Gateway path must start with '/': {0}")]
    InvalidGatewayPath(String),

    /// Error when the backend command cannot be split into program and arguments
    #[error("error-toolgate-config-9 Invalid backend command: {0}")]
    InvalidBackendCommand(String),
}

/// HTTP server errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// Error when template rendering fails
    #[error("error-toolgate-http-1 Template rendering failed: {0}")]
    TemplateRenderingFailed(String),

    /// Error when request processing fails
    #[error("error-toolgate-http-2 Request processing failed: {0}")]
    RequestProcessingFailed(String),
}

/// OAuth protocol errors
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Malformed or missing request parameters
    #[error("error-toolgate-oauth-1 Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown client or failed client authentication
    #[error("error-toolgate-oauth-2 Invalid client credentials: {0}")]
    InvalidClient(String),

    /// Bad, expired or revoked code or refresh token, or a PKCE mismatch
    #[error("error-toolgate-oauth-3 Invalid grant: {0}")]
    InvalidGrant(String),

    /// Client is not allowed to use the requested grant
    #[error("error-toolgate-oauth-4 Unauthorized client: {0}")]
    UnauthorizedClient(String),

    /// Unsupported grant type
    #[error("error-toolgate-oauth-5 Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Unsupported response type
    #[error("error-toolgate-oauth-6 Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    /// Invalid scope
    #[error("error-toolgate-oauth-7 Invalid scope: {0}")]
    InvalidScope(String),

    /// Resource owner refused the request
    #[error("error-toolgate-oauth-8 Access denied: {0}")]
    AccessDenied(String),

    /// Redirect URI is not registered for the client
    #[error("error-toolgate-oauth-9 Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    /// Server error
    #[error("error-toolgate-oauth-10 Server error: {0}")]
    ServerError(String),
}

impl OAuthError {
    /// The RFC 6749 error code reported to clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) | OAuthError::InvalidRedirectUri(_) => "invalid_request",
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnauthorizedClient(_) => "unauthorized_client",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::UnsupportedResponseType(_) => "unsupported_response_type",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::AccessDenied(_) => "access_denied",
            OAuthError::ServerError(_) => "server_error",
        }
    }

    /// HTTP status used when the error is returned from the token endpoint.
    pub fn status_code(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            OAuthError::AccessDenied(_) => StatusCode::FORBIDDEN,
            OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Bearer token validation errors
#[derive(Debug, Error)]
pub enum TokenError {
    /// Authorization header missing or not a bearer credential
    #[error("error-toolgate-token-1 Missing or malformed bearer credentials")]
    Unauthorized,

    /// Token unknown, expired or revoked
    #[error("error-toolgate-token-2 Invalid access token")]
    InvalidToken,

    /// Token storage failed
    #[error("error-toolgate-token-3 Token storage failed: {0}")]
    Storage(String),
}

/// Client registration errors
#[derive(Debug, Error)]
pub enum ClientRegistrationError {
    /// Invalid client metadata
    #[error("error-toolgate-client-1 Invalid client metadata: {0}")]
    InvalidClientMetadata(String),

    /// Invalid redirect URI
    #[error("error-toolgate-client-2 Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    /// Client not found
    #[error("error-toolgate-client-3 Client not found: {0}")]
    ClientNotFound(String),

    /// Registration access token invalid
    #[error("error-toolgate-client-4 Registration access token invalid: {0}")]
    InvalidRegistrationToken(String),

    /// Client registration disabled
    #[error("error-toolgate-client-5 Client registration disabled")]
    RegistrationDisabled,

    /// Client storage failed
    #[error("error-toolgate-client-6 Client storage failed: {0}")]
    Storage(String),
}

/// Database/storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when database connection fails
    #[error("error-toolgate-storage-1 Database connection failed: {0}")]
    ConnectionFailed(String),

    /// Error when query execution fails
    #[error("error-toolgate-storage-2 Query execution failed: {0}")]
    QueryFailed(String),

    /// Error when data serialization fails
    #[error("error-toolgate-storage-3 Serialization error: {0}")]
    SerializationError(String),

    /// Error when database operation fails
    #[error("error-toolgate-storage-4 Database error: {0}")]
    DatabaseError(String),

    /// Error when data validation fails
    #[error("error-toolgate-storage-5 Invalid data: {0}")]
    InvalidData(String),

    /// Error when an in-memory store lock is poisoned
    #[error("error-toolgate-storage-6 Lock error: {0}")]
    LockPoisoned(String),
}

/// Backend process supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A live backend process is already tracked
    #[error("error-toolgate-supervisor-1 Backend already running with pid {0}")]
    AlreadyRunning(u32),

    /// No live backend process is tracked
    #[error("error-toolgate-supervisor-2 Backend is not running")]
    NotRunning,

    /// The backend did not become ready in time; it may still be starting
    #[error("error-toolgate-supervisor-3 Backend pid {pid} not ready after {waited_ms}ms; log tail:\n{log_tail}")]
    StartTimeout {
        pid: u32,
        waited_ms: u128,
        log_tail: String,
    },

    /// The backend exited before it became ready
    #[error("error-toolgate-supervisor-4 Backend pid {pid} exited during startup; log tail:\n{log_tail}")]
    ExitedDuringStart { pid: u32, log_tail: String },

    /// No backend command is configured
    #[error("error-toolgate-supervisor-5 No backend command configured")]
    CommandNotConfigured,

    /// The backend process could not be spawned
    #[error("error-toolgate-supervisor-6 Failed to spawn backend: {0}")]
    SpawnFailed(String),

    /// Delivering a signal failed
    #[error("error-toolgate-supervisor-7 Failed to signal pid {0}: {1}")]
    SignalFailed(u32, String),

    /// PID, config or log file could not be read or written
    #[error("error-toolgate-supervisor-8 State file error for {0}: {1}")]
    StateFile(String, String),

    /// The operation was cancelled by shutdown
    #[error("error-toolgate-supervisor-9 Operation cancelled")]
    Cancelled,

    /// A backend configuration update was rejected
    #[error("error-toolgate-supervisor-10 Invalid backend configuration: {0}")]
    InvalidConfig(String),
}

/// Proxy gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing, malformed or invalid bearer token
    #[error("error-toolgate-gateway-1 Unauthorized: {0}")]
    Unauthorized(String),

    /// Backend not reachable, failed or timed out
    #[error("error-toolgate-gateway-2 Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Request body is not a JSON-RPC 2.0 envelope
    #[error("error-toolgate-gateway-3 Bad request: {0}")]
    BadRequest(String),

    /// Token lookup failed inside the server
    #[error("error-toolgate-gateway-4 Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, HttpError>;

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        tracing::error!(error = ?self, "internal server error");
        (StatusCode::INTERNAL_SERVER_ERROR).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_follow_format() {
        let err = OAuthError::InvalidGrant("code already used".to_string());
        assert!(err.to_string().starts_with("error-toolgate-oauth-3 "));
        assert_eq!(err.error_code(), "invalid_grant");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = OAuthError::InvalidClient("bad secret".to_string());
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let err = SupervisorError::AlreadyRunning(42);
        assert_eq!(
            err.to_string(),
            "error-toolgate-supervisor-1 Backend already running with pid 42"
        );
    }
}
