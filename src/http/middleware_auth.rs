//! Bearer token extractors for protected endpoints.
//!
//! [`ExtractedAuth`] accepts any valid access token; [`AdminAuth`] additionally requires the
//! token's resource owner to be listed in `ADMIN_USERS`.

use crate::errors::TokenError;
use crate::http::AppState;
use crate::oauth::{OAuthErrorResponse, TokenInfo};
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use http::request::Parts;

/// Authenticated token of the caller
#[derive(Clone, Debug)]
pub struct ExtractedAuth(pub TokenInfo);

/// Authenticated token of an administrator
#[derive(Clone, Debug)]
pub struct AdminAuth(pub TokenInfo);

/// Create a standard OAuth 2.0 error response
pub(crate) fn create_oauth_error_response(
    status: StatusCode,
    error: &str,
    error_description: &str,
) -> Response {
    let body = OAuthErrorResponse {
        error: error.to_string(),
        error_description: Some(error_description.to_string()),
    };

    (status, axum::Json(body)).into_response()
}

/// 401 with a `WWW-Authenticate: Bearer` challenge (RFC 6750 Section 3)
pub(crate) fn bearer_challenge(err: &TokenError) -> Response {
    let (challenge, error) = match err {
        TokenError::Unauthorized => ("Bearer", "invalid_request"),
        TokenError::InvalidToken => ("Bearer error=\"invalid_token\"", "invalid_token"),
        TokenError::Storage(_) => {
            tracing::error!(error = %err, "token validation failed");
            return create_oauth_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "token validation failed",
            );
        }
    };

    let mut response =
        create_oauth_error_response(StatusCode::UNAUTHORIZED, error, &err.to_string());
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static(challenge),
    );
    response
}

impl<S> FromRequestParts<S> for ExtractedAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        app_state
            .token_validator
            .validate_header(auth_header)
            .await
            .map(ExtractedAuth)
            .map_err(|e| bearer_challenge(&e))
    }
}

impl<S> FromRequestParts<S> for AdminAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ExtractedAuth(token) = ExtractedAuth::from_request_parts(parts, state).await?;
        let app_state = AppState::from_ref(state);

        match token.user_id.as_deref() {
            Some(user_id) if app_state.config.admin_users.contains(user_id) => Ok(AdminAuth(token)),
            _ => {
                tracing::warn!(
                    client_id = %token.client_id,
                    user_id = ?token.user_id,
                    "administrative request from a non-admin token"
                );
                Err(create_oauth_error_response(
                    StatusCode::FORBIDDEN,
                    "insufficient_scope",
                    "administrator privileges required",
                ))
            }
        }
    }
}
