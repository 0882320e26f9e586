//! Handles the OAuth 2.1 token, revocation and verification endpoints.

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{context::AppState, middleware_auth::ExtractedAuth};
use crate::errors::OAuthError;
use crate::oauth::{
    OAuthErrorResponse, TokenResponse,
    auth_server::{TokenForm, extract_client_auth},
    types::TokenRequest,
};

/// Form data for the revocation endpoint (RFC 7009 Section 2.1)
#[derive(Debug, Deserialize)]
pub struct RevokeForm {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// POST /oauth2/token
pub async fn handle_oauth_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenForm>, FormRejection>,
) -> Result<(HeaderMap, Json<TokenResponse>), Response> {
    let Form(form) = form.map_err(|e| {
        oauth_error_response(&OAuthError::InvalidRequest(e.body_text()))
    })?;

    let client_auth = extract_client_auth(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    );

    let request = TokenRequest::try_from(form).map_err(|e| oauth_error_response(&e))?;
    let grant_type = request.grant_type.clone();

    match state.auth_server.token(request, client_auth).await {
        Ok(response) => Ok((no_store_headers(), Json(response))),
        Err(e) => {
            tracing::info!(grant_type = %grant_type, error = %e, "token request rejected");
            Err(oauth_error_response(&e))
        }
    }
}

/// POST /oauth2/revoke
///
/// Responds 200 for unknown tokens as well (RFC 7009 Section 2.2).
pub async fn handle_oauth_revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<RevokeForm>, FormRejection>,
) -> Result<StatusCode, Response> {
    let Form(form) = form.map_err(|e| {
        oauth_error_response(&OAuthError::InvalidRequest(e.body_text()))
    })?;

    let token = form
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            oauth_error_response(&OAuthError::InvalidRequest(
                "token parameter is required".to_string(),
            ))
        })?;

    if let Some(hint) = form.token_type_hint.as_deref() {
        tracing::debug!(hint, "revocation token type hint");
    }

    let client_auth = extract_client_auth(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    );

    state
        .auth_server
        .revoke(token, client_auth)
        .await
        .map_err(|e| oauth_error_response(&e))?;

    Ok(StatusCode::OK)
}

/// GET /oauth2/verify
pub async fn handle_oauth_verify(ExtractedAuth(token): ExtractedAuth) -> Json<Value> {
    let mut scopes: Vec<&String> = token.scopes.iter().collect();
    scopes.sort();

    Json(json!({
        "valid": true,
        "client_id": token.client_id,
        "user_id": token.user_id,
        "scopes": scopes,
        "expires_at": token.expires_at,
    }))
}

/// `{error, error_description}` with the status the error maps to
pub(crate) fn oauth_error_response(e: &OAuthError) -> Response {
    let body = OAuthErrorResponse {
        error: e.error_code().to_string(),
        error_description: Some(e.to_string()),
    };

    let status = e.status_code();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "oauth request failed");
    }

    let mut headers = no_store_headers();
    if status == StatusCode::UNAUTHORIZED {
        headers.insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"toolgate\""),
        );
    }
    (status, headers, Json(body)).into_response()
}

fn no_store_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}
