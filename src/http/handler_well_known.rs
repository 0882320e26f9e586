//! Handles OAuth 2.0 well-known discovery endpoints - authorization server metadata and protected resource metadata

use axum::{extract::State, response::Json};
use serde_json::{Value, json};

use super::context::AppState;
use crate::oauth::GrantType;

/// OAuth 2.0 Protected Resource Metadata handler
/// GET /.well-known/oauth-protected-resource
///
/// Describes the proxy gateway as the protected resource (RFC 9728).
pub async fn oauth_protected_resource_handler(State(state): State<AppState>) -> Json<Value> {
    let metadata = json!({
        "resource": state.config.gateway_url(),
        "authorization_servers": [state.config.external_base],
        "scopes_supported": state.config.oauth_supported_scopes.as_ref(),
        "bearer_methods_supported": ["header"],
    });

    Json(metadata)
}

/// OAuth 2.0 Authorization Server Metadata handler
/// GET /.well-known/oauth-authorization-server
///
/// Returns metadata about the OAuth authorization server as specified by RFC 8414.
pub async fn oauth_authorization_server_handler(State(state): State<AppState>) -> Json<Value> {
    let base = &state.config.external_base;
    let grant_types: Vec<&str> = GrantType::ALL.iter().map(GrantType::as_str).collect();

    let mut metadata = json!({
        "issuer": base,
        "authorization_endpoint": format!("{}/oauth2/authorize", base),
        "token_endpoint": format!("{}/oauth2/token", base),
        "revocation_endpoint": format!("{}/oauth2/revoke", base),
        "introspection_endpoint": format!("{}/oauth2/verify", base),
        "scopes_supported": state.config.oauth_supported_scopes.as_ref(),
        "response_types_supported": ["code"],
        "response_modes_supported": ["query"],
        "grant_types_supported": grant_types,
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post", "none"],
        "revocation_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post", "none"],
        "code_challenge_methods_supported": ["plain", "S256"],
    });

    if state.client_registration_service.registration_enabled() {
        metadata["registration_endpoint"] = json!(format!("{}/oauth2/register", base));
    }

    Json(metadata)
}
