//! Handles /oauth2/register - Dynamic client registration (RFC 7591) and management (RFC 7592)

use axum::{
    extract::{Json, Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Json as ResponseJson, Response},
};
use crate::{
    errors::ClientRegistrationError,
    http::context::AppState,
    oauth::{
        resource_server::bearer_token,
        types::{ClientRegistrationRequest, ClientRegistrationResponse, OAuthErrorResponse},
    },
};

type ErrorReply = (StatusCode, HeaderMap, ResponseJson<OAuthErrorResponse>);
type RegistrationResult<T> = Result<T, ErrorReply>;

/// POST /oauth2/register
pub async fn register_client_handler(
    State(state): State<AppState>,
    request: Result<Json<ClientRegistrationRequest>, JsonRejection>,
) -> RegistrationResult<Response> {
    let Json(request) = request.map_err(|e| {
        error_body(
            StatusCode::BAD_REQUEST,
            "invalid_client_metadata",
            e.body_text(),
        )
    })?;

    let response = state
        .client_registration_service
        .register(request)
        .await
        .map_err(registration_error)?;

    tracing::info!(client_id = %response.client_id, "client registered");
    Ok((StatusCode::CREATED, ResponseJson(response)).into_response())
}

/// GET /oauth2/register/{client_id}
pub async fn get_client_handler(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> RegistrationResult<ResponseJson<ClientRegistrationResponse>> {
    let token = registration_token(&headers)?;
    state
        .client_registration_service
        .get(&client_id, token)
        .await
        .map(ResponseJson)
        .map_err(registration_error)
}

/// PUT /oauth2/register/{client_id}
pub async fn update_client_handler(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
    request: Result<Json<ClientRegistrationRequest>, JsonRejection>,
) -> RegistrationResult<ResponseJson<ClientRegistrationResponse>> {
    let token = registration_token(&headers)?;
    let Json(request) = request.map_err(|e| {
        error_body(
            StatusCode::BAD_REQUEST,
            "invalid_client_metadata",
            e.body_text(),
        )
    })?;

    state
        .client_registration_service
        .update(&client_id, token, request)
        .await
        .map(ResponseJson)
        .map_err(registration_error)
}

/// DELETE /oauth2/register/{client_id}
pub async fn delete_client_handler(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> RegistrationResult<StatusCode> {
    let token = registration_token(&headers)?;
    state
        .client_registration_service
        .delete(&client_id, token)
        .await
        .map_err(registration_error)?;

    tracing::info!(client_id = %client_id, "client deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn registration_token(headers: &HeaderMap) -> RegistrationResult<&str> {
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    bearer_token(header_value).ok_or_else(|| {
        error_body(
            StatusCode::UNAUTHORIZED,
            "invalid_token",
            "registration access token required".to_string(),
        )
    })
}

fn registration_error(e: ClientRegistrationError) -> ErrorReply {
    let (status, error_code, description) = match &e {
        ClientRegistrationError::InvalidClientMetadata(_) => (
            StatusCode::BAD_REQUEST,
            "invalid_client_metadata",
            e.to_string(),
        ),
        ClientRegistrationError::InvalidRedirectUri(_) => (
            StatusCode::BAD_REQUEST,
            "invalid_redirect_uri",
            e.to_string(),
        ),
        // An unknown client id is reported like a bad token so client existence is not revealed.
        ClientRegistrationError::ClientNotFound(_)
        | ClientRegistrationError::InvalidRegistrationToken(_) => (
            StatusCode::UNAUTHORIZED,
            "invalid_token",
            "invalid registration access token".to_string(),
        ),
        ClientRegistrationError::RegistrationDisabled => (
            StatusCode::FORBIDDEN,
            "registration_not_supported",
            e.to_string(),
        ),
        ClientRegistrationError::Storage(_) => {
            tracing::error!(error = %e, "client registration storage failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "Internal server error".to_string(),
            )
        }
    };
    error_body(status, error_code, description)
}

fn error_body(
    status: StatusCode,
    error_code: &str,
    description: String,
) -> ErrorReply {
    let mut headers = HeaderMap::new();
    if status == StatusCode::UNAUTHORIZED {
        headers.insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Bearer error=\"invalid_token\""),
        );
    }
    (
        status,
        headers,
        ResponseJson(OAuthErrorResponse {
            error: error_code.to_string(),
            error_description: Some(description),
        }),
    )
}
