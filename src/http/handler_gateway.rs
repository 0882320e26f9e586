//! Handles the proxy gateway path - Authenticated JSON-RPC forwarding to the backend

use axum::{
    Json,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use super::{context::AppState, middleware_auth::create_oauth_error_response};
use crate::errors::GatewayError;
use crate::gateway::{GatewayRejection, jsonrpc::JsonRpcErrorResponse};

/// POST {GATEWAY_PATH}
pub async fn handle_gateway(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match state.gateway.handle(authorization, body).await {
        Ok(forwarded) => {
            let status =
                StatusCode::from_u16(forwarded.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut response = Response::new(Body::from(forwarded.body));
            *response.status_mut() = status;
            if let Some(content_type) = forwarded
                .content_type
                .as_deref()
                .and_then(|value| HeaderValue::from_str(value).ok())
            {
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, content_type);
            }
            response
        }
        Err(rejection) => rejection_response(rejection),
    }
}

/// OPTIONS {GATEWAY_PATH}
///
/// Answers CORS preflights without authentication; the CORS layer adds the headers.
pub async fn handle_gateway_options() -> StatusCode {
    StatusCode::OK
}

fn rejection_response(rejection: GatewayRejection) -> Response {
    let code = rejection.rpc_code();
    let message = rejection.error.to_string();
    let body = Json(JsonRpcErrorResponse::new(rejection.id, code, message.clone()));

    match rejection.error {
        GatewayError::Unauthorized(reason) => {
            tracing::debug!(%reason, "gateway request without valid bearer token");
            let mut response =
                create_oauth_error_response(StatusCode::UNAUTHORIZED, "invalid_token", &message);
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            response
        }
        GatewayError::ServiceUnavailable(reason) => {
            tracing::warn!(%reason, "gateway backend unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
        }
        GatewayError::BadRequest(reason) => {
            tracing::debug!(%reason, "gateway request is not a JSON-RPC envelope");
            (StatusCode::BAD_REQUEST, body).into_response()
        }
        GatewayError::Internal(reason) => {
            tracing::error!(%reason, "gateway token validation failed");
            create_oauth_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "token validation failed",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_internal_rejection_hides_reason() {
        let response = rejection_response(GatewayRejection {
            error: GatewayError::Internal("pool timed out while waiting".to_string()),
            id: None,
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());

        let body = body_json(response).await;
        assert_eq!(body["error"], "server_error");
        assert_eq!(body["error_description"], "token validation failed");
        assert!(!body.to_string().contains("pool timed out"));
    }

    #[tokio::test]
    async fn test_unauthorized_rejection_challenges() {
        let response = rejection_response(GatewayRejection {
            error: GatewayError::Unauthorized("missing bearer token".to_string()),
            id: None,
        });
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
        assert_eq!(body_json(response).await["error"], "invalid_token");
    }

    #[tokio::test]
    async fn test_unavailable_rejection_echoes_id() {
        let response = rejection_response(GatewayRejection {
            error: GatewayError::ServiceUnavailable("connection refused".to_string()),
            id: Some(serde_json::json!(7)),
        });
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert_eq!(body["id"], 7);
        assert_eq!(body["error"]["code"], crate::gateway::jsonrpc::BACKEND_UNAVAILABLE);
    }
}
