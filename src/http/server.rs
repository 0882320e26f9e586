//! Main router configuration assembling the OAuth, gateway and administration endpoints.

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use super::{
    context::AppState,
    handler_gateway::{handle_gateway, handle_gateway_options},
    handler_login::{handle_login, handle_login_page, handle_logout},
    handler_oauth::{handle_oauth_revoke, handle_oauth_token, handle_oauth_verify},
    handler_oauth_authorize::{handle_oauth_authorize, handle_oauth_authorize_decision},
    handler_oauth_clients::{
        delete_client_handler, get_client_handler, register_client_handler,
        update_client_handler,
    },
    handler_process::{
        process_config_handler, process_logs_handler, process_restart_handler,
        process_start_handler, process_status_handler, process_stop_handler,
        process_update_config_handler,
    },
    handler_well_known::{oauth_authorization_server_handler, oauth_protected_resource_handler},
};

/// Build the application router
pub fn build_router(ctx: AppState) -> Router {
    let oauth_routes = Router::new()
        .route(
            "/authorize",
            get(handle_oauth_authorize).post(handle_oauth_authorize_decision),
        )
        .route("/login", get(handle_login_page).post(handle_login))
        .route("/logout", post(handle_logout))
        .route("/token", post(handle_oauth_token))
        .route("/revoke", post(handle_oauth_revoke))
        .route("/verify", get(handle_oauth_verify))
        .route("/register", post(register_client_handler))
        .route(
            "/register/{client_id}",
            get(get_client_handler)
                .put(update_client_handler)
                .delete(delete_client_handler),
        );

    // The optional path segment names the resource the metadata is requested for (RFC 9728).
    let well_known_routes = Router::new()
        .route(
            "/oauth-protected-resource",
            get(oauth_protected_resource_handler),
        )
        .route(
            "/oauth-protected-resource/{*resource}",
            get(oauth_protected_resource_handler),
        )
        .route(
            "/oauth-authorization-server",
            get(oauth_authorization_server_handler),
        )
        .route(
            "/oauth-authorization-server/{*resource}",
            get(oauth_authorization_server_handler),
        );

    let admin_routes = Router::new()
        .route("/process", get(process_status_handler))
        .route("/process/start", post(process_start_handler))
        .route("/process/stop", post(process_stop_handler))
        .route("/process/restart", post(process_restart_handler))
        .route(
            "/process/config",
            get(process_config_handler).put(process_update_config_handler),
        )
        .route("/process/logs", get(process_logs_handler));

    let cors = cors_layer(ctx.config.cors_allowed_origins.as_ref());
    let gateway_path = ctx.config.gateway_path.as_ref().clone();

    Router::new()
        .nest("/oauth2", oauth_routes)
        .nest("/.well-known", well_known_routes)
        .nest("/admin", admin_routes)
        .route(
            &gateway_path,
            post(handle_gateway).options(handle_gateway_options),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ])
        .expose_headers([header::WWW_AUTHENTICATE])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::context::test_support::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_gateway_rejects_other_methods() {
        let (state, _dir) = test_state(&[]);
        let router = build_router(state);

        let response = router
            .clone()
            .oneshot(Request::get("/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/mcp")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_gateway_path_is_configurable() {
        let (state, _dir) = test_state(&[("GATEWAY_PATH", "/tools/rpc")]);
        let router = build_router(state);

        let response = router
            .clone()
            .oneshot(Request::post("/tools/rpc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );

        let response = router
            .oneshot(Request::post("/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_cors_layer_ignores_invalid_origins() {
        let _ = cors_layer(&["https://app.example".to_string(), "bad\norigin".to_string()]);
        let _ = cors_layer(&[]);
    }
}
