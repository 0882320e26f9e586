//! Handles /oauth2/login and /oauth2/logout - Resource owner sign-in for the authorization endpoint

use axum::{
    Form,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_template::RenderHtml;
use minijinja::context;
use serde::Deserialize;

use super::{
    context::AppState,
    utils_oauth::{current_session, safe_return_to, secure_cookies, session_cookie},
};
use crate::oauth::SessionStore;

const DEFAULT_RETURN_TO: &str = "/";

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub return_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub return_to: Option<String>,
}

/// GET /oauth2/login
pub async fn handle_login_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Response {
    let return_to = safe_return_to(query.return_to.as_deref()).unwrap_or(DEFAULT_RETURN_TO);

    if current_session(&state, &headers).await.is_some() {
        return Redirect::to(return_to).into_response();
    }

    render_login(&state, StatusCode::OK, return_to, None)
}

/// POST /oauth2/login
pub async fn handle_login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let return_to = safe_return_to(form.return_to.as_deref()).unwrap_or(DEFAULT_RETURN_TO);

    let Some(user_id) = state
        .authenticator
        .authenticate(&form.username, &form.password)
        .await
    else {
        return render_login(
            &state,
            StatusCode::UNAUTHORIZED,
            return_to,
            Some("Invalid username or password"),
        );
    };

    let session = state.sessions.create(&user_id).await;
    tracing::info!(user_id = %user_id, "resource owner signed in");

    let cookie = state.sessions.cookie(&session, secure_cookies(&state));
    with_cookie(Redirect::to(return_to).into_response(), &cookie)
}

/// POST /oauth2/logout
pub async fn handle_logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(session_id) = session_cookie(&headers) {
        if state.sessions.remove(session_id).await {
            tracing::info!("resource owner signed out");
        }
    }

    with_cookie(
        Redirect::to("/oauth2/login").into_response(),
        &SessionStore::clear_cookie(),
    )
}

fn render_login(
    state: &AppState,
    status: StatusCode,
    return_to: &str,
    error: Option<&str>,
) -> Response {
    (
        status,
        RenderHtml(
            "login.html",
            state.template_env.clone(),
            context! {
                return_to => return_to,
                error => error,
            },
        ),
    )
        .into_response()
}

fn with_cookie(mut response: Response, cookie: &str) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => tracing::error!(error = %e, "invalid session cookie value"),
    }
    response
}
