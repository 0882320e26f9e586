//! Helpers shared by the browser-facing OAuth handlers.

use axum::{
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_template::RenderHtml;
use minijinja::context;

use super::context::AppState;
use crate::oauth::owner::{Session, session_id_from_cookie};

/// Resource owner session referenced by the request's cookie, if still valid.
pub async fn current_session(state: &AppState, headers: &HeaderMap) -> Option<Session> {
    let session_id = session_cookie(headers)?;
    state.sessions.get(session_id).await
}

/// Session id carried by any `Cookie` header of the request
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(session_id_from_cookie)
}

/// Session cookies are marked `Secure` when the server is published over https.
pub fn secure_cookies(state: &AppState) -> bool {
    state.config.external_base.starts_with("https://")
}

/// Accept only local absolute paths as post-login destinations.
pub fn safe_return_to(return_to: Option<&str>) -> Option<&str> {
    return_to.filter(|value| {
        value.starts_with('/') && !value.starts_with("//") && !value.contains('\\')
    })
}

/// Render the error page for failures that must not be redirected.
pub fn render_error_page(
    state: &AppState,
    status: StatusCode,
    error: &str,
    error_description: &str,
) -> Response {
    (
        status,
        RenderHtml(
            "error.html",
            state.template_env.clone(),
            context! {
                error => error,
                error_description => error_description,
            },
        ),
    )
        .into_response()
}
