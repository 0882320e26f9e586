//! Handles /oauth2/authorize - Authorization code requests with resource owner consent

use axum::{
    Form,
    extract::{Query, RawQuery, State, rejection::QueryRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use axum_template::RenderHtml;
use minijinja::context;
use serde::Deserialize;

use super::{
    context::AppState,
    utils_oauth::{current_session, render_error_page},
};
use crate::errors::OAuthError;
use crate::oauth::{
    AuthorizeQuery, ConsentPrompt,
    auth_server::error_redirect,
    types::{AuthorizationRequest, parse_scope},
};

/// Consent decision posted from the consent page
#[derive(Debug, Deserialize)]
pub struct ConsentForm {
    pub request_id: String,
    pub action: String,
}

/// GET /oauth2/authorize
pub async fn handle_oauth_authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    query: Result<Query<AuthorizeQuery>, QueryRejection>,
) -> Response {
    let Some(session) = current_session(&state, &headers).await else {
        return redirect_to_login(raw_query.as_deref());
    };

    let Query(query) = match query {
        Ok(query) => query,
        Err(e) => {
            return render_error_page(
                &state,
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &e.body_text(),
            );
        }
    };

    let request: AuthorizationRequest = query.into();
    let redirect_uri = request.redirect_uri.clone();
    let request_state = request.state.clone();

    match state
        .auth_server
        .begin_authorization(request, &session.user_id)
        .await
    {
        Ok(prompt) => render_consent(&state, &prompt),
        Err(e @ (OAuthError::InvalidClient(_) | OAuthError::InvalidRedirectUri(_))) => {
            tracing::info!(error = %e, "authorization request rejected before redirect");
            render_error_page(&state, StatusCode::BAD_REQUEST, e.error_code(), &e.to_string())
        }
        Err(e @ OAuthError::ServerError(_)) => render_error_page(
            &state,
            StatusCode::INTERNAL_SERVER_ERROR,
            e.error_code(),
            "the authorization request could not be processed",
        ),
        Err(e) => {
            tracing::info!(error = %e, "authorization request rejected");
            match error_redirect(&redirect_uri, &e, request_state.as_deref()) {
                Ok(location) => Redirect::to(&location).into_response(),
                Err(redirect_error) => render_error_page(
                    &state,
                    StatusCode::BAD_REQUEST,
                    redirect_error.error_code(),
                    &redirect_error.to_string(),
                ),
            }
        }
    }
}

/// POST /oauth2/authorize
pub async fn handle_oauth_authorize_decision(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ConsentForm>,
) -> Response {
    let Some(session) = current_session(&state, &headers).await else {
        return render_error_page(
            &state,
            StatusCode::UNAUTHORIZED,
            "login_required",
            "your session has expired, restart the authorization from the application",
        );
    };

    let result = match form.action.as_str() {
        "approve" => {
            state
                .auth_server
                .approve(&form.request_id, &session.user_id)
                .await
        }
        "deny" => {
            state
                .auth_server
                .deny(&form.request_id, &session.user_id)
                .await
        }
        other => Err(OAuthError::InvalidRequest(format!(
            "unknown consent action '{}'",
            other
        ))),
    };

    match result {
        Ok(location) => Redirect::to(&location).into_response(),
        Err(e) => {
            let status = match e {
                OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
                OAuthError::AccessDenied(_) => StatusCode::FORBIDDEN,
                _ => StatusCode::BAD_REQUEST,
            };
            render_error_page(&state, status, e.error_code(), &e.to_string())
        }
    }
}

fn render_consent(state: &AppState, prompt: &ConsentPrompt) -> Response {
    let client_name = prompt
        .client
        .client_name
        .clone()
        .unwrap_or_else(|| prompt.client.client_id.clone());

    let mut scopes: Vec<String> = prompt
        .pending
        .scope
        .as_deref()
        .map(parse_scope)
        .unwrap_or_default()
        .into_iter()
        .collect();
    scopes.sort();

    let redirect_uri = &prompt.pending.request.redirect_uri;
    let redirect_host = url::Url::parse(redirect_uri)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| redirect_uri.clone());

    RenderHtml(
        "consent.html",
        state.template_env.clone(),
        context! {
            client_name => client_name,
            client_id => prompt.client.client_id,
            scopes => scopes,
            redirect_host => redirect_host,
            request_id => prompt.pending.request_id,
            user_id => prompt.pending.user_id,
        },
    )
    .into_response()
}

fn redirect_to_login(raw_query: Option<&str>) -> Response {
    let return_to = match raw_query {
        Some(query) if !query.is_empty() => format!("/oauth2/authorize?{}", query),
        _ => "/oauth2/authorize".to_string(),
    };
    let login = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("return_to", &return_to)
        .finish();
    Redirect::to(&format!("/oauth2/login?{}", login)).into_response()
}
