//! Handles /admin/process - Backend process administration for admin users

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{context::AppState, middleware_auth::AdminAuth};
use crate::errors::SupervisorError;
use crate::supervisor::BackendConfigPatch;

const DEFAULT_LOG_LINES: usize = 100;
const MAX_LOG_LINES: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<usize>,
}

/// GET /admin/process
pub async fn process_status_handler(
    State(state): State<AppState>,
    AdminAuth(_): AdminAuth,
) -> Response {
    match state.supervisor.status().await {
        Ok(status) => success(
            format!("backend is {}", state_label(&status.state)),
            json!({ "status": status }),
        ),
        Err(e) => failure(e),
    }
}

/// POST /admin/process/start
pub async fn process_start_handler(
    State(state): State<AppState>,
    AdminAuth(token): AdminAuth,
) -> Response {
    tracing::info!(user_id = ?token.user_id, "backend start requested");
    match state.supervisor.start().await {
        Ok(handle) => success(
            format!("backend started with pid {}", handle.pid),
            json!({ "process": handle }),
        ),
        Err(e) => failure(e),
    }
}

/// POST /admin/process/stop
pub async fn process_stop_handler(
    State(state): State<AppState>,
    AdminAuth(token): AdminAuth,
) -> Response {
    tracing::info!(user_id = ?token.user_id, "backend stop requested");
    match state.supervisor.stop().await {
        Ok(outcome) => success(
            format!("backend pid {} stopped", outcome.pid),
            json!({ "pid": outcome.pid, "forced": outcome.forced }),
        ),
        Err(e) => failure(e),
    }
}

/// POST /admin/process/restart
pub async fn process_restart_handler(
    State(state): State<AppState>,
    AdminAuth(token): AdminAuth,
) -> Response {
    tracing::info!(user_id = ?token.user_id, "backend restart requested");
    match state.supervisor.restart().await {
        Ok(handle) => success(
            format!("backend restarted with pid {}", handle.pid),
            json!({ "process": handle }),
        ),
        Err(e) => failure(e),
    }
}

/// GET /admin/process/config
pub async fn process_config_handler(
    State(state): State<AppState>,
    AdminAuth(_): AdminAuth,
) -> Response {
    match state.supervisor.config().await {
        Ok(config) => success("backend configuration".to_string(), json!({ "config": config })),
        Err(e) => failure(e),
    }
}

/// PUT /admin/process/config
pub async fn process_update_config_handler(
    State(state): State<AppState>,
    AdminAuth(token): AdminAuth,
    Json(patch): Json<BackendConfigPatch>,
) -> Response {
    tracing::info!(user_id = ?token.user_id, ?patch, "backend configuration update requested");
    match state.supervisor.update_config(patch).await {
        Ok(config) => success(
            "backend configuration updated, restart the backend to apply it".to_string(),
            json!({ "config": config }),
        ),
        Err(e) => failure(e),
    }
}

/// GET /admin/process/logs?lines=N
pub async fn process_logs_handler(
    State(state): State<AppState>,
    AdminAuth(_): AdminAuth,
    Query(query): Query<LogsQuery>,
) -> Response {
    let lines = query
        .lines
        .unwrap_or(DEFAULT_LOG_LINES)
        .clamp(1, MAX_LOG_LINES);
    match state.supervisor.log_tail(lines).await {
        Ok(logs) => success(format!("last {} log lines", lines), json!({ "logs": logs })),
        Err(e) => failure(e),
    }
}

fn state_label(state: &crate::supervisor::ProcessState) -> String {
    serde_json::to_value(state)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", state))
}

fn success(message: String, extra: Value) -> Response {
    let mut body = json!({ "success": true, "message": message });
    merge(&mut body, extra);
    (StatusCode::OK, Json(body)).into_response()
}

fn failure(e: SupervisorError) -> Response {
    let status = match &e {
        SupervisorError::AlreadyRunning(_) | SupervisorError::NotRunning => StatusCode::CONFLICT,
        SupervisorError::CommandNotConfigured | SupervisorError::InvalidConfig(_) => {
            StatusCode::BAD_REQUEST
        }
        SupervisorError::StartTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        SupervisorError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        SupervisorError::ExitedDuringStart { .. }
        | SupervisorError::SpawnFailed(_)
        | SupervisorError::SignalFailed(_, _)
        | SupervisorError::StateFile(_, _) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %e, "backend administration failed");
    } else {
        tracing::info!(error = %e, "backend administration refused");
    }

    let mut body = json!({ "success": false, "message": e.to_string() });
    match &e {
        SupervisorError::AlreadyRunning(pid) => merge(&mut body, json!({ "pid": pid })),
        SupervisorError::StartTimeout { pid, log_tail, .. }
        | SupervisorError::ExitedDuringStart { pid, log_tail } => {
            merge(&mut body, json!({ "pid": pid, "logs": log_tail }))
        }
        _ => {}
    }
    (status, Json(body)).into_response()
}

fn merge(body: &mut Value, extra: Value) {
    if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
        body.extend(extra);
    }
}
