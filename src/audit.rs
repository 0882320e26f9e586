//! Audit events for security-relevant actions.

use serde::Serialize;

/// A security-relevant action worth recording.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    ClientRegistered {
        client_id: String,
        client_type: String,
    },
    ClientUpdated {
        client_id: String,
    },
    ClientDeleted {
        client_id: String,
    },
    AuthorizationCodeIssued {
        client_id: String,
        user_id: String,
        scope: Option<String>,
    },
    AuthorizationDenied {
        client_id: String,
        user_id: String,
    },
    TokenIssued {
        client_id: String,
        user_id: Option<String>,
        grant_type: String,
        scope: Option<String>,
    },
    TokenRefreshed {
        client_id: String,
        user_id: Option<String>,
    },
    TokenRevoked {
        client_id: Option<String>,
    },
    GatewayForward {
        client_id: String,
        user_id: Option<String>,
        method: String,
        status: u16,
    },
    ProcessStarted {
        pid: u32,
    },
    ProcessStopped {
        pid: u32,
        forced: bool,
    },
}

/// Sink that records audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events as structured log lines on the `toolgate::audit` target.
#[derive(Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(target: "toolgate::audit", %payload, "audit"),
            Err(err) => tracing::warn!(target: "toolgate::audit", ?event, error = ?err, "audit"),
        }
    }
}
