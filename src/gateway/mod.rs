//! Authenticating proxy in front of the supervised backend.
//!
//! The gateway never interprets tool calls: once the bearer token and the JSON-RPC envelope
//! check out, the request body is forwarded byte for byte and the backend's answer is relayed.

pub mod jsonrpc;

use crate::audit::{AuditEvent, AuditSink};
use crate::errors::{GatewayError, TokenError};
use crate::oauth::{TokenInfo, TokenValidator};
use crate::supervisor::ProcessSupervisor;
use axum::body::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Backend answer relayed to the caller unchanged
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// A refused or failed gateway call, with the request id when one could be read
#[derive(Debug)]
pub struct GatewayRejection {
    pub error: GatewayError,
    pub id: Option<Value>,
}

impl GatewayRejection {
    fn new(error: GatewayError, id: Option<Value>) -> Self {
        Self { error, id }
    }

    /// JSON-RPC error code matching the failure
    pub fn rpc_code(&self) -> i32 {
        match self.error {
            GatewayError::BadRequest(_) | GatewayError::Unauthorized(_) => {
                jsonrpc::INVALID_REQUEST
            }
            GatewayError::ServiceUnavailable(_) => jsonrpc::BACKEND_UNAVAILABLE,
            GatewayError::Internal(_) => jsonrpc::INTERNAL_ERROR,
        }
    }
}

pub struct ProxyGateway {
    validator: Arc<TokenValidator>,
    supervisor: Arc<ProcessSupervisor>,
    client: reqwest::Client,
    forward_timeout: Duration,
    audit: Arc<dyn AuditSink>,
}

impl ProxyGateway {
    pub fn new(
        validator: Arc<TokenValidator>,
        supervisor: Arc<ProcessSupervisor>,
        client: reqwest::Client,
        forward_timeout: Duration,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            validator,
            supervisor,
            client,
            forward_timeout,
            audit,
        }
    }

    /// Authenticate, check the backend and the envelope, then forward `body`.
    pub async fn handle(
        &self,
        authorization: Option<&str>,
        body: Bytes,
    ) -> Result<ForwardedResponse, GatewayRejection> {
        let token = self
            .validator
            .validate_header(authorization)
            .await
            .map_err(|e| {
                let error = match e {
                    TokenError::Unauthorized => {
                        GatewayError::Unauthorized("missing bearer token".to_string())
                    }
                    TokenError::InvalidToken => GatewayError::Unauthorized(e.to_string()),
                    TokenError::Storage(_) => GatewayError::Internal(e.to_string()),
                };
                GatewayRejection::new(error, None)
            })?;

        let config = self.supervisor.config().await.map_err(|e| {
            GatewayRejection::new(GatewayError::ServiceUnavailable(e.to_string()), None)
        })?;
        if !self.supervisor.probe(&config).await {
            let id = jsonrpc::request_id(&body);
            return Err(GatewayRejection::new(
                GatewayError::ServiceUnavailable("backend is not accepting requests".to_string()),
                id,
            ));
        }

        let envelope = jsonrpc::validate(&body)
            .map_err(|reason| {
                GatewayRejection::new(GatewayError::BadRequest(reason), jsonrpc::request_id(&body))
            })?;

        let url = self.supervisor.backend_url(&config);
        let result = self.forward(url, body).await;
        self.record(&token, &envelope, &result);

        result.map_err(|reason| {
            GatewayRejection::new(GatewayError::ServiceUnavailable(reason), envelope.id.clone())
        })
    }

    /// The forward runs in its own task so a disconnecting caller does not abort it midway.
    async fn forward(&self, url: String, body: Bytes) -> Result<ForwardedResponse, String> {
        let request = self
            .client
            .post(&url)
            .timeout(self.forward_timeout)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body);

        let task = tokio::spawn(async move {
            let response = request.send().await.map_err(|e| e.to_string())?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(http::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await.map_err(|e| e.to_string())?;
            Ok::<_, String>(ForwardedResponse {
                status,
                content_type,
                body,
            })
        });

        match task.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(reason)) => {
                tracing::warn!(%url, error = %reason, "backend forward failed");
                Err(reason)
            }
            Err(join_error) => {
                tracing::error!(%url, error = %join_error, "backend forward task failed");
                Err(join_error.to_string())
            }
        }
    }

    fn record(
        &self,
        token: &TokenInfo,
        envelope: &jsonrpc::Envelope,
        result: &Result<ForwardedResponse, String>,
    ) {
        let status = match result {
            Ok(response) => response.status,
            Err(_) => http::StatusCode::SERVICE_UNAVAILABLE.as_u16(),
        };
        self.audit.record(AuditEvent::GatewayForward {
            client_id: token.client_id.clone(),
            user_id: token.user_id.clone(),
            method: envelope.method_label(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditSink;
    use crate::storage::{MemoryOAuthStorage, OAuthStorage};
    use crate::supervisor::{BackendConfig, SupervisorSettings};

    const PING: &[u8] = br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;

    fn gateway(storage: Arc<dyn OAuthStorage>, state_dir: std::path::PathBuf) -> ProxyGateway {
        let settings = SupervisorSettings {
            command: None,
            working_dir: None,
            state_dir,
            defaults: BackendConfig {
                host: "127.0.0.1".to_string(),
                port: 9,
                auto_start: false,
                log_level: "info".to_string(),
            },
            backend_path: "/".to_string(),
            start_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
            stop_grace: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(200),
        };
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
        let supervisor =
            ProcessSupervisor::new(settings, reqwest::Client::new(), audit.clone());
        ProxyGateway::new(
            Arc::new(TokenValidator::new(storage)),
            Arc::new(supervisor),
            reqwest::Client::new(),
            Duration::from_secs(1),
            audit,
        )
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(Arc::new(MemoryOAuthStorage::new()), dir.path().to_path_buf());

        let rejection = gateway
            .handle(Some("Bearer unknown"), Bytes::from_static(PING))
            .await
            .unwrap_err();
        assert!(matches!(rejection.error, GatewayError::Unauthorized(_)));
        assert_eq!(rejection.rpc_code(), jsonrpc::INVALID_REQUEST);

        let rejection = gateway.handle(None, Bytes::from_static(PING)).await.unwrap_err();
        assert!(matches!(rejection.error, GatewayError::Unauthorized(_)));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_token_storage_failure_is_internal() {
        use crate::storage::sqlite::SqliteOAuthStorage;
        use sqlx::sqlite::SqlitePoolOptions;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = SqliteOAuthStorage::new(pool.clone());
        storage.migrate().await.unwrap();
        pool.close().await;

        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(Arc::new(storage), dir.path().to_path_buf());

        let rejection = gateway
            .handle(Some("Bearer sometoken"), Bytes::from_static(PING))
            .await
            .unwrap_err();
        assert!(matches!(rejection.error, GatewayError::Internal(_)));
        assert_eq!(rejection.rpc_code(), jsonrpc::INTERNAL_ERROR);
    }
}
