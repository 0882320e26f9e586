//! Application state shared by all handlers.

use axum::extract::FromRef;
use axum_template::engine::Engine;
use std::sync::Arc;

use crate::audit::AuditSink;
use crate::config::Config;
use crate::gateway::ProxyGateway;
use crate::oauth::{
    AuthorizationServer, ClientRegistrationService, ResourceOwnerAuthenticator, SessionStore,
    StaticUserAuthenticator, TokenLifetimes, TokenValidator,
};
use crate::storage::traits::OAuthStorage;
use crate::supervisor::ProcessSupervisor;

#[cfg(feature = "reload")]
use minijinja_autoreload::AutoReloader;

#[cfg(feature = "reload")]
/// Template engine with auto-reloading support for development.
pub type AppEngine = Engine<AutoReloader>;

#[cfg(not(feature = "reload"))]
pub type AppEngine = Engine<minijinja::Environment<'static>>;

#[derive(Clone)]
pub struct AppState {
    pub http_client: reqwest::Client,
    pub config: Arc<Config>,
    /// Template engine for rendering HTML responses.
    pub template_env: AppEngine,
    /// OAuth storage for tokens, clients, and codes
    pub oauth_storage: Arc<dyn OAuthStorage>,
    pub auth_server: Arc<AuthorizationServer>,
    /// Client registration service for dynamic client registration
    pub client_registration_service: Arc<ClientRegistrationService>,
    pub token_validator: Arc<TokenValidator>,
    /// Resource owner browser sessions
    pub sessions: SessionStore,
    pub authenticator: Arc<dyn ResourceOwnerAuthenticator>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub gateway: Arc<ProxyGateway>,
    pub audit: Arc<dyn AuditSink>,
}

impl AppState {
    /// Wire every service from configuration over the given storage.
    pub fn new(
        config: Arc<Config>,
        http_client: reqwest::Client,
        oauth_storage: Arc<dyn OAuthStorage>,
        template_env: AppEngine,
        supervisor: Arc<ProcessSupervisor>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let supported_scopes = config.oauth_supported_scopes.as_ref().clone();

        let auth_server = AuthorizationServer::new(
            oauth_storage.clone(),
            audit.clone(),
            supported_scopes.clone(),
        )
        .with_lifetimes(TokenLifetimes {
            authorization_code: *config.authorization_code_expiration.as_ref(),
            access_token: *config.access_token_expiration.as_ref(),
            refresh_token: *config.refresh_token_expiration.as_ref(),
        });

        let mut client_registration_service = ClientRegistrationService::new(
            oauth_storage.clone(),
            audit.clone(),
            supported_scopes,
            config.external_base.clone(),
        );
        if !*config.enable_client_registration.as_ref() {
            client_registration_service = client_registration_service.disable_registration();
        }

        let authenticator = StaticUserAuthenticator::new(config.resource_owners.as_ref().clone());
        if authenticator.is_empty() {
            tracing::warn!("no resource owners configured, interactive authorization is disabled");
        }

        let token_validator = Arc::new(TokenValidator::new(oauth_storage.clone()));
        let gateway = ProxyGateway::new(
            token_validator.clone(),
            supervisor.clone(),
            http_client.clone(),
            *config.backend_forward_timeout.as_ref(),
            audit.clone(),
        );

        Self {
            sessions: SessionStore::new(*config.session_expiration.as_ref()),
            http_client,
            config,
            template_env,
            oauth_storage,
            auth_server: Arc::new(auth_server),
            client_registration_service: Arc::new(client_registration_service),
            token_validator,
            authenticator: Arc::new(authenticator),
            supervisor,
            gateway: Arc::new(gateway),
            audit,
        }
    }
}

impl FromRef<AppState> for Arc<TokenValidator> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.token_validator.clone()
    }
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::audit::TracingAuditSink;
    use crate::storage::inmemory::MemoryOAuthStorage;
    use std::collections::HashMap;

    /// State over in-memory storage with a supervisor rooted in a temporary directory.
    ///
    /// `overrides` replace or extend the base environment.
    pub(crate) fn test_state(overrides: &[(&str, &str)]) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().display().to_string();

        let mut vars: HashMap<String, String> = [
            ("EXTERNAL_BASE", "https://gate.example"),
            ("RESOURCE_OWNERS", "alice:wonderland"),
            ("ADMIN_USERS", "alice"),
            ("BACKEND_PORT", "9"),
            ("BACKEND_PROBE_TIMEOUT", "200ms"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        vars.insert("BACKEND_STATE_DIR".to_string(), state_dir);
        for (k, v) in overrides {
            vars.insert(k.to_string(), v.to_string());
        }

        let config = Arc::new(Config::from_lookup(move |name| vars.get(name).cloned()).unwrap());
        let http_client = reqwest::Client::new();
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
        let supervisor = Arc::new(ProcessSupervisor::new(
            config.supervisor_settings(),
            http_client.clone(),
            audit.clone(),
        ));
        let template_env = Engine::new(crate::templates::build_env(
            config.http_templates_path.clone(),
            config.version.clone(),
        ));

        let state = AppState::new(
            config,
            http_client,
            Arc::new(MemoryOAuthStorage::new()),
            template_env,
            supervisor,
            audit,
        );
        (state, dir)
    }
}
