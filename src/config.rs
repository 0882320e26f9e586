//! Environment-based configuration types for toolgate server runtime settings.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::supervisor::{BackendConfig, SupervisorSettings};

/// HTTP port configuration
#[derive(Clone, Debug)]
pub struct HttpPort(u16);

/// Timeout or interval configuration parsed from strings like "10s" or "250ms"
#[derive(Clone, Debug)]
pub struct ConfigDuration(Duration);

/// Lifetime of issued codes, tokens and sessions
#[derive(Clone, Debug)]
pub struct TokenExpiration(chrono::Duration);

/// On/off switch
#[derive(Clone, Debug)]
pub struct Toggle(bool);

/// OAuth supported scopes configuration
#[derive(Clone, Debug)]
pub struct OAuthSupportedScopes(Vec<String>);

/// Static resource owner directory, `user:password` pairs
#[derive(Clone, Default)]
pub struct ResourceOwners(Vec<(String, String)>);

/// Users allowed to call the process administration API
#[derive(Clone, Debug, Default)]
pub struct AdminUsers(Vec<String>);

/// Origins allowed by CORS; empty means any origin
#[derive(Clone, Debug, Default)]
pub struct CorsAllowedOrigins(Vec<String>);

/// Path the proxy gateway is mounted on
#[derive(Clone, Debug)]
pub struct GatewayPath(String);

/// Program and arguments used to launch the backend
#[derive(Clone, Debug, Default)]
pub struct BackendCommand(Option<Vec<String>>);

/// Main application configuration
#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub http_host: String,
    pub http_port: HttpPort,
    pub http_templates_path: String,
    pub external_base: String,
    pub user_agent: String,
    pub http_client_timeout: ConfigDuration,
    pub storage_backend: String,
    pub database_url: Option<String>,
    pub oauth_supported_scopes: OAuthSupportedScopes,
    pub enable_client_registration: Toggle,
    pub access_token_expiration: TokenExpiration,
    pub refresh_token_expiration: TokenExpiration,
    pub authorization_code_expiration: TokenExpiration,
    pub session_expiration: TokenExpiration,
    pub resource_owners: ResourceOwners,
    pub admin_users: AdminUsers,
    pub gateway_path: GatewayPath,
    pub cors_allowed_origins: CorsAllowedOrigins,
    pub backend_command: BackendCommand,
    pub backend_working_dir: Option<PathBuf>,
    pub backend_state_dir: PathBuf,
    pub backend_host: String,
    pub backend_port: HttpPort,
    pub backend_path: String,
    pub backend_log_level: String,
    pub backend_auto_start: Toggle,
    pub backend_start_timeout: ConfigDuration,
    pub backend_poll_interval: ConfigDuration,
    pub backend_stop_grace: ConfigDuration,
    pub backend_probe_timeout: ConfigDuration,
    pub backend_forward_timeout: ConfigDuration,
    pub cleanup_interval: ConfigDuration,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource(&lookup);

        let default_user_agent = format!("toolgate/{}", version()?);
        let external_base = env
            .require("EXTERNAL_BASE")?
            .trim_end_matches('/')
            .to_string();
        let http_host = env.default("HTTP_HOST", "0.0.0.0");
        let http_port: HttpPort = env.default("HTTP_PORT", "8080").try_into()?;
        let http_templates_path = env
            .optional("HTTP_TEMPLATES_PATH")
            .unwrap_or_else(|| format!("{}/templates", env!("CARGO_MANIFEST_DIR")));
        let user_agent = env.default("USER_AGENT", &default_user_agent);
        let http_client_timeout: ConfigDuration =
            env.default("HTTP_CLIENT_TIMEOUT", "10s").try_into()?;
        let storage_backend = env.default("STORAGE_BACKEND", "memory");
        let database_url = env.optional("DATABASE_URL");
        let oauth_supported_scopes: OAuthSupportedScopes =
            env.default("OAUTH_SUPPORTED_SCOPES", "tools").try_into()?;
        let enable_client_registration: Toggle =
            env.default("ENABLE_CLIENT_REGISTRATION", "true").try_into()?;
        let access_token_expiration: TokenExpiration =
            env.default("ACCESS_TOKEN_EXPIRATION", "1h").try_into()?;
        let refresh_token_expiration: TokenExpiration =
            env.default("REFRESH_TOKEN_EXPIRATION", "30d").try_into()?;
        let authorization_code_expiration: TokenExpiration =
            env.default("AUTHORIZATION_CODE_EXPIRATION", "10m").try_into()?;
        let session_expiration: TokenExpiration =
            env.default("SESSION_EXPIRATION", "12h").try_into()?;
        let resource_owners: ResourceOwners = env.optional("RESOURCE_OWNERS").try_into()?;
        let admin_users: AdminUsers = env.optional("ADMIN_USERS").try_into()?;
        let gateway_path: GatewayPath = env.default("GATEWAY_PATH", "/mcp").try_into()?;
        let cors_allowed_origins: CorsAllowedOrigins =
            env.optional("CORS_ALLOWED_ORIGINS").try_into()?;
        let backend_command: BackendCommand = env.optional("BACKEND_COMMAND").try_into()?;
        let backend_working_dir = env
            .optional("BACKEND_WORKING_DIR")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let backend_state_dir = PathBuf::from(env.default("BACKEND_STATE_DIR", "./var"));
        let backend_host = env.default("BACKEND_HOST", "127.0.0.1");
        let backend_port: HttpPort = env.default("BACKEND_PORT", "9000").try_into()?;
        let backend_path = env.default("BACKEND_PATH", "/");
        let backend_log_level = env.default("BACKEND_LOG_LEVEL", "info");
        let backend_auto_start: Toggle = env.default("BACKEND_AUTO_START", "false").try_into()?;
        let backend_start_timeout: ConfigDuration =
            env.default("BACKEND_START_TIMEOUT", "10s").try_into()?;
        let backend_poll_interval: ConfigDuration =
            env.default("BACKEND_POLL_INTERVAL", "250ms").try_into()?;
        let backend_stop_grace: ConfigDuration =
            env.default("BACKEND_STOP_GRACE", "5s").try_into()?;
        let backend_probe_timeout: ConfigDuration =
            env.default("BACKEND_PROBE_TIMEOUT", "2s").try_into()?;
        let backend_forward_timeout: ConfigDuration =
            env.default("BACKEND_FORWARD_TIMEOUT", "10s").try_into()?;
        let cleanup_interval: ConfigDuration = env.default("CLEANUP_INTERVAL", "5m").try_into()?;

        Ok(Self {
            version: version()?,
            http_host,
            http_port,
            http_templates_path,
            external_base,
            user_agent,
            http_client_timeout,
            storage_backend,
            database_url,
            oauth_supported_scopes,
            enable_client_registration,
            access_token_expiration,
            refresh_token_expiration,
            authorization_code_expiration,
            session_expiration,
            resource_owners,
            admin_users,
            gateway_path,
            cors_allowed_origins,
            backend_command,
            backend_working_dir,
            backend_state_dir,
            backend_host,
            backend_port,
            backend_path,
            backend_log_level,
            backend_auto_start,
            backend_start_timeout,
            backend_poll_interval,
            backend_stop_grace,
            backend_probe_timeout,
            backend_forward_timeout,
            cleanup_interval,
        })
    }

    /// Public URL of the proxy gateway.
    pub fn gateway_url(&self) -> String {
        format!("{}{}", self.external_base, self.gateway_path.as_ref())
    }

    /// Settings handed to the process supervisor.
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            command: self.backend_command.as_ref().clone(),
            working_dir: self.backend_working_dir.clone(),
            state_dir: self.backend_state_dir.clone(),
            defaults: BackendConfig {
                host: self.backend_host.clone(),
                port: *self.backend_port.as_ref(),
                auto_start: *self.backend_auto_start.as_ref(),
                log_level: self.backend_log_level.clone(),
            },
            backend_path: self.backend_path.clone(),
            start_timeout: *self.backend_start_timeout.as_ref(),
            poll_interval: *self.backend_poll_interval.as_ref(),
            stop_grace: *self.backend_stop_grace.as_ref(),
            probe_timeout: *self.backend_probe_timeout.as_ref(),
        }
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

struct EnvSource<'a>(&'a dyn Fn(&str) -> Option<String>);

impl EnvSource<'_> {
    fn require(&self, name: &str) -> Result<String> {
        (self.0)(name)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::EnvVarRequired(name.to_string()).into())
    }

    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
    }

    fn default(&self, name: &str, default_value: &str) -> String {
        (self.0)(name).unwrap_or_else(|| default_value.to_string())
    }
}

impl TryFrom<String> for HttpPort {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .trim()
            .parse::<u16>()
            .map(Self)
            .map_err(|err| ConfigError::PortParsingFailed(err).into())
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<String> for ConfigDuration {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
        Ok(Self(duration))
    }
}

impl AsRef<Duration> for ConfigDuration {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<String> for TokenExpiration {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
        Ok(Self(chrono::Duration::from_std(duration)?))
    }
}

impl AsRef<chrono::Duration> for TokenExpiration {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for Toggle {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Self(true)),
            "false" | "0" | "no" | "off" => Ok(Self(false)),
            _ => Err(ConfigError::BoolParsingFailed(value).into()),
        }
    }
}

impl AsRef<bool> for Toggle {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

impl TryFrom<String> for OAuthSupportedScopes {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let mut scopes: Vec<String> = Vec::new();
        for scope in value.split_whitespace() {
            if scope
                .chars()
                .any(|c| c == '"' || c == '\\' || !c.is_ascii_graphic())
            {
                return Err(ConfigError::InvalidScope(format!(
                    "scope '{}' contains characters outside the RFC 6749 scope-token set",
                    scope
                ))
                .into());
            }
            if !scopes.iter().any(|existing| existing == scope) {
                scopes.push(scope.to_string());
            }
        }

        if scopes.is_empty() {
            return Err(ConfigError::InvalidScope("at least one scope is required".to_string()).into());
        }

        Ok(Self(scopes))
    }
}

impl AsRef<Vec<String>> for OAuthSupportedScopes {
    fn as_ref(&self) -> &Vec<String> {
        &self.0
    }
}

impl TryFrom<Option<String>> for ResourceOwners {
    type Error = anyhow::Error;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        let value = value.unwrap_or_default();
        let mut owners = Vec::new();
        for entry in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match entry.split_once(':') {
                Some((user, password)) if !user.is_empty() && !password.is_empty() => {
                    owners.push((user.to_string(), password.to_string()));
                }
                _ => {
                    // Never echo the password back into logs.
                    let user = entry.split(':').next().unwrap_or_default();
                    return Err(ConfigError::InvalidResourceOwner(user.to_string()).into());
                }
            }
        }
        Ok(Self(owners))
    }
}

impl AsRef<Vec<(String, String)>> for ResourceOwners {
    fn as_ref(&self) -> &Vec<(String, String)> {
        &self.0
    }
}

impl std::fmt::Debug for ResourceOwners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|(user, _)| user))
            .finish()
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl TryFrom<Option<String>> for AdminUsers {
    type Error = anyhow::Error;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        Ok(Self(split_list(value)))
    }
}

impl AsRef<Vec<String>> for AdminUsers {
    fn as_ref(&self) -> &Vec<String> {
        &self.0
    }
}

impl AdminUsers {
    pub fn contains(&self, user_id: &str) -> bool {
        self.0.iter().any(|admin| admin == user_id)
    }
}

impl TryFrom<Option<String>> for CorsAllowedOrigins {
    type Error = anyhow::Error;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        Ok(Self(split_list(value)))
    }
}

impl AsRef<Vec<String>> for CorsAllowedOrigins {
    fn as_ref(&self) -> &Vec<String> {
        &self.0
    }
}

impl TryFrom<String> for GatewayPath {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if !trimmed.starts_with('/') || trimmed.len() < 2 {
            return Err(ConfigError::InvalidGatewayPath(value).into());
        }
        Ok(Self(trimmed.trim_end_matches('/').to_string()))
    }
}

impl AsRef<String> for GatewayPath {
    fn as_ref(&self) -> &String {
        &self.0
    }
}

impl TryFrom<Option<String>> for BackendCommand {
    type Error = anyhow::Error;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        let Some(value) = value else {
            return Ok(Self(None));
        };
        if value.trim().is_empty() {
            return Ok(Self(None));
        }
        if value.contains('"') || value.contains('\'') {
            return Err(ConfigError::InvalidBackendCommand(
                "quoting is not supported; use {host}, {port} and {log_level} placeholders"
                    .to_string(),
            )
            .into());
        }
        Ok(Self(Some(
            value.split_whitespace().map(str::to_string).collect(),
        )))
    }
}

impl AsRef<Option<Vec<String>>> for BackendCommand {
    fn as_ref(&self) -> &Option<Vec<String>> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("EXTERNAL_BASE", "https://gate.example/")]))
            .unwrap();

        assert_eq!(config.external_base, "https://gate.example");
        assert_eq!(*config.http_port.as_ref(), 8080);
        assert_eq!(config.oauth_supported_scopes.as_ref(), &vec!["tools".to_string()]);
        assert!(*config.enable_client_registration.as_ref());
        assert_eq!(
            *config.access_token_expiration.as_ref(),
            chrono::Duration::hours(1)
        );
        assert_eq!(
            *config.refresh_token_expiration.as_ref(),
            chrono::Duration::days(30)
        );
        assert_eq!(
            *config.backend_poll_interval.as_ref(),
            Duration::from_millis(250)
        );
        assert_eq!(config.gateway_url(), "https://gate.example/mcp");
        assert!(config.backend_command.as_ref().is_none());
        assert!(!*config.backend_auto_start.as_ref());
    }

    #[test]
    fn test_external_base_required() {
        let result = Config::from_lookup(lookup(&[]));
        assert!(result.is_err());
        assert!(
            result
                .err()
                .map(|e| e.to_string())
                .unwrap_or_default()
                .contains("EXTERNAL_BASE")
        );
    }

    #[test]
    fn test_resource_owners() {
        let owners = ResourceOwners::try_from(Some("alice:wonder, bob:builder".to_string())).unwrap();
        assert_eq!(owners.as_ref().len(), 2);
        assert_eq!(owners.as_ref()[1], ("bob".to_string(), "builder".to_string()));

        let err = ResourceOwners::try_from(Some("carol".to_string())).err().unwrap();
        assert!(err.to_string().contains("carol"));

        assert!(ResourceOwners::try_from(None).unwrap().as_ref().is_empty());
    }

    #[test]
    fn test_toggle_parsing() {
        assert!(*Toggle::try_from("Yes".to_string()).unwrap().as_ref());
        assert!(!*Toggle::try_from("off".to_string()).unwrap().as_ref());
        assert!(Toggle::try_from("maybe".to_string()).is_err());
    }

    #[test]
    fn test_gateway_path() {
        assert_eq!(
            GatewayPath::try_from("/rpc/".to_string()).unwrap().as_ref(),
            "/rpc"
        );
        assert!(GatewayPath::try_from("mcp".to_string()).is_err());
        assert!(GatewayPath::try_from("/".to_string()).is_err());
    }

    #[test]
    fn test_backend_command() {
        let command =
            BackendCommand::try_from(Some("tool-server --port {port}".to_string())).unwrap();
        assert_eq!(
            command.as_ref().as_deref(),
            Some(
                &[
                    "tool-server".to_string(),
                    "--port".to_string(),
                    "{port}".to_string()
                ][..]
            )
        );
        assert!(BackendCommand::try_from(Some("  ".to_string())).unwrap().as_ref().is_none());
        assert!(BackendCommand::try_from(Some("sh -c 'x'".to_string())).is_err());
    }

    #[test]
    fn test_supported_scopes() {
        let scopes = OAuthSupportedScopes::try_from("tools  admin tools".to_string()).unwrap();
        assert_eq!(scopes.as_ref(), &vec!["tools".to_string(), "admin".to_string()]);
        assert!(OAuthSupportedScopes::try_from("   ".to_string()).is_err());
    }

    #[test]
    fn test_invalid_duration() {
        let result = Config::from_lookup(lookup(&[
            ("EXTERNAL_BASE", "https://gate.example"),
            ("BACKEND_START_TIMEOUT", "soon"),
        ]));
        assert!(result.is_err());
    }
}
