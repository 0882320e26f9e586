//! OAuth 2.0 Dynamic Client Registration (RFC 7591) and client configuration management (RFC 7592).
//!
//! Handles client registration requests, validation, and credential generation.

use crate::audit::{AuditEvent, AuditSink};
use crate::errors::{ClientRegistrationError, StorageError};
use crate::oauth::types::*;
use crate::storage::traits::OAuthStorage;
use chrono::Utc;
use std::sync::Arc;
use url::{Host, Url};

/// Maximum number of redirect URIs per client
const MAX_REDIRECT_URIS: usize = 10;

/// Keys a client may not smuggle in through free-form metadata.
const RESERVED_METADATA_KEYS: [&str; 6] = [
    "client_id",
    "client_secret",
    "registration_access_token",
    "registration_client_uri",
    "client_id_issued_at",
    "client_secret_expires_at",
];

/// Client Registration Service
pub struct ClientRegistrationService {
    storage: Arc<dyn OAuthStorage>,
    audit: Arc<dyn AuditSink>,
    /// Scopes a client may register for
    supported_scopes: Vec<String>,
    /// Base used to build `registration_client_uri`
    external_base: String,
    /// Whether client registration is enabled
    registration_enabled: bool,
}

/// Registration metadata after defaults and validation
struct ValidatedMetadata {
    client_name: Option<String>,
    redirect_uris: Vec<String>,
    grant_types: Vec<GrantType>,
    response_types: Vec<ResponseType>,
    scope: Option<String>,
    auth_method: ClientAuthMethod,
}

impl ClientRegistrationService {
    /// Create a new client registration service
    pub fn new(
        storage: Arc<dyn OAuthStorage>,
        audit: Arc<dyn AuditSink>,
        supported_scopes: Vec<String>,
        external_base: String,
    ) -> Self {
        Self {
            storage,
            audit,
            supported_scopes,
            external_base: external_base.trim_end_matches('/').to_string(),
            registration_enabled: true,
        }
    }

    /// Disable client registration
    pub fn disable_registration(mut self) -> Self {
        self.registration_enabled = false;
        self
    }

    pub fn registration_enabled(&self) -> bool {
        self.registration_enabled
    }

    /// Register a new OAuth client.
    ///
    /// The response carries the client secret and registration access token; this is the
    /// only time the secret is returned.
    pub async fn register(
        &self,
        request: ClientRegistrationRequest,
    ) -> Result<ClientRegistrationResponse, ClientRegistrationError> {
        if !self.registration_enabled {
            return Err(ClientRegistrationError::RegistrationDisabled);
        }

        let validated = self.validate_metadata(&request, None)?;

        let client_secret = validated
            .auth_method
            .is_confidential()
            .then(generate_token);
        let client_type = if client_secret.is_some() {
            ClientType::Confidential
        } else {
            ClientType::Public
        };

        let now = Utc::now();
        let client = OAuthClient {
            client_id: generate_client_id(),
            client_secret: client_secret.clone(),
            client_name: validated.client_name,
            redirect_uris: validated.redirect_uris,
            grant_types: validated.grant_types,
            response_types: validated.response_types,
            scope: validated.scope,
            token_endpoint_auth_method: validated.auth_method,
            client_type,
            registration_access_token: generate_token(),
            created_at: now,
            updated_at: now,
            metadata: serde_json::Value::Object(sanitize_metadata(request.metadata)),
        };

        self.storage
            .store_client(&client)
            .await
            .map_err(storage_error)?;

        tracing::info!(client_id = %client.client_id, client_type = client.client_type.as_str(), "client registered");
        self.audit.record(AuditEvent::ClientRegistered {
            client_id: client.client_id.clone(),
            client_type: client.client_type.as_str().to_string(),
        });

        Ok(self.to_response(client, client_secret))
    }

    /// Get client configuration. The secret is never included.
    pub async fn get(
        &self,
        client_id: &str,
        registration_access_token: &str,
    ) -> Result<ClientRegistrationResponse, ClientRegistrationError> {
        let client = self
            .authorize_management(client_id, registration_access_token)
            .await?;
        Ok(self.to_response(client, None))
    }

    /// Update client configuration. Only the provided fields change.
    ///
    /// Switching between a confidential method and `none` generates or drops the secret;
    /// a freshly generated secret is returned once in the response.
    pub async fn update(
        &self,
        client_id: &str,
        registration_access_token: &str,
        request: ClientRegistrationRequest,
    ) -> Result<ClientRegistrationResponse, ClientRegistrationError> {
        let mut client = self
            .authorize_management(client_id, registration_access_token)
            .await?;

        let validated = self.validate_metadata(&request, Some(&client))?;

        let mut new_secret = None;
        if validated.auth_method.is_confidential() {
            if client.client_secret.is_none() {
                let secret = generate_token();
                client.client_secret = Some(secret.clone());
                new_secret = Some(secret);
            }
            client.client_type = ClientType::Confidential;
        } else {
            client.client_secret = None;
            client.client_type = ClientType::Public;
        }

        client.client_name = validated.client_name;
        client.redirect_uris = validated.redirect_uris;
        client.grant_types = validated.grant_types;
        client.response_types = validated.response_types;
        client.scope = validated.scope;
        client.token_endpoint_auth_method = validated.auth_method;
        client.updated_at = Utc::now();

        let mut metadata = match client.metadata.take() {
            serde_json::Value::Object(existing) => existing,
            _ => serde_json::Map::new(),
        };
        metadata.extend(sanitize_metadata(request.metadata));
        client.metadata = serde_json::Value::Object(metadata);

        self.storage
            .update_client(&client)
            .await
            .map_err(storage_error)?;

        tracing::info!(client_id = %client.client_id, "client updated");
        self.audit.record(AuditEvent::ClientUpdated {
            client_id: client.client_id.clone(),
        });

        Ok(self.to_response(client, new_secret))
    }

    /// Delete client registration and revoke every token issued to it.
    pub async fn delete(
        &self,
        client_id: &str,
        registration_access_token: &str,
    ) -> Result<(), ClientRegistrationError> {
        let client = self
            .authorize_management(client_id, registration_access_token)
            .await?;

        let access_tokens = self
            .storage
            .revoke_client_tokens(&client.client_id)
            .await
            .map_err(storage_error)?;
        let refresh_tokens = self
            .storage
            .revoke_client_refresh_tokens(&client.client_id)
            .await
            .map_err(storage_error)?;
        self.storage
            .delete_client(&client.client_id)
            .await
            .map_err(storage_error)?;

        tracing::info!(
            client_id = %client.client_id,
            access_tokens,
            refresh_tokens,
            "client deleted"
        );
        self.audit.record(AuditEvent::ClientDeleted {
            client_id: client.client_id,
        });
        Ok(())
    }

    /// Check client credentials and, when given, that the client may use `grant_type`.
    pub async fn validate(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        grant_type: Option<&GrantType>,
    ) -> Result<bool, ClientRegistrationError> {
        let Some(client) = self
            .storage
            .get_client(client_id)
            .await
            .map_err(storage_error)?
        else {
            return Ok(false);
        };

        Ok(client_credentials_match(&client, client_secret)
            && grant_type.is_none_or(|grant| client.allows_grant(grant)))
    }

    async fn authorize_management(
        &self,
        client_id: &str,
        registration_access_token: &str,
    ) -> Result<OAuthClient, ClientRegistrationError> {
        let client = self
            .storage
            .get_client(client_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| ClientRegistrationError::ClientNotFound(client_id.to_string()))?;

        if !constant_time_eq(&client.registration_access_token, registration_access_token) {
            return Err(ClientRegistrationError::InvalidRegistrationToken(
                "registration access token does not match".to_string(),
            ));
        }
        Ok(client)
    }

    fn validate_metadata(
        &self,
        request: &ClientRegistrationRequest,
        existing: Option<&OAuthClient>,
    ) -> Result<ValidatedMetadata, ClientRegistrationError> {
        let grant_types = match &request.grant_types {
            Some(values) => {
                let mut grant_types = Vec::new();
                for value in values {
                    let grant = value.parse::<GrantType>().map_err(|v| {
                        ClientRegistrationError::InvalidClientMetadata(format!(
                            "unsupported grant_type '{}'",
                            v
                        ))
                    })?;
                    if !grant_types.contains(&grant) {
                        grant_types.push(grant);
                    }
                }
                grant_types
            }
            None => existing
                .map(|client| client.grant_types.clone())
                .unwrap_or_else(|| vec![GrantType::AuthorizationCode, GrantType::RefreshToken]),
        };
        if grant_types.is_empty() {
            return Err(ClientRegistrationError::InvalidClientMetadata(
                "grant_types must not be empty".to_string(),
            ));
        }

        let response_types = match &request.response_types {
            Some(values) => {
                let mut response_types = Vec::new();
                for value in values {
                    let response_type = value.parse::<ResponseType>().map_err(|v| {
                        ClientRegistrationError::InvalidClientMetadata(format!(
                            "unsupported response_type '{}'",
                            v
                        ))
                    })?;
                    if !response_types.contains(&response_type) {
                        response_types.push(response_type);
                    }
                }
                response_types
            }
            None => existing
                .map(|client| client.response_types.clone())
                .unwrap_or_else(|| vec![ResponseType::Code]),
        };
        if grant_types.contains(&GrantType::AuthorizationCode)
            && !response_types.contains(&ResponseType::Code)
        {
            return Err(ClientRegistrationError::InvalidClientMetadata(
                "authorization_code requires the 'code' response type".to_string(),
            ));
        }

        let auth_method = match &request.token_endpoint_auth_method {
            Some(value) => value.parse::<ClientAuthMethod>().map_err(|v| {
                ClientRegistrationError::InvalidClientMetadata(format!(
                    "unsupported token_endpoint_auth_method '{}'",
                    v
                ))
            })?,
            None => existing
                .map(|client| client.token_endpoint_auth_method.clone())
                .unwrap_or(ClientAuthMethod::ClientSecretBasic),
        };
        if grant_types.contains(&GrantType::ClientCredentials) && !auth_method.is_confidential() {
            return Err(ClientRegistrationError::InvalidClientMetadata(
                "client_credentials requires a confidential token_endpoint_auth_method"
                    .to_string(),
            ));
        }

        let redirect_uris = match &request.redirect_uris {
            Some(uris) => uris.clone(),
            None => existing
                .map(|client| client.redirect_uris.clone())
                .unwrap_or_default(),
        };
        if redirect_uris.len() > MAX_REDIRECT_URIS {
            return Err(ClientRegistrationError::InvalidRedirectUri(format!(
                "at most {} redirect URIs are allowed",
                MAX_REDIRECT_URIS
            )));
        }
        for uri in &redirect_uris {
            validate_redirect_uri(uri)?;
        }
        if grant_types.contains(&GrantType::AuthorizationCode) && redirect_uris.is_empty() {
            return Err(ClientRegistrationError::InvalidRedirectUri(
                "redirect_uris are required for the authorization_code grant".to_string(),
            ));
        }

        let scope = match &request.scope {
            Some(scope) => Some(scope.clone()),
            None => existing.and_then(|client| client.scope.clone()),
        }
        .filter(|scope| !scope.trim().is_empty());
        if let Some(scope) = &scope {
            if !validate_scope(scope) {
                return Err(ClientRegistrationError::InvalidClientMetadata(
                    "scope contains invalid characters".to_string(),
                ));
            }
            if let Some(unsupported) = scope
                .split_whitespace()
                .find(|s| !self.supported_scopes.iter().any(|supported| supported == s))
            {
                return Err(ClientRegistrationError::InvalidClientMetadata(format!(
                    "unsupported scope '{}'",
                    unsupported
                )));
            }
        }

        let client_name = match &request.client_name {
            Some(name) => Some(name.clone()),
            None => existing.and_then(|client| client.client_name.clone()),
        };

        Ok(ValidatedMetadata {
            client_name,
            redirect_uris,
            grant_types,
            response_types,
            scope,
            auth_method,
        })
    }

    fn to_response(
        &self,
        client: OAuthClient,
        client_secret: Option<String>,
    ) -> ClientRegistrationResponse {
        let metadata = match client.metadata {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        let client_secret_expires_at = client_secret.as_ref().map(|_| 0);

        ClientRegistrationResponse {
            registration_client_uri: format!(
                "{}/oauth2/register/{}",
                self.external_base, client.client_id
            ),
            client_id: client.client_id,
            client_secret,
            client_name: client.client_name,
            redirect_uris: client.redirect_uris,
            grant_types: client.grant_types,
            response_types: client.response_types,
            scope: client.scope,
            token_endpoint_auth_method: client.token_endpoint_auth_method,
            registration_access_token: client.registration_access_token,
            client_id_issued_at: client.created_at.timestamp(),
            client_secret_expires_at,
            metadata,
        }
    }
}

/// Confidential clients must present their exact secret; public clients must present none.
pub fn client_credentials_match(client: &OAuthClient, client_secret: Option<&str>) -> bool {
    match (&client.client_secret, client_secret) {
        (Some(expected), Some(presented)) => {
            client.token_endpoint_auth_method.is_confidential()
                && constant_time_eq(expected, presented)
        }
        (None, None) => !client.token_endpoint_auth_method.is_confidential(),
        _ => false,
    }
}

/// Redirect URIs are absolute, carry no fragment, and use `http` only for loopback hosts.
pub fn validate_redirect_uri(uri: &str) -> Result<(), ClientRegistrationError> {
    let url = Url::parse(uri).map_err(|e| {
        ClientRegistrationError::InvalidRedirectUri(format!("'{}' is not an absolute URI: {}", uri, e))
    })?;

    if url.fragment().is_some() {
        return Err(ClientRegistrationError::InvalidRedirectUri(format!(
            "'{}' must not contain a fragment",
            uri
        )));
    }

    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&url) => Ok(()),
        "http" => Err(ClientRegistrationError::InvalidRedirectUri(format!(
            "'{}' uses http for a non-loopback host",
            uri
        ))),
        "javascript" | "data" | "file" | "vbscript" => Err(
            ClientRegistrationError::InvalidRedirectUri(format!(
                "'{}' uses a forbidden scheme",
                uri
            )),
        ),
        // Private-use schemes for native apps (RFC 8252 section 7.1)
        _ => Ok(()),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn sanitize_metadata(
    mut metadata: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    metadata.retain(|key, _| !RESERVED_METADATA_KEYS.contains(&key.as_str()));
    metadata
}

fn storage_error(err: StorageError) -> ClientRegistrationError {
    ClientRegistrationError::Storage(err.to_string())
}
