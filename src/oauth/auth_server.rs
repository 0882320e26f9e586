//! Core OAuth 2.1 authorization server handling consent, code exchange, refresh rotation and revocation.

use crate::audit::{AuditEvent, AuditSink};
use crate::errors::{OAuthError, StorageError};
use crate::oauth::clients::client_credentials_match;
use crate::oauth::pkce;
use crate::oauth::types::*;
use crate::storage::traits::OAuthStorage;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use base64::prelude::*;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

/// Lifetimes applied to issued credentials
#[derive(Clone, Debug)]
pub struct TokenLifetimes {
    /// Authorization codes and pending consent requests
    pub authorization_code: Duration,
    pub access_token: Duration,
    pub refresh_token: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            authorization_code: Duration::minutes(10),
            access_token: Duration::hours(1),
            refresh_token: Duration::days(30),
        }
    }
}

/// A validated authorization request waiting for the resource owner's decision.
#[derive(Debug, Clone)]
pub struct ConsentPrompt {
    pub pending: PendingAuthorization,
    pub client: OAuthClient,
}

/// OAuth 2.1 Authorization Server
pub struct AuthorizationServer {
    pub storage: Arc<dyn OAuthStorage>,
    audit: Arc<dyn AuditSink>,
    /// Scopes granted to clients that registered without a scope
    supported_scopes: Vec<String>,
    lifetimes: TokenLifetimes,
}

impl AuthorizationServer {
    /// Create a new authorization server
    pub fn new(
        storage: Arc<dyn OAuthStorage>,
        audit: Arc<dyn AuditSink>,
        supported_scopes: Vec<String>,
    ) -> Self {
        Self {
            storage,
            audit,
            supported_scopes,
            lifetimes: TokenLifetimes::default(),
        }
    }

    pub fn with_lifetimes(mut self, lifetimes: TokenLifetimes) -> Self {
        self.lifetimes = lifetimes;
        self
    }

    pub fn supported_scopes(&self) -> &[String] {
        &self.supported_scopes
    }

    /// Validate an authorization request (RFC 6749 Section 4.1.1) and park it until the
    /// resource owner approves or denies it.
    ///
    /// Client and redirect URI are checked first. Errors other than `InvalidClient` and
    /// `InvalidRedirectUri` may therefore be reported back to the redirect URI.
    pub async fn begin_authorization(
        &self,
        request: AuthorizationRequest,
        user_id: &str,
    ) -> Result<ConsentPrompt, OAuthError> {
        let client = self
            .storage
            .get_client(&request.client_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| {
                OAuthError::InvalidClient(format!("unknown client '{}'", request.client_id))
            })?;

        if !client
            .redirect_uris
            .iter()
            .any(|uri| uri == &request.redirect_uri)
        {
            return Err(OAuthError::InvalidRedirectUri(format!(
                "'{}' is not registered for this client",
                request.redirect_uri
            )));
        }

        match request.response_type.as_str() {
            "code" => {}
            "" => {
                return Err(OAuthError::InvalidRequest(
                    "response_type is required".to_string(),
                ));
            }
            other => return Err(OAuthError::UnsupportedResponseType(other.to_string())),
        }

        if !client.allows_grant(&GrantType::AuthorizationCode) {
            return Err(OAuthError::UnauthorizedClient(
                "client may not use the authorization_code grant".to_string(),
            ));
        }

        let scope = self.resolve_scope(&client, request.scope.as_deref())?;
        check_pkce_request(&client, &request)?;

        let now = Utc::now();
        let pending = PendingAuthorization {
            request_id: generate_token(),
            request,
            scope,
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + self.lifetimes.authorization_code,
        };
        self.storage
            .store_pending(&pending)
            .await
            .map_err(storage_error)?;

        tracing::debug!(client_id = %client.client_id, user_id, "authorization awaiting consent");
        Ok(ConsentPrompt { pending, client })
    }

    /// Approve a pending request and return the redirect carrying the authorization code.
    pub async fn approve(&self, request_id: &str, user_id: &str) -> Result<String, OAuthError> {
        let pending = self.take_pending(request_id, user_id).await?;

        let now = Utc::now();
        let code = AuthorizationCode {
            code: generate_token(),
            client_id: pending.request.client_id.clone(),
            user_id: pending.user_id.clone(),
            redirect_uri: pending.request.redirect_uri.clone(),
            scope: pending.scope.clone(),
            code_challenge: pending.request.code_challenge.clone(),
            code_challenge_method: pending.request.code_challenge_method.clone(),
            created_at: now,
            expires_at: now + self.lifetimes.authorization_code,
            revoked: false,
        };
        self.storage.store_code(&code).await.map_err(storage_error)?;

        self.audit.record(AuditEvent::AuthorizationCodeIssued {
            client_id: code.client_id.clone(),
            user_id: code.user_id.clone(),
            scope: code.scope.clone(),
        });

        authorization_redirect(
            &pending.request.redirect_uri,
            &[("code", code.code.as_str())],
            pending.request.state.as_deref(),
        )
    }

    /// Deny a pending request and return the redirect carrying `error=access_denied`.
    pub async fn deny(&self, request_id: &str, user_id: &str) -> Result<String, OAuthError> {
        let pending = self.take_pending(request_id, user_id).await?;

        self.audit.record(AuditEvent::AuthorizationDenied {
            client_id: pending.request.client_id.clone(),
            user_id: pending.user_id.clone(),
        });

        error_redirect(
            &pending.request.redirect_uri,
            &OAuthError::AccessDenied("the resource owner denied the request".to_string()),
            pending.request.state.as_deref(),
        )
    }

    async fn take_pending(
        &self,
        request_id: &str,
        user_id: &str,
    ) -> Result<PendingAuthorization, OAuthError> {
        let pending = self
            .storage
            .consume_pending(request_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| {
                OAuthError::InvalidRequest(
                    "authorization request is unknown or was already answered".to_string(),
                )
            })?;

        if pending.user_id != user_id {
            tracing::warn!(request_id, user_id, "authorization request answered by another user");
            return Err(OAuthError::AccessDenied(
                "authorization request belongs to another user".to_string(),
            ));
        }
        if pending.expires_at <= Utc::now() {
            return Err(OAuthError::InvalidRequest(
                "authorization request expired".to_string(),
            ));
        }
        Ok(pending)
    }

    /// Handle token requests (RFC 6749 Section 4.1.3)
    pub async fn token(
        &self,
        request: TokenRequest,
        client_auth: Option<ClientAuthentication>,
    ) -> Result<TokenResponse, OAuthError> {
        match request.grant_type {
            GrantType::AuthorizationCode => self.exchange_code(request, client_auth).await,
            GrantType::ClientCredentials => {
                self.client_credentials_grant(request, client_auth).await
            }
            GrantType::RefreshToken => self.refresh(request, client_auth).await,
        }
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        request: TokenRequest,
        client_auth: Option<ClientAuthentication>,
    ) -> Result<TokenResponse, OAuthError> {
        let code = request
            .code
            .ok_or_else(|| OAuthError::InvalidRequest("code is required".to_string()))?;
        let redirect_uri = request
            .redirect_uri
            .ok_or_else(|| OAuthError::InvalidRequest("redirect_uri is required".to_string()))?;
        let client_auth = client_auth
            .ok_or_else(|| OAuthError::InvalidClient("client_id is required".to_string()))?;

        let auth_code = self
            .storage
            .consume_code(&code)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| {
                OAuthError::InvalidGrant(
                    "authorization code is invalid or was already used".to_string(),
                )
            })?;

        if auth_code.expires_at <= Utc::now() {
            return Err(OAuthError::InvalidGrant(
                "authorization code expired".to_string(),
            ));
        }
        if auth_code.client_id != client_auth.client_id {
            return Err(OAuthError::InvalidGrant(
                "authorization code was issued to another client".to_string(),
            ));
        }
        if auth_code.redirect_uri != redirect_uri {
            return Err(OAuthError::InvalidGrant(
                "redirect_uri does not match the authorization request".to_string(),
            ));
        }

        let client = self.authenticate_client(&client_auth).await?;

        match (&auth_code.code_challenge, &request.code_verifier) {
            (Some(challenge), Some(verifier)) => {
                if !pkce::verify_pkce(
                    verifier,
                    challenge,
                    auth_code.code_challenge_method.as_deref(),
                ) {
                    return Err(OAuthError::InvalidGrant(
                        "PKCE verification failed".to_string(),
                    ));
                }
            }
            (Some(_), None) => {
                return Err(OAuthError::InvalidGrant(
                    "code_verifier is required".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(OAuthError::InvalidGrant(
                    "code_verifier sent for a code issued without code_challenge".to_string(),
                ));
            }
            (None, None) => {}
        }

        let with_refresh = client.allows_grant(&GrantType::RefreshToken);
        let response = self
            .issue_tokens(
                &client.client_id,
                Some(auth_code.user_id.clone()),
                auth_code.scope.clone(),
                with_refresh,
            )
            .await?;

        self.audit.record(AuditEvent::TokenIssued {
            client_id: client.client_id,
            user_id: Some(auth_code.user_id),
            grant_type: GrantType::AuthorizationCode.to_string(),
            scope: response.scope.clone(),
        });
        Ok(response)
    }

    /// Issue an access token to a confidential client acting on its own behalf.
    pub async fn client_credentials_grant(
        &self,
        request: TokenRequest,
        client_auth: Option<ClientAuthentication>,
    ) -> Result<TokenResponse, OAuthError> {
        let client_auth = client_auth.ok_or_else(|| {
            OAuthError::InvalidClient("client authentication is required".to_string())
        })?;
        let client = self.authenticate_client(&client_auth).await?;

        if client.client_type != ClientType::Confidential {
            return Err(OAuthError::UnauthorizedClient(
                "client_credentials requires a confidential client".to_string(),
            ));
        }
        if !client.allows_grant(&GrantType::ClientCredentials) {
            return Err(OAuthError::UnauthorizedClient(
                "client may not use the client_credentials grant".to_string(),
            ));
        }

        let scope = self.resolve_scope(&client, request.scope.as_deref())?;
        let response = self
            .issue_tokens(&client.client_id, None, scope, false)
            .await?;

        self.audit.record(AuditEvent::TokenIssued {
            client_id: client.client_id,
            user_id: None,
            grant_type: GrantType::ClientCredentials.to_string(),
            scope: response.scope.clone(),
        });
        Ok(response)
    }

    /// Rotate a refresh token: the presented token is consumed and a new pair is issued.
    pub async fn refresh(
        &self,
        request: TokenRequest,
        client_auth: Option<ClientAuthentication>,
    ) -> Result<TokenResponse, OAuthError> {
        let token = request
            .refresh_token
            .ok_or_else(|| OAuthError::InvalidRequest("refresh_token is required".to_string()))?;
        let client_auth = client_auth
            .ok_or_else(|| OAuthError::InvalidClient("client_id is required".to_string()))?;

        let current = self
            .storage
            .get_refresh_token(&token)
            .await
            .map_err(storage_error)?
            .filter(|refresh| refresh.is_active(Utc::now()))
            .ok_or_else(|| {
                OAuthError::InvalidGrant("refresh token is invalid, expired or revoked".to_string())
            })?;

        if current.client_id != client_auth.client_id {
            return Err(OAuthError::InvalidGrant(
                "refresh token was issued to another client".to_string(),
            ));
        }

        let client = self.authenticate_client(&client_auth).await?;
        if !client.allows_grant(&GrantType::RefreshToken) {
            return Err(OAuthError::UnauthorizedClient(
                "client may not use the refresh_token grant".to_string(),
            ));
        }

        let scope = match request
            .scope
            .as_deref()
            .map(parse_scope)
            .filter(|requested| !requested.is_empty())
        {
            Some(requested) => {
                let granted = current
                    .scope
                    .as_deref()
                    .map(parse_scope)
                    .unwrap_or_default();
                if let Some(extra) = requested.iter().find(|s| !granted.contains(*s)) {
                    return Err(OAuthError::InvalidScope(format!(
                        "scope '{}' was not part of the original grant",
                        extra
                    )));
                }
                Some(join_scopes(&requested))
            }
            None => current.scope.clone(),
        };

        // The check above may race with another refresh; only one consume wins.
        let consumed = self
            .storage
            .consume_refresh_token(&token)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| OAuthError::InvalidGrant("refresh token was already used".to_string()))?;

        let response = self
            .issue_tokens(&client.client_id, consumed.user_id.clone(), scope, true)
            .await?;

        self.audit.record(AuditEvent::TokenRefreshed {
            client_id: client.client_id,
            user_id: consumed.user_id,
        });
        Ok(response)
    }

    /// Revoke an access or refresh token owned by the authenticated client (RFC 7009).
    ///
    /// Unknown tokens and tokens of other clients are ignored.
    pub async fn revoke(
        &self,
        token: &str,
        client_auth: Option<ClientAuthentication>,
    ) -> Result<(), OAuthError> {
        let client_auth = client_auth.ok_or_else(|| {
            OAuthError::InvalidClient("client authentication is required".to_string())
        })?;
        let client = self.authenticate_client(&client_auth).await?;

        if let Some(access) = self.storage.get_token(token).await.map_err(storage_error)? {
            if access.client_id != client.client_id {
                tracing::warn!(client_id = %client.client_id, "revocation of a foreign access token ignored");
                return Ok(());
            }
            self.storage
                .revoke_token(token)
                .await
                .map_err(storage_error)?;
            self.audit.record(AuditEvent::TokenRevoked {
                client_id: Some(client.client_id),
            });
            return Ok(());
        }

        if let Some(refresh) = self
            .storage
            .get_refresh_token(token)
            .await
            .map_err(storage_error)?
        {
            if refresh.client_id != client.client_id {
                tracing::warn!(client_id = %client.client_id, "revocation of a foreign refresh token ignored");
                return Ok(());
            }
            self.storage
                .revoke_refresh_token(token)
                .await
                .map_err(storage_error)?;
            self.storage
                .revoke_token(&refresh.access_token)
                .await
                .map_err(storage_error)?;
            self.audit.record(AuditEvent::TokenRevoked {
                client_id: Some(client.client_id),
            });
        }

        Ok(())
    }

    /// Delete expired codes, pending requests and tokens. Returns the number of removed records.
    pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
        let removed = self.storage.cleanup_expired_pending().await?
            + self.storage.cleanup_expired_codes().await?
            + self.storage.cleanup_expired_tokens().await?
            + self.storage.cleanup_expired_refresh_tokens().await?;
        Ok(removed)
    }

    async fn issue_tokens(
        &self,
        client_id: &str,
        user_id: Option<String>,
        scope: Option<String>,
        with_refresh: bool,
    ) -> Result<TokenResponse, OAuthError> {
        let now = Utc::now();
        let access_token = AccessToken {
            token: generate_token(),
            token_type: TokenType::Bearer,
            client_id: client_id.to_string(),
            user_id: user_id.clone(),
            scope: scope.clone(),
            created_at: now,
            expires_at: now + self.lifetimes.access_token,
            revoked: false,
        };
        self.storage
            .store_token(&access_token)
            .await
            .map_err(storage_error)?;

        let refresh_token = if with_refresh {
            let refresh_token = RefreshToken {
                token: generate_token(),
                access_token: access_token.token.clone(),
                client_id: client_id.to_string(),
                user_id,
                scope: scope.clone(),
                created_at: now,
                expires_at: now + self.lifetimes.refresh_token,
                revoked: false,
            };
            self.storage
                .store_refresh_token(&refresh_token)
                .await
                .map_err(storage_error)?;
            Some(refresh_token.token)
        } else {
            None
        };

        Ok(TokenResponse {
            access_token: access_token.token,
            token_type: TokenType::Bearer,
            expires_in: self.lifetimes.access_token.num_seconds().max(0) as u64,
            refresh_token,
            scope,
        })
    }

    /// Requested scope must be covered by the client's registered scope, or by the server's
    /// supported scopes when the client registered none. No request means the full allowance.
    fn resolve_scope(
        &self,
        client: &OAuthClient,
        requested: Option<&str>,
    ) -> Result<Option<String>, OAuthError> {
        let allowed: HashSet<String> = match &client.scope {
            Some(scope) => parse_scope(scope),
            None => self.supported_scopes.iter().cloned().collect(),
        };

        match requested
            .map(parse_scope)
            .filter(|requested| !requested.is_empty())
        {
            Some(requested) => {
                if let Some(extra) = requested.iter().find(|s| !allowed.contains(*s)) {
                    return Err(OAuthError::InvalidScope(format!(
                        "scope '{}' is not allowed for this client",
                        extra
                    )));
                }
                Ok(Some(join_scopes(&requested)))
            }
            None if allowed.is_empty() => Ok(None),
            None => Ok(Some(join_scopes(&allowed))),
        }
    }

    async fn authenticate_client(
        &self,
        client_auth: &ClientAuthentication,
    ) -> Result<OAuthClient, OAuthError> {
        let client = self
            .storage
            .get_client(&client_auth.client_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| OAuthError::InvalidClient("unknown client".to_string()))?;

        if !client_credentials_match(&client, client_auth.client_secret.as_deref()) {
            tracing::warn!(client_id = %client.client_id, "client authentication failed");
            return Err(OAuthError::InvalidClient(
                "client authentication failed".to_string(),
            ));
        }
        Ok(client)
    }
}

fn check_pkce_request(
    client: &OAuthClient,
    request: &AuthorizationRequest,
) -> Result<(), OAuthError> {
    match (&request.code_challenge, &request.code_challenge_method) {
        (None, Some(_)) => Err(OAuthError::InvalidRequest(
            "code_challenge_method sent without code_challenge".to_string(),
        )),
        (None, None) if client.client_type == ClientType::Public => Err(
            OAuthError::InvalidRequest("public clients must send a code_challenge".to_string()),
        ),
        (None, None) => Ok(()),
        (Some(challenge), method) => {
            let method = method.as_deref().unwrap_or("plain");
            if !pkce::SUPPORTED_METHODS.contains(&method) {
                return Err(OAuthError::InvalidRequest(format!(
                    "unsupported code_challenge_method '{}'",
                    method
                )));
            }
            if !pkce::is_valid_verifier(challenge) {
                return Err(OAuthError::InvalidRequest(
                    "code_challenge must be 43 to 128 unreserved characters".to_string(),
                ));
            }
            Ok(())
        }
    }
}

fn storage_error(err: StorageError) -> OAuthError {
    tracing::error!(error = ?err, "oauth storage failure");
    OAuthError::ServerError(err.to_string())
}

/// Append query parameters and `state` to a registered redirect URI.
pub fn authorization_redirect(
    redirect_uri: &str,
    params: &[(&str, &str)],
    state: Option<&str>,
) -> Result<String, OAuthError> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|e| OAuthError::InvalidRedirectUri(format!("{}: {}", redirect_uri, e)))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
        if let Some(state) = state {
            pairs.append_pair("state", state);
        }
    }
    Ok(url.into())
}

/// Redirect reporting an authorization error back to a verified redirect URI.
pub fn error_redirect(
    redirect_uri: &str,
    error: &OAuthError,
    state: Option<&str>,
) -> Result<String, OAuthError> {
    let description = error.to_string();
    authorization_redirect(
        redirect_uri,
        &[
            ("error", error.error_code()),
            ("error_description", description.as_str()),
        ],
        state,
    )
}

/// Client Authentication extracted from request
#[derive(Clone, Debug)]
pub struct ClientAuthentication {
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// Query parameters for authorization endpoint
#[derive(Deserialize)]
#[cfg_attr(any(debug_assertions, test), derive(Debug))]
pub struct AuthorizeQuery {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

impl From<AuthorizeQuery> for AuthorizationRequest {
    fn from(query: AuthorizeQuery) -> Self {
        Self {
            response_type: query.response_type.unwrap_or_default(),
            client_id: query.client_id.unwrap_or_default(),
            redirect_uri: query.redirect_uri.unwrap_or_default(),
            scope: query.scope,
            state: query.state,
            code_challenge: query.code_challenge,
            code_challenge_method: query.code_challenge_method,
        }
    }
}

/// Form data for token endpoint
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
}

impl TryFrom<TokenForm> for TokenRequest {
    type Error = OAuthError;

    fn try_from(form: TokenForm) -> Result<Self, Self::Error> {
        let grant_type = form
            .grant_type
            .parse::<GrantType>()
            .map_err(OAuthError::UnsupportedGrantType)?;

        Ok(Self {
            grant_type,
            code: form.code,
            redirect_uri: form.redirect_uri,
            code_verifier: form.code_verifier,
            refresh_token: form.refresh_token,
            scope: form.scope,
        })
    }
}

/// Extract client authentication from the `Authorization` header or form parameters.
///
/// HTTP Basic credentials take precedence over `client_id`/`client_secret` in the body.
pub fn extract_client_auth(
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Option<ClientAuthentication> {
    if let Some((client_id, client_secret)) = basic_credentials(headers) {
        return Some(ClientAuthentication {
            client_id,
            client_secret: Some(client_secret),
        });
    }

    form_client_id
        .filter(|client_id| !client_id.is_empty())
        .map(|client_id| ClientAuthentication {
            client_id: client_id.to_string(),
            client_secret: form_client_secret
                .filter(|secret| !secret.is_empty())
                .map(str::to_string),
        })
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64_STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (client_id, client_secret) = credentials.split_once(':')?;
    Some((client_id.to_string(), client_secret.to_string()))
}
