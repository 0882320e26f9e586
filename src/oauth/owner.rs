//! Resource owner login and browser sessions used by the authorization endpoint.

use crate::oauth::types::{constant_time_eq, generate_token};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "toolgate_session";

/// Verifies resource owner credentials.
#[async_trait]
pub trait ResourceOwnerAuthenticator: Send + Sync {
    /// Returns the user id when the credentials are valid.
    async fn authenticate(&self, username: &str, password: &str) -> Option<String>;
}

/// Fixed user directory loaded from configuration.
pub struct StaticUserAuthenticator {
    users: HashMap<String, String>,
}

impl StaticUserAuthenticator {
    pub fn new<I>(users: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            users: users.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl ResourceOwnerAuthenticator for StaticUserAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Option<String> {
        match self.users.get(username) {
            Some(expected) if constant_time_eq(expected, password) => Some(username.to_string()),
            _ => {
                tracing::warn!(username, "resource owner login failed");
                None
            }
        }
    }
}

/// A logged-in resource owner
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// In-memory browser sessions with expiry.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn create(&self, user_id: &str) -> Session {
        let now = Utc::now();
        let session = Session {
            session_id: generate_token(),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session.clone());
        session
    }

    /// Returns the session if it exists and has not expired.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .filter(|session| session.expires_at > Utc::now())
            .cloned()
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    /// Drop expired sessions and return how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        before - sessions.len()
    }

    /// `Set-Cookie` value for a new session.
    pub fn cookie(&self, session: &Session, secure: bool) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE,
            session.session_id,
            self.ttl.num_seconds().max(0)
        );
        if secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// `Set-Cookie` value that clears the session cookie.
    pub fn clear_cookie() -> String {
        format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            SESSION_COOKIE
        )
    }
}

/// Find the session id in a `Cookie` header value.
pub fn session_id_from_cookie(cookie_header: &str) -> Option<&str> {
    cookie_header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_authenticator() {
        let authenticator = StaticUserAuthenticator::new(vec![(
            "alice".to_string(),
            "wonderland".to_string(),
        )]);
        assert_eq!(
            authenticator.authenticate("alice", "wonderland").await,
            Some("alice".to_string())
        );
        assert!(authenticator.authenticate("alice", "wrong").await.is_none());
        assert!(authenticator.authenticate("alice", "wonder").await.is_none());
        assert!(authenticator.authenticate("alice", "").await.is_none());
        assert!(authenticator.authenticate("bob", "wonderland").await.is_none());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = SessionStore::new(Duration::hours(1));
        let session = store.create("alice").await;

        assert_eq!(
            store.get(&session.session_id).await.unwrap().user_id,
            "alice"
        );
        assert!(store.remove(&session.session_id).await);
        assert!(store.get(&session.session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_invisible_and_cleaned() {
        let store = SessionStore::new(Duration::seconds(-1));
        let session = store.create("alice").await;

        assert!(store.get(&session.session_id).await.is_none());
        assert_eq!(store.cleanup_expired().await, 1);
    }

    #[test]
    fn test_cookie_round_trip() {
        let store = SessionStore::new(Duration::minutes(5));
        let session = Session {
            session_id: "abc".to_string(),
            user_id: "alice".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now(),
        };
        let cookie = store.cookie(&session, true);
        assert!(cookie.starts_with("toolgate_session=abc;"));
        assert!(cookie.contains("Max-Age=300"));
        assert!(cookie.ends_with("; Secure"));

        assert_eq!(
            session_id_from_cookie("theme=dark; toolgate_session=abc"),
            Some("abc")
        );
        assert_eq!(session_id_from_cookie("toolgate_session="), None);
        assert_eq!(session_id_from_cookie("theme=dark"), None);
    }
}
