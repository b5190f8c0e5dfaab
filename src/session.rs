//! Session and navigation collaborators.
//!
//! The dispatcher only needs to know whether a session is authenticated and which
//! bearer token to attach; how credentials are checked and stored lives behind
//! [`SessionStore`]. Where the user is sent after login and logout is behind
//! [`Navigator`].

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Login form input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Result of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub token: Option<String>,
}

/// Process-wide session state.
pub trait SessionStore: Send + Sync {
    fn login(&self, credentials: &Credentials) -> LoginResponse;

    fn is_authenticated(&self) -> bool;

    /// Token to send as `Authorization: Bearer`, if authenticated.
    fn bearer_token(&self) -> Option<String>;

    fn logout(&self);
}

/// Session store that checks against one configured account and keeps the
/// token in memory.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    expected: Option<Credentials>,
    token: RwLock<Option<String>>,
}

impl InMemorySessionStore {
    pub fn new(expected: Credentials) -> Self {
        Self {
            expected: Some(expected),
            token: RwLock::new(None),
        }
    }

    /// Session restored from a persisted token at startup.
    ///
    /// Without configured credentials, a later [`SessionStore::login`] always fails.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            expected: None,
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn login(&self, credentials: &Credentials) -> LoginResponse {
        if self.expected.as_ref() != Some(credentials) {
            tracing::info!(username = %credentials.username, "Login rejected");
            return LoginResponse {
                success: false,
                message: "Invalid username or password".to_string(),
                token: None,
            };
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        *self.token.write() = Some(token.clone());
        tracing::info!(username = %credentials.username, "Login succeeded");
        LoginResponse {
            success: true,
            message: "Login successful".to_string(),
            token: Some(token),
        }
    }

    fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    fn bearer_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn logout(&self) {
        self.token.write().take();
    }
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogoutReason {
    Manual,
    Inactivity,
}

/// Navigation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    /// Unauthenticated entry point, carrying why the user landed there
    Login(LogoutReason),
    Dashboard,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Login(LogoutReason::Manual) => write!(f, "/login"),
            Route::Login(LogoutReason::Inactivity) => write!(f, "/login?sessionExpired=true"),
            Route::Dashboard => write!(f, "/dashboard"),
        }
    }
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Navigator that records every route, for tests and headless use.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<Route>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: Route) {
        tracing::debug!(%route, "Navigating");
        self.routes.lock().push(route);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(password: &str) -> Credentials {
        Credentials {
            username: "operator".to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_login_and_logout() {
        let store = InMemorySessionStore::new(credentials("s3cret"));
        assert!(!store.is_authenticated());

        let response = store.login(&credentials("wrong"));
        assert!(!response.success);
        assert!(!store.is_authenticated());

        let response = store.login(&credentials("s3cret"));
        assert!(response.success);
        assert_eq!(store.bearer_token(), response.token);

        store.logout();
        assert!(!store.is_authenticated());
        assert_eq!(store.bearer_token(), None);
    }

    #[test]
    fn test_restored_session() {
        let store = InMemorySessionStore::from_token("persisted");
        assert!(store.is_authenticated());
        assert_eq!(store.bearer_token().as_deref(), Some("persisted"));
        assert!(!store.login(&credentials("anything")).success);
    }

    #[test]
    fn test_inactivity_route_is_distinct() {
        assert_ne!(
            Route::Login(LogoutReason::Inactivity).to_string(),
            Route::Login(LogoutReason::Manual).to_string()
        );
        let navigator = RecordingNavigator::new();
        navigator.navigate(Route::Dashboard);
        assert_eq!(navigator.routes(), vec![Route::Dashboard]);
    }
}
