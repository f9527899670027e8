//! In-memory session state.
//!
//! Tokens live only in memory. Every mutation goes through the setters
//! below, and `is_authenticated` always equals `access_token.is_some()`.

use tokio::sync::watch;

use super::types::{TokenResponse, User};

/// Current authentication state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub is_authenticated: bool,
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Holder of the single live [`Session`].
///
/// Mutations are synchronous; consumers that react to authentication
/// changes call [`SessionStore::subscribe`].
#[derive(Debug)]
pub struct SessionStore {
    state: watch::Sender<Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Session::default());
        Self { state }
    }

    /// Store tokens and user after a successful login.
    pub fn login(&self, tokens: &TokenResponse, user: User) {
        self.state.send_replace(Session {
            is_authenticated: true,
            user: Some(user),
            access_token: Some(tokens.access.clone()),
            refresh_token: Some(tokens.refresh.clone()),
        });
    }

    pub fn logout(&self) {
        self.clear_auth();
    }

    pub fn set_user(&self, user: Option<User>) {
        self.state.send_modify(|s| s.user = user);
    }

    /// Replace both tokens, keeping the user.
    pub fn set_tokens(&self, access_token: impl Into<String>, refresh_token: impl Into<String>) {
        let access_token = access_token.into();
        let refresh_token = refresh_token.into();
        self.state.send_modify(|s| {
            s.is_authenticated = !access_token.is_empty();
            s.access_token = Some(access_token).filter(|t| !t.is_empty());
            s.refresh_token = Some(refresh_token).filter(|t| !t.is_empty());
        });
    }

    /// Reset to the unauthenticated initial state.
    pub fn clear_auth(&self) {
        self.state.send_if_modified(|s| {
            if *s == Session::default() {
                return false;
            }
            *s = Session::default();
            true
        });
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.state.borrow().access_token.clone()
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.state.borrow().refresh_token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Receive a notification on every session change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            pk: 1,
            email: "kim@example.com".to_string(),
            name: "Kim".to_string(),
            first_name: String::new(),
            last_name: String::new(),
        }
    }

    fn tokens() -> TokenResponse {
        TokenResponse {
            access: "access-1".to_string(),
            refresh: "refresh-1".to_string(),
            user: user(),
        }
    }

    #[test]
    fn login_sets_everything() {
        let store = SessionStore::new();
        store.login(&tokens(), user());

        let session = store.snapshot();
        assert!(session.is_authenticated);
        assert_eq!(session.access_token.as_deref(), Some("access-1"));
        assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(session.user, Some(user()));
    }

    #[test]
    fn set_tokens_keeps_user_and_tracks_access_token() {
        let store = SessionStore::new();
        store.login(&tokens(), user());

        store.set_tokens("access-2", "refresh-1");
        assert_eq!(store.get_access_token().as_deref(), Some("access-2"));
        assert!(store.is_authenticated());
        assert_eq!(store.user(), Some(user()));

        store.set_tokens("", "refresh-1");
        assert!(!store.is_authenticated());
        assert_eq!(store.get_access_token(), None);
        assert_eq!(store.get_refresh_token().as_deref(), Some("refresh-1"));
    }

    #[test]
    fn logout_is_clear_auth() {
        let store = SessionStore::new();
        store.login(&tokens(), user());
        store.logout();
        assert_eq!(store.snapshot(), Session::default());
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let store = SessionStore::new();
        let mut rx = store.subscribe();

        store.login(&tokens(), user());
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_authenticated);

        store.clear_auth();
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().is_authenticated);
    }

    #[test]
    fn clearing_an_empty_session_does_not_notify() {
        let store = SessionStore::new();
        let rx = store.subscribe();
        store.clear_auth();
        assert!(!rx.has_changed().unwrap());
    }
}
