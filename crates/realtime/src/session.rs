//! Session state boundary.
//!
//! The realtime client never owns authentication; it reads whatever the
//! surrounding application currently has via [`SessionStore`]. Both values
//! are re-read on every connection attempt so a refreshed token is picked up
//! by the next reconnect without any coordination.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// The authenticated user as stored by the application session layer.
///
/// Upstream payloads carry the identifier as either `id` or `userId`
/// depending on which endpoint produced them; the alias normalizes both to
/// one field at this boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    #[serde(alias = "userId")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Read-only view of the application's current session state.
pub trait SessionStore: Send + Sync {
    /// The current auth token, if any.
    fn token(&self) -> Option<String>;

    /// The stored user record, if a user is signed in.
    fn stored_user(&self) -> Option<SessionUser>;
}

/// A [`SessionStore`] holding fixed (but replaceable) values.
///
/// Suitable for applications that refresh credentials in place, and for
/// tests.
#[derive(Default)]
pub struct StaticSession {
    inner: RwLock<SessionState>,
}

#[derive(Default)]
struct SessionState {
    token: Option<String>,
    user: Option<SessionUser>,
}

impl StaticSession {
    pub fn new(token: Option<String>, user: Option<SessionUser>) -> Self {
        Self {
            inner: RwLock::new(SessionState { token, user }),
        }
    }

    /// Anonymous session: no token, no user.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut state) = self.inner.write() {
            state.token = token;
        }
    }

    pub fn set_user(&self, user: Option<SessionUser>) {
        if let Ok(mut state) = self.inner.write() {
            state.user = user;
        }
    }
}

impl SessionStore for StaticSession {
    fn token(&self) -> Option<String> {
        self.inner.read().ok().and_then(|s| s.token.clone())
    }

    fn stored_user(&self) -> Option<SessionUser> {
        self.inner.read().ok().and_then(|s| s.user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_alias_normalizes_both_spellings() {
        let a: SessionUser = serde_json::from_str(r#"{"id": "u1"}"#).unwrap();
        let b: SessionUser = serde_json::from_str(r#"{"userId": "u1"}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id, "u1");
    }

    #[test]
    fn static_session_replaces_values() {
        let session = StaticSession::anonymous();
        assert_eq!(session.token(), None);
        assert_eq!(session.stored_user(), None);

        session.set_token(Some("tok".into()));
        session.set_user(Some(SessionUser {
            id: "42".into(),
            email: Some("a@b.c".into()),
        }));
        assert_eq!(session.token().as_deref(), Some("tok"));
        assert_eq!(session.stored_user().unwrap().id, "42");
    }
}
