use simplepay_auth::AuthenticatedSession;
use simplepay_core::SessionId;

/// Session context for a request (verified, live identity).
///
/// Inserted by the auth middleware; present on every protected route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    username: String,
    session_id: SessionId,
}

impl SessionContext {
    pub fn new(username: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            username: username.into(),
            session_id,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl From<AuthenticatedSession> for SessionContext {
    fn from(value: AuthenticatedSession) -> Self {
        Self::new(value.username, value.session_id)
    }
}
