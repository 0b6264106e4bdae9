//! Authentication gate: the single choke point in front of protected operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use simplepay_core::SessionId;

use crate::token::{TokenError, TokenService};

/// Identity resolved from a verified, live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub username: String,
    pub session_id: SessionId,
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header: Option<&str>) -> Result<&str, TokenError> {
    let header = header.ok_or(TokenError::MissingCredential)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(TokenError::MissingCredential)?
        .trim();

    if token.is_empty() {
        return Err(TokenError::MissingCredential);
    }
    Ok(token)
}

#[derive(Debug, Clone)]
pub struct AuthGate {
    tokens: Arc<TokenService>,
}

impl AuthGate {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }

    /// Header → bearer token → signature/claims → liveness.
    ///
    /// Run once per protected call, before any side effect.
    #[instrument(skip_all, err(level = "debug"))]
    pub async fn authenticate(
        &self,
        header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedSession, TokenError> {
        let token = extract_bearer(header)?;
        let claims = self.tokens.verify(token, now)?;
        self.tokens.confirm_live(&claims).await?;

        debug!(username = %claims.sub, session_id = %claims.sid, "request authenticated");
        Ok(AuthenticatedSession {
            username: claims.sub,
            session_id: claims.sid,
        })
    }
}
