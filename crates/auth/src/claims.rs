use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use simplepay_core::SessionId;

/// Session token claims (transport-agnostic).
///
/// Timestamps are whole seconds since the Unix epoch, as the JWT registered
/// claims require.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the account username.
    pub sub: String,

    /// Session identifier; the liveness key in the session store.
    pub sid: SessionId,

    /// Issuer: the configured application name.
    pub iss: String,

    /// Issued-at timestamp.
    pub iat: i64,

    /// Expiration timestamp.
    pub exp: i64,
}

impl SessionClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate the embedded time window.
///
/// `leeway_secs` tolerates clock skew on the issued-at side only; expiry is
/// strict (`now < exp`).
///
/// Note: this validates the *claims* only. Signature verification happens in
/// [`crate::TokenService::verify`].
pub fn validate_claims(
    claims: &SessionClaims,
    now: DateTime<Utc>,
    leeway_secs: i64,
) -> Result<(), TokenValidationError> {
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    let now = now.timestamp();
    if now < claims.iat - leeway_secs {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}
