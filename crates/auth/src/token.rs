//! Session token service: issue, verify, confirm liveness, revoke.
//!
//! A token is an HMAC-signed JWT carrying [`SessionClaims`]. A valid signature
//! proves the token was minted here and is unmodified; it does not prove the
//! session is still live. Liveness is a separate lookup of the session id in the
//! [`SessionStore`], which is what makes revocation a single delete.
//!
//! ```text
//! issue ──► Issued (record present) ──► revoke ──► Revoked (absent)
//!                                  └──► TTL   ──► Expired (absent)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use tracing::{error, info, instrument};

use simplepay_core::{AppError, SessionId};

use crate::claims::{SessionClaims, TokenValidationError, validate_claims};
use crate::session_store::{SessionStore, SessionStoreError};

#[derive(Clone)]
pub struct TokenConfig {
    /// Expected `iss` claim (the application name).
    pub issuer: String,
    pub signing_key: Vec<u8>,
    /// Must be one of the HMAC algorithms.
    pub algorithm: Algorithm,
    pub lifetime: Duration,
    /// Upper bound on every session-store call.
    pub store_timeout: StdDuration,
    /// Clock skew tolerated on `iat`.
    pub leeway_secs: i64,
}

impl core::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("issuer", &self.issuer)
            .field("algorithm", &self.algorithm)
            .field("lifetime", &self.lifetime)
            .field("store_timeout", &self.store_timeout)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl TokenConfig {
    pub fn hs256(issuer: impl Into<String>, signing_key: impl Into<Vec<u8>>, lifetime: Duration) -> Self {
        Self {
            issuer: issuer.into(),
            signing_key: signing_key.into(),
            algorithm: Algorithm::HS256,
            lifetime,
            store_timeout: StdDuration::from_secs(2),
            leeway_secs: 0,
        }
    }
}

/// What a successful `issue` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDetails {
    pub token: String,
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("missing or malformed authorization header")]
    MissingCredential,

    #[error("malformed token")]
    Malformed,

    #[error("invalid signing method")]
    SigningMethod,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("invalid token issuer")]
    InvalidIssuer,

    #[error(transparent)]
    Claims(#[from] TokenValidationError),

    #[error("session is not live")]
    SessionNotLive,

    #[error("session does not belong to token subject")]
    SessionMismatch,

    #[error("session not found")]
    SessionNotFound,

    #[error("failed to sign token: {0}")]
    Signing(String),

    #[error(transparent)]
    Store(#[from] SessionStoreError),

    #[error("session store timed out")]
    StoreTimeout,

    #[error("invalid token configuration: {0}")]
    Config(String),
}

impl From<TokenError> for AppError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::MissingCredential => AppError::unauthorized("empty token"),
            TokenError::Malformed
            | TokenError::SigningMethod
            | TokenError::InvalidSignature
            | TokenError::InvalidIssuer => AppError::unauthorized("invalid token"),
            TokenError::Claims(TokenValidationError::Expired) => AppError::unauthorized("token expired"),
            TokenError::Claims(_) => AppError::unauthorized("invalid token"),
            TokenError::SessionNotLive | TokenError::SessionMismatch => {
                AppError::unauthorized("session expired or revoked")
            }
            TokenError::SessionNotFound => AppError::not_found("session not found"),
            TokenError::Signing(_)
            | TokenError::Store(_)
            | TokenError::StoreTimeout
            | TokenError::Config(_) => AppError::internal("session service unavailable"),
        }
    }
}

fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

pub struct TokenService {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    store: Arc<dyn SessionStore>,
}

impl core::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(config: TokenConfig, store: Arc<dyn SessionStore>) -> Result<Self, TokenError> {
        if !is_hmac(config.algorithm) {
            return Err(TokenError::Config(format!(
                "{:?} is not an HMAC algorithm",
                config.algorithm
            )));
        }
        if config.signing_key.is_empty() {
            return Err(TokenError::Config("signing key is empty".to_string()));
        }
        if config.lifetime <= Duration::zero() {
            return Err(TokenError::Config("token lifetime must be positive".to_string()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(&config.signing_key),
            decoding_key: DecodingKey::from_secret(&config.signing_key),
            config,
            store,
        })
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, TokenError>
    where
        F: Future<Output = Result<T, SessionStoreError>>,
    {
        match tokio::time::timeout(self.config.store_timeout, op).await {
            Ok(result) => result.map_err(|e| {
                error!(error = %e, "session store call failed");
                TokenError::Store(e)
            }),
            Err(_) => {
                error!(timeout = ?self.config.store_timeout, "session store call timed out");
                Err(TokenError::StoreTimeout)
            }
        }
    }

    /// Mint a token for `username` and record the session as live.
    #[instrument(skip(self))]
    pub async fn issue(&self, username: &str) -> Result<TokenDetails, TokenError> {
        let now = Utc::now();
        let session_id = SessionId::new();
        let iat = now.timestamp();
        let exp = iat + self.config.lifetime.num_seconds();
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| TokenError::Config("expiry out of range".to_string()))?;

        let claims = SessionClaims {
            sub: username.to_string(),
            sid: session_id,
            iss: self.config.issuer.clone(),
            iat,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::new(self.config.algorithm), &claims, &self.encoding_key)
            .map_err(|e| {
                error!(error = %e, "failed to sign access token");
                TokenError::Signing(e.to_string())
            })?;

        // Sub-second truncation of `exp` can only shorten the TTL.
        let ttl = (expires_at - now)
            .to_std()
            .map_err(|_| TokenError::Config("token lifetime shorter than one second".to_string()))?;

        self.bounded(self.store.put(&session_id.to_string(), username, ttl))
            .await?;

        info!(session_id = %session_id, %expires_at, "session issued");

        Ok(TokenDetails {
            token,
            session_id,
            expires_at,
        })
    }

    /// Check signature, algorithm family, issuer and embedded time window.
    ///
    /// Does not consult the session store; see [`Self::confirm_live`].
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| TokenError::Malformed)?;
        if !is_hmac(header.alg) || header.alg != self.config.algorithm {
            return Err(TokenError::SigningMethod);
        }

        let mut validation = Validation::new(self.config.algorithm);
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        // Time window is checked below against the caller's clock.
        validation.validate_exp = false;

        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                use jsonwebtoken::errors::ErrorKind;
                match e.kind() {
                    ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                    ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
                    ErrorKind::InvalidAlgorithm => TokenError::SigningMethod,
                    _ => TokenError::Malformed,
                }
            })?;

        validate_claims(&data.claims, now, self.config.leeway_secs)?;
        Ok(data.claims)
    }

    /// Check that the session named by `claims` is still live and bound to
    /// the same subject.
    pub async fn confirm_live(&self, claims: &SessionClaims) -> Result<(), TokenError> {
        let stored = self
            .bounded(self.store.get(&claims.sid.to_string()))
            .await?;

        match stored {
            None => Err(TokenError::SessionNotLive),
            Some(username) if username.is_empty() => Err(TokenError::SessionNotLive),
            Some(username) if username != claims.sub => Err(TokenError::SessionMismatch),
            Some(_) => Ok(()),
        }
    }

    /// Delete the session record. Revoking an absent session is a reported
    /// miss, never a failure of the service.
    #[instrument(skip(self))]
    pub async fn revoke(&self, session_id: SessionId) -> Result<(), TokenError> {
        let removed = self
            .bounded(self.store.delete(&session_id.to_string()))
            .await?;
        if removed == 0 {
            return Err(TokenError::SessionNotFound);
        }
        info!(%session_id, "session revoked");
        Ok(())
    }
}
