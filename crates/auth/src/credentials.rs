//! Credential verification (login gate).
//!
//! Secrets are stored as Argon2id PHC strings. Verification is a black-box
//! one-way comparison; the verifier never sees or stores plaintext beyond the
//! duration of a call.

use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::{instrument, warn};

use simplepay_core::AppError;

/// Argon2 cost parameters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl HashCost {
    /// Smallest parameters Argon2 accepts. For fixtures and tests only.
    pub fn minimal() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No identity with that username.
    #[error("identity not found")]
    NotFound,

    /// Identity exists but the secret does not match.
    #[error("credential mismatch")]
    Mismatch,

    #[error("identity lookup failed: {0}")]
    Lookup(String),

    #[error("hashing failed: {0}")]
    Hash(String),
}

impl From<CredentialError> for AppError {
    fn from(value: CredentialError) -> Self {
        match value {
            // Both misses look the same to the caller.
            CredentialError::NotFound | CredentialError::Mismatch => {
                AppError::unauthorized("invalid credentials")
            }
            CredentialError::Lookup(_) | CredentialError::Hash(_) => {
                AppError::internal("failed to verify credentials")
            }
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct LookupError(pub String);

/// Read access to stored credential hashes, keyed by username.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn credential_hash(&self, username: &str) -> Result<Option<String>, LookupError>;
}

#[async_trait]
impl<L> IdentityLookup for Arc<L>
where
    L: IdentityLookup + ?Sized,
{
    async fn credential_hash(&self, username: &str) -> Result<Option<String>, LookupError> {
        (**self).credential_hash(username).await
    }
}

/// Argon2id hasher/comparator.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
}

impl core::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SecretHasher").finish_non_exhaustive()
    }
}

impl SecretHasher {
    pub fn new(cost: HashCost) -> Result<Self, CredentialError> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| CredentialError::Hash(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Produce a salted PHC string for `secret`.
    pub fn hash(&self, secret: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| CredentialError::Hash(e.to_string()))
    }

    /// Compare `secret` against a stored PHC string.
    ///
    /// Cost parameters are read from the stored hash, not from `self`.
    /// A malformed stored hash never matches.
    pub fn matches(&self, secret: &str, stored: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => self
                .argon2
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                warn!(error = %e, "stored credential hash is malformed");
                false
            }
        }
    }
}

/// Login gate: `verify(username, secret) -> Ok | NotFound | Mismatch`.
pub struct CredentialVerifier {
    lookup: Arc<dyn IdentityLookup>,
    hasher: SecretHasher,
    // Compared against when the identity is absent so both miss paths do the
    // same amount of work.
    decoy_hash: String,
    lookup_timeout: Duration,
}

impl CredentialVerifier {
    pub fn new(
        lookup: Arc<dyn IdentityLookup>,
        hasher: SecretHasher,
        lookup_timeout: Duration,
    ) -> Result<Self, CredentialError> {
        let decoy_hash = hasher.hash("decoy-secret-never-matches")?;
        Ok(Self {
            lookup,
            hasher,
            decoy_hash,
            lookup_timeout,
        })
    }

    #[instrument(skip(self, secret), err(level = "warn"))]
    pub async fn verify(&self, username: &str, secret: &str) -> Result<(), CredentialError> {
        let stored = tokio::time::timeout(self.lookup_timeout, self.lookup.credential_hash(username))
            .await
            .map_err(|_| CredentialError::Lookup("identity lookup timed out".to_string()))?
            .map_err(|e| CredentialError::Lookup(e.0))?;

        let (hash, found) = match stored {
            Some(h) => (h, true),
            None => (self.decoy_hash.clone(), false),
        };

        let hasher = self.hasher.clone();
        let secret = secret.to_string();
        let matched = tokio::task::spawn_blocking(move || hasher.matches(&secret, &hash))
            .await
            .map_err(|e| CredentialError::Hash(e.to_string()))?;

        match (found, matched) {
            (false, _) => Err(CredentialError::NotFound),
            (true, false) => Err(CredentialError::Mismatch),
            (true, true) => Ok(()),
        }
    }
}
