//! `simplepay-auth`: login credentials and revocable session tokens.
//!
//! Decoupled from HTTP and from any concrete storage: the session store and
//! the identity lookup are capability traits injected at construction.

pub mod claims;
pub mod credentials;
pub mod gate;
pub mod session_store;
pub mod token;

pub use claims::{SessionClaims, TokenValidationError, validate_claims};
pub use credentials::{
    CredentialError, CredentialVerifier, HashCost, IdentityLookup, LookupError, SecretHasher,
};
pub use gate::{AuthGate, AuthenticatedSession, extract_bearer};
pub use session_store::{InMemorySessionStore, SessionStore, SessionStoreError};
pub use token::{TokenConfig, TokenDetails, TokenError, TokenService};
