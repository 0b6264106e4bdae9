//! Service-level error model.

use thiserror::Error;

/// Coarse error classification shared by every transport binding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    Unauthorized,
    NotFound,
    Internal,
}

impl ErrorKind {
    /// HTTP status code conventionally associated with this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Internal => 500,
        }
    }
}

/// Service-level error.
///
/// Every component error converts into one of these. The message is meant to be
/// shown to the caller; internal causes are logged where they occur and never
/// carried here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Malformed request, unknown account/counterparty, bad or insufficient amount.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing, invalid, expired or revoked credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Lookup miss (e.g. revoking a session that is not live).
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage or signing failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidInput(_) => ErrorKind::InvalidInput,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The caller-facing message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            AppError::InvalidInput(m)
            | AppError::Unauthorized(m)
            | AppError::NotFound(m)
            | AppError::Internal(m) => m,
        }
    }
}
