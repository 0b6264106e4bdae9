use std::fmt::Display;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use simplepay_auth::{CredentialError, TokenError};
use simplepay_core::{AppError, ErrorKind};
use simplepay_infra::TransferError;

pub const SUCCESS_MESSAGE: &str = "Success";

/// Response envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn success<T: Serialize>(data: Option<T>) -> Response {
    (
        StatusCode::OK,
        axum::Json(Envelope {
            code: StatusCode::OK.as_u16().to_string(),
            message: SUCCESS_MESSAGE.to_string(),
            data,
        }),
    )
        .into_response()
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(Envelope::<()> {
            code: status.as_u16().to_string(),
            message: message.into(),
            data: None,
        }),
    )
        .into_response()
}

/// Transport wrapper around [`AppError`].
///
/// Internal causes are logged here, once, and only the generic message leaves
/// the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError(pub AppError);

impl ApiError {
    fn logged<E>(cause: E) -> Self
    where
        E: Display + Into<AppError>,
    {
        let detail = cause.to_string();
        let app: AppError = cause.into();
        if app.kind() == ErrorKind::Internal {
            error!(error = %detail, "request failed");
        }
        Self(app)
    }

    pub fn from_token(err: TokenError) -> Self {
        Self::logged(err)
    }

    pub fn invalid_body(reason: impl Display) -> Self {
        tracing::debug!(%reason, "rejected request body");
        Self(AppError::invalid_input("invalid request body"))
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<AppError> for ApiError {
    fn from(value: AppError) -> Self {
        Self::logged(value)
    }
}

impl From<TokenError> for ApiError {
    fn from(value: TokenError) -> Self {
        Self::logged(value)
    }
}

impl From<CredentialError> for ApiError {
    fn from(value: CredentialError) -> Self {
        Self::logged(value)
    }
}

impl From<TransferError> for ApiError {
    fn from(value: TransferError) -> Self {
        Self::logged(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        json_error(status, self.0.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_details_stay_server_side() {
        let err = ApiError::from(TransferError::Timeout);
        assert_eq!(err.0, AppError::internal("ledger unavailable"));
    }

    #[test]
    fn status_follows_kind() {
        let res = ApiError::from(TokenError::SessionNotFound).into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = ApiError::from(CredentialError::Mismatch).into_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn envelope_omits_missing_data() {
        let body = serde_json::to_value(Envelope::<()> {
            code: "200".into(),
            message: SUCCESS_MESSAGE.into(),
            data: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"code": "200", "message": "Success"}));
    }
}
