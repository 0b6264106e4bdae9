use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use simplepay_auth::{AuthGate, TokenError};

use crate::app::errors::ApiError;
use crate::context::SessionContext;

#[derive(Clone)]
pub struct AuthState {
    pub gate: Arc<AuthGate>,
}

/// Runs the authentication gate once, before the handler.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let header = authorization_header(req.headers())?;

    let session = state
        .gate
        .authenticate(header, Utc::now())
        .await
        .map_err(ApiError::from_token)?;

    req.extensions_mut().insert(SessionContext::from(session));

    Ok(next.run(req).await)
}

/// Raw `Authorization` value; a non-UTF-8 header counts as missing credentials.
pub fn authorization_header(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    headers
        .get(AUTHORIZATION)
        .map(|value| value.to_str())
        .transpose()
        .map_err(|_| ApiError::from_token(TokenError::MissingCredential))
}
