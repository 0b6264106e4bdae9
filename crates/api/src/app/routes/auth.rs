use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::HeaderMap,
    response::Response,
};

use crate::app::dto::{LoginRequest, LoginResponse};
use crate::app::errors::{ApiError, success};
use crate::app::services::AppServices;
use crate::middleware::authorization_header;

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(ApiError::invalid_body)?;
    let details = services.login(&req.username, &req.password).await?;
    Ok(success(Some(LoginResponse {
        token: details.token,
    })))
}

pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    services.logout(authorization_header(&headers)?).await?;
    Ok(success::<()>(None))
}
