use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    response::Response,
};

use crate::app::dto::{PaymentRequest, TransactionResponse};
use crate::app::errors::{ApiError, success};
use crate::app::services::AppServices;
use crate::context::SessionContext;

pub async fn pay(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    payload: Result<Json<PaymentRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(ApiError::invalid_body)?;
    let record = services
        .transfer(&session, &req.merchant_code, req.amount)
        .await?;
    Ok(success(Some(TransactionResponse::from(record))))
}
