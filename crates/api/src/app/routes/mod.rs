use axum::{Router, routing::post};

pub mod auth;
pub mod payment;
pub mod system;

/// Endpoints that authenticate on their own (or not at all).
pub fn public_router() -> Router {
    Router::new()
        .route("/v1/login", post(auth::login))
        .route("/v1/logout", post(auth::logout))
}

/// Endpoints behind the auth middleware.
pub fn protected_router() -> Router {
    Router::new().route("/v1/menu/payment", post(payment::pay))
}
