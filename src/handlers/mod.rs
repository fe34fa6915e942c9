pub mod notify;
pub mod purchases;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/payments/initialize", post(purchases::initialize))
        .route("/api/payments/sync", post(purchases::sync))
        .route("/api/payments/purchases", get(purchases::list_purchases))
        // Provider webhook: unauthenticated transport, signed payload
        .route("/api/payments/notify", post(notify::notify))
}
