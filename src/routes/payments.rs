use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::handlers::payment_handlers;
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        // Health
        .route("/health", get(payments_health))

        // Orchestration
        .route("/", post(payment_handlers::submit_payment))
        .route("/:key", get(payment_handlers::payment_status))
        .route("/:key/retry", post(payment_handlers::retry_payment))
        .route("/:key/cancel", post(payment_handlers::cancel_payment))
}

pub fn gateway_routes() -> Router<AppState> {
    Router::new()
        // Daraja confirmation callback
        .route("/mpesa/callback", post(payment_handlers::mpesa_callback))
}

async fn payments_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "payments",
        "timestamp": Utc::now().to_rfc3339(),
        "features": ["stk-push", "airtel-money", "card", "offline-queue", "round-up"]
    }))
}
