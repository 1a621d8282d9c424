use axum::{routing::get, Router};

use crate::handlers::wallet_handlers;
use crate::state::AppState;

pub fn wallet_routes() -> Router<AppState> {
    Router::new()
        .route("/transactions", get(wallet_handlers::list_transactions))
        .route("/rates", get(wallet_handlers::get_rate))
}
