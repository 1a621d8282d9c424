use axum::{routing::get, Router};

use crate::handlers::merchant_handlers;
use crate::state::AppState;

pub fn merchant_routes() -> Router<AppState> {
    Router::new()
        .route("/:id", get(merchant_handlers::get_merchant))
        .route("/:id/rails", get(merchant_handlers::merchant_rails))
}
