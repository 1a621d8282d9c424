// handlers/merchant_handlers.rs
use axum::{
    extract::{Path, State},
    Json,
};
use mongodb::bson::doc;
use mongodb::Database;
use serde_json::{json, Value};

use crate::errors::{AppError, Result};
use crate::models::merchant::Merchant;
use crate::state::AppState;

/// Scan/lookup resolution: till number or QR payload maps to a merchant id.
pub async fn find_merchant(db: &Database, id: &str) -> Result<Merchant> {
    let merchants = db.collection::<Merchant>("merchants");
    merchants
        .find_one(doc! { "id": id })
        .await?
        .ok_or_else(|| AppError::MerchantNotFound(id.to_string()))
}

pub async fn get_merchant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Merchant>> {
    let merchant = find_merchant(&state.db, &id).await?;
    Ok(Json(merchant))
}

/// Rails for the payment sheet's method selector, in priority order; the
/// first entry is the default selection.
pub async fn merchant_rails(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let merchant = find_merchant(&state.db, &id).await?;
    let rails = state.rails.list_rails(&merchant);
    let default = rails.first().map(|r| r.id);
    Ok(Json(json!({
        "merchant_id": merchant.id,
        "rails": rails,
        "default": default,
    })))
}
