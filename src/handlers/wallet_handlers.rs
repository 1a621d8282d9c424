// handlers/wallet_handlers.rs
use axum::{
    extract::{Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::dtos::payment_dtos::RateQuery;
use crate::errors::Result;
use crate::models::rate::CurrencyPair;
use crate::models::transaction::TxStatus;
use crate::state::AppState;

const HISTORY_LIMIT: i64 = 100;

/// History projection for the wallet dashboard: the store owns the ledger,
/// the UI only ever reads this view.
pub async fn list_transactions(State(state): State<AppState>) -> Result<Json<Value>> {
    let transactions = state.store.list_recent(HISTORY_LIMIT).await?;

    let mut total_spent = Decimal::ZERO;
    let mut total_donated = Decimal::ZERO;
    let mut queued = 0usize;
    for tx in &transactions {
        match tx.status {
            TxStatus::Completed => {
                total_spent += tx.home_amount;
                total_donated += tx.donation;
            }
            TxStatus::Queued => queued += 1,
            TxStatus::Failed => {}
        }
    }

    Ok(Json(json!({
        "success": true,
        "transactions": transactions,
        "total_spent": total_spent,
        "total_donated": total_donated,
        "queued_count": queued,
    })))
}

/// Quote for the payment sheet's FX breakdown widget.
pub async fn get_rate(
    State(state): State<AppState>,
    Query(query): Query<RateQuery>,
) -> Result<Json<Value>> {
    let pair = CurrencyPair::new(query.base, query.quote);
    let quote = state.fx.quote(&pair).await?;
    Ok(Json(json!({
        "success": true,
        "quote": quote,
    })))
}
