// handlers/payment_handlers.rs
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use validator::Validate;

use crate::dtos::payment_dtos::SubmitPaymentRequest;
use crate::errors::{AppError, Result};
use crate::handlers::merchant_handlers::find_merchant;
use crate::models::intent::PaymentIntent;
use crate::models::rate::CurrencyPair;
use crate::state::AppState;

pub async fn submit_payment(
    State(state): State<AppState>,
    Json(request): Json<SubmitPaymentRequest>,
) -> Result<Json<Value>> {
    request.validate()?;

    let merchant = find_merchant(&state.db, &request.merchant_id).await?;

    let rail = match request.rail {
        Some(rail) => rail,
        None => state
            .rails
            .default_rail(&merchant)
            .ok_or_else(|| AppError::InvalidRequest("merchant accepts no enabled rail".into()))?,
    };
    if !merchant.accepts(rail) {
        return Err(AppError::InvalidRequest(format!(
            "merchant does not accept {}",
            rail
        )));
    }

    let intent = PaymentIntent {
        idempotency_key: request.idempotency_key,
        merchant_id: merchant.id.clone(),
        amount: request.amount,
        pair: CurrencyPair::new(request.currency, merchant.currency.clone()),
        rail,
        round_up: request.round_up,
        payer_phone: request.payer_phone,
        created_at: Utc::now(),
    };

    info!(
        "Payment intent {} for merchant {} via {}",
        intent.idempotency_key, merchant.id, rail
    );
    let transaction = state.orchestrator.submit(intent).await?;

    Ok(Json(json!({
        "success": true,
        "transaction": transaction,
    })))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>> {
    let transaction = state.orchestrator.current_status(&key).await?;
    Ok(Json(json!({
        "success": true,
        "transaction": transaction,
    })))
}

pub async fn retry_payment(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>> {
    let transaction = state.orchestrator.retry(&key).await?;
    Ok(Json(json!({
        "success": true,
        "transaction": transaction,
    })))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>> {
    let cancelled = state.orchestrator.cancel(&key);
    if !cancelled {
        info!("Cancel for key {} found nothing in flight", key);
    }
    Ok(Json(json!({
        "success": true,
        "cancelled": cancelled,
    })))
}

// Daraja callback payload.
#[derive(Debug, Deserialize)]
pub struct MpesaCallback {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,

    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,

    #[serde(rename = "ResultCode")]
    pub result_code: i32,

    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

/// Supplements polling: resolves a parked settlement when the confirmation
/// arrives out of band. Always ACKs so Daraja stops re-delivering.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(payload): Json<MpesaCallback>,
) -> Json<Value> {
    let callback = payload.body.stk_callback;
    info!(
        "Daraja callback {} -> {}",
        callback.checkout_request_id, callback.result_code
    );

    if let Err(e) = state
        .orchestrator
        .apply_provider_result(
            &callback.checkout_request_id,
            callback.result_code == 0,
            &callback.result_desc,
        )
        .await
    {
        warn!(
            "Callback for {} not applied: {}",
            callback.checkout_request_id, e
        );
    }

    Json(json!({
        "ResultCode": 0,
        "ResultDesc": "Success"
    }))
}
