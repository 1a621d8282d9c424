// dtos/payment_dtos.rs
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

use crate::models::rail::RailId;

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitPaymentRequest {
    #[validate(length(min = 1))]
    pub merchant_id: String,

    /// Amount in the traveler's home currency.
    pub amount: Decimal,

    /// Traveler home currency, ISO 4217.
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Defaults to the merchant's highest-priority rail when omitted.
    pub rail: Option<RailId>,

    #[serde(default)]
    pub round_up: bool,

    /// Client-generated, unique per user action.
    #[validate(length(min = 8, max = 64))]
    pub idempotency_key: String,

    /// Required for push rails.
    pub payer_phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RateQuery {
    pub base: String,
    pub quote: String,
}
