// models/intent.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::rail::RailId;
use crate::models::rate::CurrencyPair;

/// The unit of work submitted to the orchestrator. Immutable after creation
/// and consumed exactly once — the idempotency key is checked against the
/// transaction store and the offline queue before any settlement attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Client-generated, unique per user action. Retries and offline replays
    /// reuse the same key so a charge can never land twice.
    pub idempotency_key: String,
    pub merchant_id: String,
    /// Requested amount in the traveler's home currency. Must be > 0.
    pub amount: Decimal,
    pub pair: CurrencyPair,
    pub rail: RailId,
    pub round_up: bool,
    /// Payer MSISDN, required by push rails for the handset confirmation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Amounts fixed at settlement time from a fresh quote. Queued intents carry
/// their snapshot so a later drain settles at the quoted rate, not a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementSnapshot {
    /// Credited to the merchant, in their local currency.
    pub local_amount: Decimal,
    /// Round-up donation in home currency; zero when round-up is off or the
    /// amount is already integral.
    pub donation: Decimal,
    /// Total charged to the traveler: amount + donation.
    pub total_charged: Decimal,
    pub rate: Decimal,
    pub pair: CurrencyPair,
}
