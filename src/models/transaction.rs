// models/transaction.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::intent::{PaymentIntent, SettlementSnapshot};
use crate::models::rail::RailId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Completed,
    Queued,
    Failed,
}

impl TxStatus {
    /// The only legal in-place update is resolving a queued settlement.
    /// Completed is never reversed; Failed is superseded by a fresh attempt,
    /// not mutated.
    pub fn can_transition_to(self, target: TxStatus) -> bool {
        matches!(
            (self, target),
            (TxStatus::Queued, TxStatus::Completed) | (TxStatus::Queued, TxStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Completed | TxStatus::Failed)
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxStatus::Completed => write!(f, "COMPLETED"),
            TxStatus::Queued => write!(f, "QUEUED"),
            TxStatus::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateUnavailable,
    GatewayUnavailable,
    Declined,
    InvalidRequest,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Retry,
    ContactSupport,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub message: String,
    pub action: RecommendedAction,
}

impl FailureInfo {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        let action = match kind {
            FailureKind::GatewayUnavailable | FailureKind::Timeout | FailureKind::RateUnavailable => {
                RecommendedAction::Retry
            }
            FailureKind::Declined => RecommendedAction::ContactSupport,
            FailureKind::InvalidRequest => RecommendedAction::None,
        };
        Self {
            kind,
            message: message.into(),
            action,
        }
    }
}

/// The settled record. Append-only: once written, only the
/// Queued -> {Completed, Failed} resolution may touch it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub idempotency_key: String,
    pub merchant_id: String,
    pub rail: RailId,

    /// Total charged to the traveler (includes the round-up donation).
    pub home_amount: Decimal,
    pub donation: Decimal,
    /// Credited to the merchant in local currency.
    pub local_amount: Decimal,
    pub home_currency: String,
    pub local_currency: String,
    pub rate: Decimal,

    pub status: TxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    pub offline_queued: bool,

    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl Transaction {
    fn base(intent: &PaymentIntent, snapshot: &SettlementSnapshot, status: TxStatus) -> Self {
        Transaction {
            id: Uuid::new_v4(),
            idempotency_key: intent.idempotency_key.clone(),
            merchant_id: intent.merchant_id.clone(),
            rail: intent.rail,
            home_amount: snapshot.total_charged,
            donation: snapshot.donation,
            local_amount: snapshot.local_amount,
            home_currency: snapshot.pair.base.clone(),
            local_currency: snapshot.pair.quote.clone(),
            rate: snapshot.rate,
            status,
            payer_phone: intent.payer_phone.clone(),
            provider_reference: None,
            failure: None,
            offline_queued: false,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    pub fn completed(
        intent: &PaymentIntent,
        snapshot: &SettlementSnapshot,
        provider_reference: String,
    ) -> Self {
        let mut tx = Self::base(intent, snapshot, TxStatus::Completed);
        tx.provider_reference = Some(provider_reference);
        tx.settled_at = Some(Utc::now());
        tx
    }

    /// Queued while offline, or left pending after a user cancel; resolved
    /// later by reconciliation.
    pub fn queued(
        intent: &PaymentIntent,
        snapshot: &SettlementSnapshot,
        provider_reference: Option<String>,
        offline_queued: bool,
    ) -> Self {
        let mut tx = Self::base(intent, snapshot, TxStatus::Queued);
        tx.provider_reference = provider_reference;
        tx.offline_queued = offline_queued;
        tx
    }

    pub fn failed(
        intent: &PaymentIntent,
        snapshot: &SettlementSnapshot,
        failure: FailureInfo,
    ) -> Self {
        let mut tx = Self::base(intent, snapshot, TxStatus::Failed);
        tx.failure = Some(failure);
        tx.settled_at = Some(Utc::now());
        tx
    }
}
