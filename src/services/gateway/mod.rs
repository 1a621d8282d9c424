// services/gateway/mod.rs
pub mod airtel;
pub mod card;
pub mod mpesa;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::models::intent::{PaymentIntent, SettlementSnapshot};
use crate::models::rail::RailId;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network or provider outage. Safe to retry.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    /// The payer or the provider rejected the charge. Terminal.
    #[error("Declined: {0}")]
    Declined(String),

    /// Malformed amount, currency or MSISDN. Terminal, not retryable.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Returned by a successful initiation. Push rails have already fired the
/// out-of-band handset prompt at this point; the reference tracks it.
#[derive(Debug, Clone)]
pub struct PendingSettlement {
    pub reference: String,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementStatus {
    Pending,
    Success,
    Failed(String),
}

/// One implementation per settlement rail. Both calls are non-blocking:
/// `initiate` returns as soon as the provider accepts the charge for
/// processing, and the orchestrator owns polling cadence and the overall
/// timeout.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn rail(&self) -> RailId;

    async fn initiate(
        &self,
        intent: &PaymentIntent,
        snapshot: &SettlementSnapshot,
    ) -> GatewayResult<PendingSettlement>;

    async fn poll(&self, reference: &str) -> GatewayResult<SettlementStatus>;
}
