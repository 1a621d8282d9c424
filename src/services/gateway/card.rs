// services/gateway/card.rs
use async_trait::async_trait;
use reqwest::{header, Client};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::models::intent::{PaymentIntent, SettlementSnapshot};
use crate::models::rail::RailId;
use crate::services::gateway::{
    GatewayError, GatewayResult, PaymentGateway, PendingSettlement, SettlementStatus,
};

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    id: String,
    status: String,
    #[serde(default)]
    response_summary: Option<String>,
}

/// Card-network gateway. Charges the traveler's card on file at the PSP;
/// no out-of-band confirmation, so most charges resolve on the first poll.
pub struct CardGateway {
    config: AppConfig,
    client: Client,
}

impl CardGateway {
    pub fn new(config: AppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        CardGateway { config, client }
    }

    /// PSP amounts are in minor units of the charged currency.
    fn minor_units(amount: Decimal) -> GatewayResult<i64> {
        (amount * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| GatewayError::InvalidRequest(format!("amount out of range: {}", amount)))
    }

    fn map_status(status: &str, summary: Option<String>) -> SettlementStatus {
        match status {
            "Authorized" | "Captured" | "Paid" => SettlementStatus::Success,
            "Pending" => SettlementStatus::Pending,
            other => SettlementStatus::Failed(
                summary.unwrap_or_else(|| format!("card charge {}", other.to_lowercase())),
            ),
        }
    }
}

#[async_trait]
impl PaymentGateway for CardGateway {
    fn rail(&self) -> RailId {
        RailId::Card
    }

    async fn initiate(
        &self,
        intent: &PaymentIntent,
        snapshot: &SettlementSnapshot,
    ) -> GatewayResult<PendingSettlement> {
        // Cards charge the traveler in home currency; FX settles behind the
        // scheme, so the charged amount is the round-up-inclusive total.
        let amount = Self::minor_units(snapshot.total_charged)?;
        if amount <= 0 {
            return Err(GatewayError::InvalidRequest("amount must be greater than 0".into()));
        }

        info!(
            "Card charge for {} {} ({})",
            snapshot.pair.base, snapshot.total_charged, intent.idempotency_key
        );

        let body = json!({
            "amount": amount,
            "currency": snapshot.pair.base,
            "reference": intent.idempotency_key,
            "capture": true,
        });

        let response = self
            .client
            .post(format!("{}/payments", self.config.card_base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.config.card_api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("card charge: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Card charge failed: {} - {}", status, body);
            if status.is_client_error() {
                return Err(GatewayError::InvalidRequest(format!(
                    "card charge rejected: {}",
                    body
                )));
            }
            return Err(GatewayError::Unavailable(format!(
                "card charge failed: {}",
                status
            )));
        }

        let charge: ChargeResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("card charge body: {}", e)))?;

        if let SettlementStatus::Failed(reason) =
            Self::map_status(&charge.status, charge.response_summary.clone())
        {
            return Err(GatewayError::Declined(reason));
        }

        Ok(PendingSettlement {
            reference: charge.id,
            poll_interval: Duration::from_millis(500),
        })
    }

    async fn poll(&self, reference: &str) -> GatewayResult<SettlementStatus> {
        let response = self
            .client
            .get(format!("{}/payments/{}", self.config.card_base_url, reference))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.config.card_api_key))
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("card status: {}", e)))?;

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "card status failed: {}",
                response.status()
            )));
        }

        let charge: ChargeResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("card status body: {}", e)))?;

        Ok(Self::map_status(&charge.status, charge.response_summary))
    }
}
