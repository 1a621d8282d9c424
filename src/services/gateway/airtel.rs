// services/gateway/airtel.rs
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client};
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::models::intent::{PaymentIntent, SettlementSnapshot};
use crate::models::rail::RailId;
use crate::services::gateway::{
    GatewayError, GatewayResult, PaymentGateway, PendingSettlement, SettlementStatus,
};

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct PushStatus {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    status: PushStatus,
}

#[derive(Debug, Deserialize)]
struct EnquiryTransaction {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnquiryData {
    transaction: EnquiryTransaction,
}

#[derive(Debug, Deserialize)]
struct EnquiryResponse {
    data: EnquiryData,
}

/// Airtel Money collections gateway. Same push-confirmation contract as the
/// Daraja rail, driven through the Airtel Africa Open API.
pub struct AirtelGateway {
    config: AppConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<(String, chrono::DateTime<Utc>)>>>,
}

impl AirtelGateway {
    pub fn new(config: AppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        AirtelGateway {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    async fn get_access_token(&self) -> GatewayResult<String> {
        {
            let cached = self.cached_token.read().unwrap();
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::minutes(1) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new Airtel access token");
        let response = self
            .client
            .post(format!("{}/auth/oauth2/token", self.config.airtel_base_url))
            .json(&TokenRequest {
                client_id: &self.config.airtel_client_id,
                client_secret: &self.config.airtel_client_secret,
                grant_type: "client_credentials",
            })
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Airtel auth: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            error!("Failed to get Airtel access token: {}", status);
            return Err(GatewayError::Unavailable(format!(
                "Airtel auth failed: {}",
                status
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Airtel auth body: {}", e)))?;

        {
            let expiry = Utc::now() + chrono::Duration::seconds(token.expires_in as i64);
            let mut cached = self.cached_token.write().unwrap();
            *cached = Some((token.access_token.clone(), expiry));
        }

        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentGateway for AirtelGateway {
    fn rail(&self) -> RailId {
        RailId::AirtelMoney
    }

    async fn initiate(
        &self,
        intent: &PaymentIntent,
        snapshot: &SettlementSnapshot,
    ) -> GatewayResult<PendingSettlement> {
        let phone = intent
            .payer_phone
            .as_deref()
            .ok_or_else(|| GatewayError::InvalidRequest("payer phone required for push".into()))?;

        let amount = snapshot
            .local_amount
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        if amount <= rust_decimal::Decimal::ZERO {
            return Err(GatewayError::InvalidRequest("amount must be greater than 0".into()));
        }

        let access_token = self.get_access_token().await?;
        // Airtel keys the poll on the caller-supplied transaction id.
        let reference = intent.idempotency_key.clone();

        info!("Airtel push for {} - {} {}", phone, snapshot.pair.quote, amount);

        let body = json!({
            "reference": intent.merchant_id,
            "subscriber": {
                "country": self.config.airtel_country,
                "currency": snapshot.pair.quote,
                "msisdn": phone,
            },
            "transaction": {
                "amount": amount.to_string(),
                "country": self.config.airtel_country,
                "currency": snapshot.pair.quote,
                "id": reference,
            },
        });

        let response = self
            .client
            .post(format!("{}/merchant/v1/payments/", self.config.airtel_base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header("X-Country", &self.config.airtel_country)
            .header("X-Currency", &snapshot.pair.quote)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Airtel push: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Airtel push failed: {} - {}", status, body);
            if status.is_client_error() {
                return Err(GatewayError::InvalidRequest(format!(
                    "Airtel push rejected: {}",
                    body
                )));
            }
            return Err(GatewayError::Unavailable(format!(
                "Airtel push failed: {}",
                status
            )));
        }

        let push: PushResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Airtel push body: {}", e)))?;

        if !push.status.success {
            return Err(GatewayError::Declined(push.status.message));
        }

        Ok(PendingSettlement {
            reference,
            poll_interval: Duration::from_secs(2),
        })
    }

    async fn poll(&self, reference: &str) -> GatewayResult<SettlementStatus> {
        let access_token = self.get_access_token().await?;

        let response = self
            .client
            .get(format!(
                "{}/standard/v1/payments/{}",
                self.config.airtel_base_url, reference
            ))
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header("X-Country", &self.config.airtel_country)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Airtel enquiry: {}", e)))?;

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "Airtel enquiry failed: {}",
                response.status()
            )));
        }

        let enquiry: EnquiryResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Airtel enquiry body: {}", e)))?;

        // TIP = transaction in process, TS = success, TF = failed.
        match enquiry.data.transaction.status.as_str() {
            "TIP" => Ok(SettlementStatus::Pending),
            "TS" => Ok(SettlementStatus::Success),
            other => Ok(SettlementStatus::Failed(
                enquiry
                    .data
                    .transaction
                    .message
                    .unwrap_or_else(|| format!("Airtel status {}", other)),
            )),
        }
    }
}
