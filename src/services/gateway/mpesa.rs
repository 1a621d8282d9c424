// services/gateway/mpesa.rs
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Utc;
use reqwest::{header, Client};
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::models::intent::{PaymentIntent, SettlementSnapshot};
use crate::models::rail::RailId;
use crate::services::gateway::{
    GatewayError, GatewayResult, PaymentGateway, PendingSettlement, SettlementStatus,
};

// Daraja errorCode for a push still awaiting the payer's PIN entry.
const PROCESSING_ERROR_CODE: &str = "500.001.1001";

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[allow(dead_code)]
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "TransactionType")]
    transaction_type: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "PartyA")]
    party_a: String,
    #[serde(rename = "PartyB")]
    party_b: String,
    #[serde(rename = "PhoneNumber")]
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    callback_url: String,
    #[serde(rename = "AccountReference")]
    account_reference: String,
    #[serde(rename = "TransactionDesc")]
    transaction_desc: String,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    #[allow(dead_code)]
    merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    response_code: String,
    #[serde(rename = "ResponseDescription")]
    response_description: String,
}

#[derive(Debug, Serialize)]
struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
}

#[derive(Debug, Deserialize)]
struct StkQueryResponse {
    #[serde(rename = "ResultCode")]
    result_code: String,
    #[serde(rename = "ResultDesc")]
    result_desc: String,
}

/// Daraja (M-Pesa) STK-push gateway. `initiate` fires the PIN prompt on the
/// payer's handset and returns the CheckoutRequestID; `poll` drives the
/// STK query API until the payer confirms or rejects.
pub struct MpesaGateway {
    config: AppConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<(String, chrono::DateTime<Utc>)>>>,
}

impl MpesaGateway {
    pub fn new(config: AppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        MpesaGateway {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    fn format_phone_number(phone: &str) -> String {
        let phone = phone.trim();
        if phone.starts_with("254") && phone.len() == 12 {
            return phone.to_string();
        }
        if phone.starts_with("07") && phone.len() == 10 {
            return format!("254{}", &phone[1..]);
        }
        if phone.starts_with("7") && phone.len() == 9 {
            return format!("254{}", phone);
        }
        phone.to_string()
    }

    fn generate_password(&self, timestamp: &str) -> String {
        let password_string = format!(
            "{}{}{}",
            self.config.mpesa_short_code, self.config.mpesa_passkey, timestamp
        );
        base64.encode(password_string)
    }

    async fn get_access_token(&self) -> GatewayResult<String> {
        {
            let cached = self.cached_token.read().unwrap();
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new Daraja access token");
        let auth_string = format!(
            "{}:{}",
            self.config.mpesa_consumer_key, self.config.mpesa_consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let (auth_url, _, _) = self.config.mpesa_urls();

        let response = self
            .client
            .get(&auth_url)
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Daraja auth: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            error!("Failed to get Daraja access token: {}", status);
            return Err(GatewayError::Unavailable(format!(
                "Daraja auth failed: {}",
                status
            )));
        }

        let auth_response: AuthResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Daraja auth body: {}", e)))?;

        {
            let expiry_time = Utc::now() + chrono::Duration::hours(1);
            let mut cached = self.cached_token.write().unwrap();
            *cached = Some((auth_response.access_token.clone(), expiry_time));
        }

        Ok(auth_response.access_token)
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    fn rail(&self) -> RailId {
        RailId::Mpesa
    }

    async fn initiate(
        &self,
        intent: &PaymentIntent,
        snapshot: &SettlementSnapshot,
    ) -> GatewayResult<PendingSettlement> {
        let phone = intent
            .payer_phone
            .as_deref()
            .ok_or_else(|| GatewayError::InvalidRequest("payer phone required for STK push".into()))?;

        // Daraja takes whole-shilling amounts.
        let amount = snapshot
            .local_amount
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        if amount <= rust_decimal::Decimal::ZERO {
            return Err(GatewayError::InvalidRequest("amount must be greater than 0".into()));
        }

        let access_token = self.get_access_token().await?;
        let formatted_phone = Self::format_phone_number(phone);
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        let (_, stk_url, _) = self.config.mpesa_urls();

        info!("STK push for {} - KSh {}", formatted_phone, amount);

        let stk_request = StkPushRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: amount.to_string(),
            party_a: formatted_phone.clone(),
            party_b: self.config.mpesa_short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.mpesa_callback_url.clone(),
            account_reference: intent.merchant_id.clone(),
            transaction_desc: format!("FotiPay {}", intent.idempotency_key),
        };

        let response = self
            .client
            .post(&stk_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&stk_request)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("STK push: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("STK push failed: {} - {}", status, body);
            if status.is_client_error() {
                return Err(GatewayError::InvalidRequest(format!(
                    "STK push rejected: {}",
                    body
                )));
            }
            return Err(GatewayError::Unavailable(format!("STK push failed: {}", status)));
        }

        let stk_response: StkPushResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("STK push body: {}", e)))?;

        if stk_response.response_code != "0" {
            return Err(GatewayError::Declined(stk_response.response_description));
        }

        info!("STK push accepted: {}", stk_response.checkout_request_id);
        Ok(PendingSettlement {
            reference: stk_response.checkout_request_id,
            poll_interval: Duration::from_secs(2),
        })
    }

    async fn poll(&self, reference: &str) -> GatewayResult<SettlementStatus> {
        let access_token = self.get_access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        let (_, _, query_url) = self.config.mpesa_urls();

        let query = StkQueryRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            checkout_request_id: reference.to_string(),
        };

        let response = self
            .client
            .post(&query_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&query)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("STK query: {}", e)))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            // Daraja reports a still-running push as an "error" body.
            if body.contains(PROCESSING_ERROR_CODE) {
                return Ok(SettlementStatus::Pending);
            }
            return Err(GatewayError::Unavailable(format!("STK query failed: {}", body)));
        }

        let query_response: StkQueryResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("STK query body: {}", e)))?;

        match query_response.result_code.as_str() {
            "0" => Ok(SettlementStatus::Success),
            _ => Ok(SettlementStatus::Failed(query_response.result_desc)),
        }
    }
}
