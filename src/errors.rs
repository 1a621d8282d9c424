// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("No exchange rate available for {0}")]
    RateUnavailable(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment declined: {0}")]
    Declined(String),

    #[error("Invalid payment request: {0}")]
    InvalidRequest(String),

    #[error("Settlement timed out after {0} seconds")]
    Timeout(u64),

    #[error("Offline queue storage failure: {0}")]
    StorageFailure(String),

    #[error("Invalid transaction transition: {0}")]
    InvalidTransition(String),

    #[error("Merchant not found: {0}")]
    MerchantNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Unknown settlement rail: {0}")]
    UnknownRail(String),

    #[error("Settlement already in flight for key {0}")]
    SettlementInFlight(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),
}

impl AppError {
    /// Action the client should suggest to the user for this failure.
    pub fn recommended_action(&self) -> Option<&'static str> {
        match self {
            AppError::GatewayUnavailable(_)
            | AppError::Timeout(_)
            | AppError::RateUnavailable(_)
            | AppError::StorageFailure(_) => Some("retry"),
            AppError::Declined(_) => Some("contact_support"),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::MongoDB(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string()),
            AppError::RateUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "Exchange rate unavailable".to_string()),
            AppError::GatewayUnavailable(_) => (StatusCode::BAD_GATEWAY, "Payment gateway unavailable".to_string()),
            AppError::Declined(_) => (StatusCode::PAYMENT_REQUIRED, "Payment declined".to_string()),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "Invalid payment request".to_string()),
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "Settlement timed out".to_string()),
            AppError::StorageFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Offline queue failure".to_string()),
            AppError::InvalidTransition(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal state error".to_string()),
            AppError::MerchantNotFound(_) => (StatusCode::NOT_FOUND, "Merchant not found".to_string()),
            AppError::TransactionNotFound(_) => (StatusCode::NOT_FOUND, "Transaction not found".to_string()),
            AppError::UnknownRail(_) => (StatusCode::BAD_REQUEST, "Unknown settlement rail".to_string()),
            AppError::SettlementInFlight(_) => (StatusCode::CONFLICT, "Settlement already in progress".to_string()),
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "Validation failed".to_string()),
            AppError::ConfigurationError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error".to_string()),
            AppError::HttpClientError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "HTTP client error".to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
            "action": self.recommended_action(),
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

// Manual From implementations
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError(format!("JSON parsing error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::HttpClientError(format!("HTTP request failed: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

// Helper conversion functions
impl AppError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        AppError::InvalidRequest(msg.into())
    }

    pub fn gateway(msg: impl Into<String>) -> Self {
        AppError::GatewayUnavailable(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        AppError::StorageFailure(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::ConfigurationError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
