// config.rs
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Daraja (M-Pesa)
    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_short_code: String,
    pub mpesa_passkey: String,
    pub mpesa_callback_url: String,
    pub mpesa_environment: String,

    // Airtel Money
    pub airtel_client_id: String,
    pub airtel_client_secret: String,
    pub airtel_base_url: String,
    pub airtel_country: String,

    // Card network (PSP)
    pub card_api_key: String,
    pub card_base_url: String,

    // FX rate source
    pub fx_source_url: String,
    pub fx_quote_ttl_secs: u64,

    // Connectivity probe
    pub probe_url: String,
    pub probe_interval_secs: u64,

    // Settlement
    pub settle_timeout_secs: u64,
    pub retry_backoff_ms: u64,

    pub database_url: String,
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mpesa_environment =
            env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string());

        AppConfig {
            mpesa_consumer_key: env::var("MPESA_CONSUMER_KEY")
                .expect("MPESA_CONSUMER_KEY must be set"),
            mpesa_consumer_secret: env::var("MPESA_CONSUMER_SECRET")
                .expect("MPESA_CONSUMER_SECRET must be set"),
            mpesa_short_code: env::var("MPESA_SHORT_CODE")
                .expect("MPESA_SHORT_CODE must be set"),
            mpesa_passkey: env::var("MPESA_PASSKEY")
                .expect("MPESA_PASSKEY must be set"),
            mpesa_callback_url: env::var("MPESA_CALLBACK_URL")
                .expect("MPESA_CALLBACK_URL must be set"),
            mpesa_environment,

            airtel_client_id: env::var("AIRTEL_CLIENT_ID").unwrap_or_default(),
            airtel_client_secret: env::var("AIRTEL_CLIENT_SECRET").unwrap_or_default(),
            airtel_base_url: env::var("AIRTEL_BASE_URL")
                .unwrap_or_else(|_| "https://openapiuat.airtel.africa".to_string()),
            airtel_country: env::var("AIRTEL_COUNTRY").unwrap_or_else(|_| "KE".to_string()),

            card_api_key: env::var("CARD_API_KEY").unwrap_or_default(),
            card_base_url: env::var("CARD_BASE_URL")
                .unwrap_or_else(|_| "https://api.sandbox.checkout.com".to_string()),

            fx_source_url: env::var("FX_SOURCE_URL")
                .unwrap_or_else(|_| "https://api.exchangerate.host/latest".to_string()),
            fx_quote_ttl_secs: env::var("FX_QUOTE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),

            probe_url: env::var("PROBE_URL")
                .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string()),
            probe_interval_secs: env::var("PROBE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),

            settle_timeout_secs: env::var("SETTLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            retry_backoff_ms: env::var("RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),

            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("PORT must be a number"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        }
    }

    pub fn mpesa_base_url(&self) -> &'static str {
        if self.mpesa_environment == "production" {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        }
    }

    pub fn mpesa_urls(&self) -> (String, String, String) {
        let base_url = self.mpesa_base_url();
        let auth_url = format!("{}/oauth/v1/generate?grant_type=client_credentials", base_url);
        let stk_url = format!("{}/mpesa/stkpush/v1/processrequest", base_url);
        let query_url = format!("{}/mpesa/stkpushquery/v1/query", base_url);
        (auth_url, stk_url, query_url)
    }

    pub fn is_production(&self) -> bool {
        self.mpesa_environment == "production"
    }
}
