// services/fx_service.rs
use chrono::{Duration, Utc};
use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::models::rate::{CurrencyPair, QuotedRate};

#[derive(Debug, Deserialize)]
struct RateResponse {
    rates: HashMap<String, Decimal>,
}

/// Converts traveler home currency to merchant local currency off a quoted
/// rate, and derives the round-up donation. Quotes are cached per pair for
/// the configured validity window; expired quotes are re-fetched before any
/// settlement uses them.
pub struct FxConverter {
    client: Client,
    source_url: String,
    ttl: Duration,
    cache: RwLock<HashMap<CurrencyPair, QuotedRate>>,
}

impl FxConverter {
    pub fn new(client: Client, source_url: String, ttl_secs: u64) -> Self {
        Self {
            client,
            source_url,
            ttl: Duration::seconds(ttl_secs as i64),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn quote(&self, pair: &CurrencyPair) -> Result<QuotedRate> {
        {
            let cache = self.cache.read().unwrap();
            if let Some(quote) = cache.get(pair) {
                if !quote.is_expired(Utc::now()) {
                    return Ok(quote.clone());
                }
            }
        }

        let quote = self.fetch(pair).await?;
        info!("Quoted {} = {}", pair, quote.rate);

        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(pair.clone(), quote.clone());
        }

        Ok(quote)
    }

    async fn fetch(&self, pair: &CurrencyPair) -> Result<QuotedRate> {
        let url = format!(
            "{}?base={}&symbols={}",
            self.source_url, pair.base, pair.quote
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                warn!("Rate fetch failed for {}: {}", pair, e);
                AppError::RateUnavailable(pair.to_string())
            })?;

        if !response.status().is_success() {
            warn!("Rate source returned {} for {}", response.status(), pair);
            return Err(AppError::RateUnavailable(pair.to_string()));
        }

        let body: RateResponse = response
            .json()
            .await
            .map_err(|_| AppError::RateUnavailable(pair.to_string()))?;

        let rate = body
            .rates
            .get(&pair.quote)
            .copied()
            .ok_or_else(|| AppError::RateUnavailable(pair.to_string()))?;

        let now = Utc::now();
        Ok(QuotedRate {
            pair: pair.clone(),
            rate,
            quoted_at: now,
            expires_at: now + self.ttl,
        })
    }

    /// Pure conversion: half-up to 2 decimal places for currency display.
    pub fn convert(amount: Decimal, rate: &QuotedRate) -> Decimal {
        (amount * rate.rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Donation derived from rounding the home amount up to the next whole
    /// unit. Zero for integral amounts and for sub-cent remainders.
    pub fn round_up(amount: Decimal) -> Decimal {
        let donation = amount.ceil() - amount;
        if donation < Decimal::new(1, 2) {
            Decimal::ZERO
        } else {
            donation
        }
    }

    #[cfg(test)]
    pub(crate) fn prime(&self, quote: QuotedRate) {
        self.cache.write().unwrap().insert(quote.pair.clone(), quote);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd_kes(rate: Decimal, ttl_secs: i64) -> QuotedRate {
        let now = Utc::now();
        QuotedRate {
            pair: CurrencyPair::new("USD", "KES"),
            rate,
            quoted_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    #[test]
    fn round_up_is_zero_for_integral_amounts() {
        assert_eq!(FxConverter::round_up(dec!(45.00)), Decimal::ZERO);
        assert_eq!(FxConverter::round_up(dec!(7)), Decimal::ZERO);
    }

    #[test]
    fn round_up_tops_to_next_whole_unit() {
        assert_eq!(FxConverter::round_up(dec!(12.30)), dec!(0.70));
        assert_eq!(FxConverter::round_up(dec!(0.01)), dec!(0.99));
    }

    #[test]
    fn round_up_clamps_sub_cent_remainders() {
        assert_eq!(FxConverter::round_up(dec!(4.995)), Decimal::ZERO);
    }

    #[test]
    fn convert_rounds_half_up() {
        let quote = usd_kes(dec!(129.50), 300);
        assert_eq!(FxConverter::convert(dec!(45.00), &quote), dec!(5827.50));

        let odd = usd_kes(dec!(129.505), 300);
        // 1.00 * 129.505 -> 129.51 under half-up
        assert_eq!(FxConverter::convert(dec!(1.00), &odd), dec!(129.51));
    }

    #[tokio::test]
    async fn quote_serves_from_cache_within_window() {
        let fx = FxConverter::new(Client::new(), "http://127.0.0.1:9".into(), 300);
        fx.prime(usd_kes(dec!(129.50), 300));

        let quote = fx.quote(&CurrencyPair::new("USD", "KES")).await.unwrap();
        assert_eq!(quote.rate, dec!(129.50));
    }

    #[tokio::test]
    async fn expired_quote_is_refetched_not_served() {
        let fx = FxConverter::new(Client::new(), "http://127.0.0.1:9".into(), 300);
        fx.prime(usd_kes(dec!(129.50), -1));

        // The stale quote must not be served; with no reachable source the
        // refetch surfaces RateUnavailable.
        let err = fx.quote(&CurrencyPair::new("USD", "KES")).await.unwrap_err();
        assert!(matches!(err, AppError::RateUnavailable(_)));
    }
}
