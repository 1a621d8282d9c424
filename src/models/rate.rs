// models/rate.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// A quoted exchange rate with a validity window. Stale quotes must be
/// re-fetched before settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotedRate {
    pub pair: CurrencyPair,
    pub rate: Decimal,
    pub quoted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl QuotedRate {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
