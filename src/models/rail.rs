// models/rail.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Settlement rail identifier. Local mobile-money rails settle through
/// push-confirmation providers; card rails go through the PSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RailId {
    Mpesa,
    AirtelMoney,
    Card,
}

impl fmt::Display for RailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RailId::Mpesa => write!(f, "MPESA"),
            RailId::AirtelMoney => write!(f, "AIRTEL_MONEY"),
            RailId::Card => write!(f, "CARD"),
        }
    }
}

impl FromStr for RailId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MPESA" => Ok(RailId::Mpesa),
            "AIRTEL_MONEY" | "AIRTEL" => Ok(RailId::AirtelMoney),
            "CARD" | "VISA" => Ok(RailId::Card),
            other => Err(format!("unknown rail: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailCapabilities {
    /// Rail cannot settle without live connectivity to the provider.
    pub requires_online: bool,
    /// Settlement is confirmed out-of-band on the payer's handset (STK-style).
    pub supports_push: bool,
    /// Local currencies this rail can credit.
    pub currencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rail {
    pub id: RailId,
    pub display_name: String,
    /// Lower sorts first. Local mobile-money rails are declared ahead of
    /// global card rails.
    pub priority: u8,
    pub enabled: bool,
    pub capabilities: RailCapabilities,
}
