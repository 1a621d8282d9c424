// models/merchant.rs
use serde::{Deserialize, Serialize};

use crate::models::rail::RailId;

/// A scanned payee. Immutable once resolved; sourced from the scan/lookup
/// service and served here from the read-only `merchants` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: String,
    pub name: String,
    pub category: String,
    pub location: String,
    pub rating: f32,
    pub is_verified: bool,
    pub is_eco: bool,
    /// Local currency the merchant is credited in.
    pub currency: String,
    pub accepted_rails: Vec<RailId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cultural_tip: Option<String>,
}

impl Merchant {
    pub fn accepts(&self, rail: RailId) -> bool {
        self.accepted_rails.contains(&rail)
    }
}
