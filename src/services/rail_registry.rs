// services/rail_registry.rs
use crate::models::merchant::Merchant;
use crate::models::rail::{Rail, RailCapabilities, RailId};

/// Declares the settlement rails the platform can drive and their capability
/// metadata. Order is registry priority: local mobile-money rails ahead of
/// global card rails, reflecting the preference for local settlement.
pub struct RailRegistry {
    rails: Vec<Rail>,
}

impl RailRegistry {
    pub fn new(rails: Vec<Rail>) -> Self {
        let mut rails = rails;
        rails.sort_by_key(|r| r.priority);
        Self { rails }
    }

    pub fn with_default_rails() -> Self {
        Self::new(vec![
            Rail {
                id: RailId::Mpesa,
                display_name: "M-Pesa".to_string(),
                priority: 0,
                enabled: true,
                capabilities: RailCapabilities {
                    requires_online: true,
                    supports_push: true,
                    currencies: vec!["KES".to_string()],
                },
            },
            Rail {
                id: RailId::AirtelMoney,
                display_name: "Airtel Money".to_string(),
                priority: 1,
                enabled: true,
                capabilities: RailCapabilities {
                    requires_online: true,
                    supports_push: true,
                    currencies: vec!["KES".to_string(), "UGX".to_string(), "TZS".to_string()],
                },
            },
            Rail {
                id: RailId::Card,
                display_name: "Card".to_string(),
                priority: 10,
                enabled: true,
                capabilities: RailCapabilities {
                    requires_online: true,
                    supports_push: false,
                    currencies: vec!["KES".to_string(), "USD".to_string(), "EUR".to_string()],
                },
            },
        ])
    }

    /// Rails both globally enabled and accepted by the merchant, in priority
    /// order. The first entry is the default selection for the payment sheet.
    pub fn list_rails(&self, merchant: &Merchant) -> Vec<Rail> {
        self.rails
            .iter()
            .filter(|r| r.enabled && merchant.accepts(r.id))
            .cloned()
            .collect()
    }

    pub fn default_rail(&self, merchant: &Merchant) -> Option<RailId> {
        self.list_rails(merchant).first().map(|r| r.id)
    }

    pub fn get(&self, id: RailId) -> Option<&Rail> {
        self.rails.iter().find(|r| r.id == id && r.enabled)
    }

    pub fn capabilities(&self, id: RailId) -> Option<&RailCapabilities> {
        self.get(id).map(|r| &r.capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merchant(rails: Vec<RailId>) -> Merchant {
        Merchant {
            id: "m-123".to_string(),
            name: "Mama Oliech's Fish Kitchen".to_string(),
            category: "Dining".to_string(),
            location: "Dagoretti North, Nairobi".to_string(),
            rating: 4.8,
            is_verified: true,
            is_eco: true,
            currency: "KES".to_string(),
            accepted_rails: rails,
            cultural_tip: None,
        }
    }

    #[test]
    fn mobile_money_sorts_before_card() {
        let registry = RailRegistry::with_default_rails();
        let listed = registry.list_rails(&merchant(vec![RailId::Card, RailId::Mpesa]));

        let ids: Vec<RailId> = listed.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RailId::Mpesa, RailId::Card]);
        assert_eq!(
            registry.default_rail(&merchant(vec![RailId::Card, RailId::Mpesa])),
            Some(RailId::Mpesa)
        );
    }

    #[test]
    fn listing_filters_to_merchant_accepted_rails() {
        let registry = RailRegistry::with_default_rails();
        let listed = registry.list_rails(&merchant(vec![RailId::Card]));

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, RailId::Card);
    }

    #[test]
    fn disabled_rails_are_never_listed() {
        let mut rails = RailRegistry::with_default_rails().rails;
        for r in &mut rails {
            if r.id == RailId::Mpesa {
                r.enabled = false;
            }
        }
        let registry = RailRegistry::new(rails);

        let listed = registry.list_rails(&merchant(vec![RailId::Mpesa, RailId::Card]));
        let ids: Vec<RailId> = listed.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RailId::Card]);
        assert!(registry.get(RailId::Mpesa).is_none());
    }

    #[test]
    fn capabilities_expose_push_support() {
        let registry = RailRegistry::with_default_rails();
        assert!(registry.capabilities(RailId::Mpesa).unwrap().supports_push);
        assert!(!registry.capabilities(RailId::Card).unwrap().supports_push);
    }
}
