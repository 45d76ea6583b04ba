//! Static PayPal plan catalog
//!
//! Maps processor-side plan ids to entitlement tiers. The mapping is pure
//! configuration: plan ids are provisioned in the PayPal dashboard and wired
//! in through the environment. An id outside the catalog resolves to `None`,
//! which the state machine treats as "do not change tier".

use meetnotes_shared::Tier;

use crate::error::{BillingError, BillingResult};

/// PayPal billing plan ids for each paid tier
///
/// Tier hierarchy: Free (no plan) → Pro → Pro Plus. Annual variants are
/// optional and map to the same tier as their monthly counterpart.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    pub pro: String,
    pub pro_plus: String,
    pub pro_annual: Option<String>,
    pub pro_plus_annual: Option<String>,
}

impl PlanCatalog {
    /// Create catalog from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            pro: std::env::var("PAYPAL_PLAN_PRO")
                .map_err(|_| BillingError::Config("PAYPAL_PLAN_PRO not set".to_string()))?,
            pro_plus: std::env::var("PAYPAL_PLAN_PRO_PLUS")
                .map_err(|_| BillingError::Config("PAYPAL_PLAN_PRO_PLUS not set".to_string()))?,
            pro_annual: std::env::var("PAYPAL_PLAN_PRO_ANNUAL").ok(),
            pro_plus_annual: std::env::var("PAYPAL_PLAN_PRO_PLUS_ANNUAL").ok(),
        })
    }

    /// Get tier for a plan id (handles both monthly and annual plans)
    ///
    /// Returns `None` for unmapped ids; callers must not treat that as an
    /// error when reconciling webhook events.
    pub fn tier_for_plan_id(&self, plan_id: &str) -> Option<Tier> {
        if plan_id == self.pro {
            Some(Tier::Pro)
        } else if plan_id == self.pro_plus {
            Some(Tier::ProPlus)
        } else if self.pro_annual.as_deref() == Some(plan_id) {
            Some(Tier::Pro)
        } else if self.pro_plus_annual.as_deref() == Some(plan_id) {
            Some(Tier::ProPlus)
        } else {
            None
        }
    }

    /// Get plan id for a tier (monthly billing); Free has no plan
    pub fn plan_id_for_tier(&self, tier: Tier) -> Option<&str> {
        match tier {
            Tier::Free => None,
            Tier::Pro => Some(&self.pro),
            Tier::ProPlus => Some(&self.pro_plus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PlanCatalog {
        PlanCatalog {
            pro: "P-PRO-MONTHLY".to_string(),
            pro_plus: "P-PROPLUS-MONTHLY".to_string(),
            pro_annual: Some("P-PRO-ANNUAL".to_string()),
            pro_plus_annual: None,
        }
    }

    #[test]
    fn test_tier_for_plan_id() {
        let c = catalog();
        assert_eq!(c.tier_for_plan_id("P-PRO-MONTHLY"), Some(Tier::Pro));
        assert_eq!(c.tier_for_plan_id("P-PROPLUS-MONTHLY"), Some(Tier::ProPlus));
        assert_eq!(c.tier_for_plan_id("P-PRO-ANNUAL"), Some(Tier::Pro));
        assert_eq!(c.tier_for_plan_id("P-UNKNOWN"), None);
    }

    #[test]
    fn test_plan_id_for_tier() {
        let c = catalog();
        assert_eq!(c.plan_id_for_tier(Tier::Free), None);
        assert_eq!(c.plan_id_for_tier(Tier::Pro), Some("P-PRO-MONTHLY"));
        assert_eq!(c.plan_id_for_tier(Tier::ProPlus), Some("P-PROPLUS-MONTHLY"));
    }
}
