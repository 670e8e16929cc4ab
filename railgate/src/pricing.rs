//! Plan catalog and price resolution.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::amount::ensure_positive;
use crate::error::{RailError, Result};

/// A sellable plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Price in USD.
    pub price_usd: Decimal,
}

/// Plan id to price mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanCatalog {
    plans: HashMap<String, Plan>,
}

impl PlanCatalog {
    /// Builds a catalog from configured plans.
    #[must_use]
    pub fn new<S: std::hash::BuildHasher>(plans: HashMap<String, Plan, S>) -> Self {
        Self {
            plans: plans.into_iter().collect(),
        }
    }

    /// Adds or replaces one plan.
    #[must_use]
    pub fn with_plan(mut self, id: impl Into<String>, name: impl Into<String>, price_usd: Decimal) -> Self {
        self.plans.insert(
            id.into(),
            Plan {
                name: name.into(),
                price_usd,
            },
        );
        self
    }

    /// Plan by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Plan> {
        self.plans.get(id)
    }

    /// Price to charge for `plan`.
    ///
    /// A caller-supplied override (dynamic pricing such as consultations)
    /// wins over the catalog and does not require the plan to be listed.
    ///
    /// # Errors
    ///
    /// [`RailError::InvalidAmount`] for a non-positive override or catalog
    /// price, [`RailError::UnknownPlan`] for an unlisted plan without override.
    pub fn resolve_price(&self, plan: &str, amount_override: Option<Decimal>) -> Result<Decimal> {
        if let Some(amount) = amount_override {
            return ensure_positive(amount);
        }
        let plan = self
            .plans
            .get(plan)
            .ok_or_else(|| RailError::UnknownPlan(plan.to_owned()))?;
        ensure_positive(plan.price_usd)
    }

    /// Number of plans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Whether no plans are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_catalog_and_override() {
        let catalog = PlanCatalog::default().with_plan("pro", "Pro", Decimal::from(29));
        assert_eq!(catalog.resolve_price("pro", None).unwrap(), Decimal::from(29));
        assert_eq!(
            catalog.resolve_price("consultation", Some(Decimal::from(150))).unwrap(),
            Decimal::from(150)
        );
        assert!(matches!(
            catalog.resolve_price("enterprise", None),
            Err(RailError::UnknownPlan(p)) if p == "enterprise"
        ));
        assert!(matches!(
            catalog.resolve_price("pro", Some(Decimal::ZERO)),
            Err(RailError::InvalidAmount(_))
        ));
    }
}
