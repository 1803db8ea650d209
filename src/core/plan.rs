//! Plan catalog - pricing and entitlements per subscription plan.
//!
//! The catalog is a read-only table keyed by [`Plan`]. Feature entitlements of
//! a site are derived from it by [`PlanTerms::features`] and nowhere else, and
//! every price stored on a subscription is a snapshot taken from it.

use crate::{
    entities::sea_orm_active_enums::Plan,
    errors::{Error, Result},
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Months of usage credits included with one annual subscription.
pub const MONTHS_PER_TERM: i64 = 12;

/// Upper bound on `included_credits` accepted from configuration.
pub const MAX_INCLUDED_CREDITS: i64 = 1_000_000;

/// Pricing and entitlements of a single plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PlanTerms {
    /// Price of one year in dollars
    pub annual_price: Decimal,
    /// Advertised monthly rate in dollars
    pub monthly_rate: Decimal,
    /// Usage credits included per month
    pub included_credits: i64,
    /// Whether sites on this plan get game screenshots
    pub game_screenshots: bool,
    /// Whether sites on this plan get the bonus code feed
    pub bonus_code_feed: bool,
}

/// Feature flags a site carries while subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SiteFeatures {
    /// Game screenshot generation
    pub game_screenshots: bool,
    /// Bonus code feed
    pub bonus_code_feed: bool,
}

impl PlanTerms {
    /// Entitlements granted by this plan.
    #[must_use]
    pub const fn features(&self) -> SiteFeatures {
        SiteFeatures {
            game_screenshots: self.game_screenshots,
            bonus_code_feed: self.bonus_code_feed,
        }
    }

    /// Payment-currency credits needed to buy one term (1 credit per dollar,
    /// rounded up).
    #[must_use]
    pub fn required_payment_credits(&self) -> i64 {
        self.annual_price.ceil().to_i64().unwrap_or(i64::MAX)
    }

    /// Usage credits granted for one annual term. Saturates instead of
    /// overflowing on absurd tables.
    #[must_use]
    pub const fn annual_usage_credits(&self) -> i64 {
        self.included_credits.saturating_mul(MONTHS_PER_TERM)
    }
}

impl FromStr for Plan {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "pro" => Ok(Self::Pro),
            "everything" => Ok(Self::Everything),
            _ => Err(Error::InvalidPlan {
                plan: s.to_string(),
            }),
        }
    }
}

/// Read-only table of plan terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    plans: BTreeMap<Plan, PlanTerms>,
}

impl PlanCatalog {
    /// Builds a catalog from an explicit table. Plans absent from `plans` are
    /// rejected with [`Error::InvalidPlan`] on lookup.
    #[must_use]
    pub const fn new(plans: BTreeMap<Plan, PlanTerms>) -> Self {
        Self { plans }
    }

    /// Returns a copy of this catalog with `overrides` replacing individual
    /// entries.
    #[must_use]
    pub fn with_overrides(mut self, overrides: BTreeMap<Plan, PlanTerms>) -> Self {
        self.plans.extend(overrides);
        self
    }

    /// Looks up the terms of `plan`.
    pub fn terms(&self, plan: Plan) -> Result<PlanTerms> {
        self.plans
            .get(&plan)
            .copied()
            .ok_or_else(|| Error::InvalidPlan {
                plan: plan.to_string(),
            })
    }

    /// Parses a plan id and looks up its terms in one step.
    pub fn resolve(&self, plan_id: &str) -> Result<(Plan, PlanTerms)> {
        let plan = Plan::from_str(plan_id)?;
        Ok((plan, self.terms(plan)?))
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(BTreeMap::from([
            (
                Plan::Basic,
                PlanTerms {
                    annual_price: dec!(300),
                    monthly_rate: dec!(25),
                    included_credits: 10,
                    game_screenshots: false,
                    bonus_code_feed: false,
                },
            ),
            (
                Plan::Pro,
                PlanTerms {
                    annual_price: dec!(600),
                    monthly_rate: dec!(50),
                    included_credits: 25,
                    game_screenshots: true,
                    bonus_code_feed: false,
                },
            ),
            (
                Plan::Everything,
                PlanTerms {
                    annual_price: dec!(1200),
                    monthly_rate: dec!(100),
                    included_credits: 60,
                    game_screenshots: true,
                    bonus_code_feed: true,
                },
            ),
        ]))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_plan_from_str() {
        assert_eq!(Plan::from_str("basic").unwrap(), Plan::Basic);
        assert_eq!(Plan::from_str(" PRO ").unwrap(), Plan::Pro);
        assert_eq!(Plan::from_str("Everything").unwrap(), Plan::Everything);
        assert!(matches!(
            Plan::from_str("platinum"),
            Err(Error::InvalidPlan { plan }) if plan == "platinum"
        ));
    }

    #[test]
    fn test_default_catalog_features() {
        let catalog = PlanCatalog::default();

        let basic = catalog.terms(Plan::Basic).unwrap().features();
        assert_eq!(basic, SiteFeatures::default());

        let pro = catalog.terms(Plan::Pro).unwrap().features();
        assert!(pro.game_screenshots);
        assert!(!pro.bonus_code_feed);

        let everything = catalog.terms(Plan::Everything).unwrap().features();
        assert!(everything.game_screenshots);
        assert!(everything.bonus_code_feed);
    }

    #[test]
    fn test_required_payment_credits_rounds_up() {
        let mut terms = PlanCatalog::default().terms(Plan::Basic).unwrap();
        assert_eq!(terms.required_payment_credits(), 300);

        terms.annual_price = dec!(299.01);
        assert_eq!(terms.required_payment_credits(), 300);

        terms.annual_price = dec!(0.5);
        assert_eq!(terms.required_payment_credits(), 1);
    }

    #[test]
    fn test_annual_usage_credits() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.terms(Plan::Basic).unwrap().annual_usage_credits(), 120);
        assert_eq!(catalog.terms(Plan::Pro).unwrap().annual_usage_credits(), 300);
    }

    #[test]
    fn test_missing_plan_is_invalid() {
        let catalog = PlanCatalog::new(BTreeMap::new());
        assert!(matches!(
            catalog.terms(Plan::Pro),
            Err(Error::InvalidPlan { .. })
        ));
        assert!(matches!(
            catalog.resolve("pro"),
            Err(Error::InvalidPlan { .. })
        ));
    }

    #[test]
    fn test_overrides_replace_single_entries() {
        let custom = PlanTerms {
            annual_price: dec!(350),
            monthly_rate: dec!(30),
            included_credits: 12,
            game_screenshots: true,
            bonus_code_feed: false,
        };
        let catalog =
            PlanCatalog::default().with_overrides(BTreeMap::from([(Plan::Basic, custom)]));

        assert_eq!(catalog.terms(Plan::Basic).unwrap(), custom);
        assert_eq!(
            catalog.terms(Plan::Pro).unwrap(),
            PlanCatalog::default().terms(Plan::Pro).unwrap()
        );
    }
}
