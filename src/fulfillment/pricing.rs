//! Tiered volume pricing.
//!
//! The [`TierTable`] is the only place discount thresholds live; the order
//! path and the pricing preview both read it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::domain::aggregates::OrderItem;
use crate::domain::value_objects::{CustomerClass, Money, MoneyError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingTier {
    pub customer_class: CustomerClass,
    /// Inclusive lower bound, minor units
    pub minimum_subtotal: i64,
    /// 0-100
    pub discount_percentage: Decimal,
    pub tier_name: String,
}

/// Validated tier table, sorted by class then threshold.
#[derive(Clone, Debug, Default)]
pub struct TierTable {
    tiers: Vec<PricingTier>,
}

impl TierTable {
    /// Rejects tables where a higher threshold would grant a smaller discount,
    /// so the applied percentage is monotone in the subtotal.
    pub fn new(mut tiers: Vec<PricingTier>) -> Result<Self, PricingError> {
        tiers.sort_by(|a, b| (a.customer_class, a.minimum_subtotal).cmp(&(b.customer_class, b.minimum_subtotal)));
        for tier in &tiers {
            if tier.minimum_subtotal < 0 {
                return Err(PricingError::InvalidTier(format!("{} has a negative threshold", tier.tier_name)));
            }
            if tier.discount_percentage < Decimal::ZERO || tier.discount_percentage > Decimal::ONE_HUNDRED {
                return Err(PricingError::InvalidTier(format!("{} discount must be within 0-100", tier.tier_name)));
            }
        }
        for pair in tiers.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            if lower.customer_class != upper.customer_class { continue; }
            if lower.minimum_subtotal == upper.minimum_subtotal {
                return Err(PricingError::InvalidTier(format!("{} and {} share a threshold", lower.tier_name, upper.tier_name)));
            }
            if upper.discount_percentage < lower.discount_percentage {
                return Err(PricingError::InvalidTier(format!("{} discounts less than {}", upper.tier_name, lower.tier_name)));
            }
        }
        Ok(Self { tiers })
    }

    pub fn tiers_for(&self, class: CustomerClass) -> impl Iterator<Item = &PricingTier> {
        self.tiers.iter().filter(move |t| t.customer_class == class)
    }

    /// Highest tier for `class` whose threshold does not exceed `subtotal`.
    pub fn select(&self, class: CustomerClass, subtotal: i64) -> Option<&PricingTier> {
        self.tiers_for(class).filter(|t| t.minimum_subtotal <= subtotal).last()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingResult {
    pub subtotal: Money,
    pub discount_percentage: Decimal,
    pub discount_amount: Money,
    pub tier_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PricingEngine {
    tiers: TierTable,
}

impl PricingEngine {
    pub fn new(tiers: TierTable) -> Self { Self { tiers } }

    pub fn tiers(&self) -> &TierTable { &self.tiers }

    /// Pure: same items, class and tier table always give the same result.
    pub fn price(&self, items: &[OrderItem], class: CustomerClass, currency: &str) -> Result<PricingResult, PricingError> {
        let subtotal = items.iter().try_fold(Money::zero(currency), |acc, item| {
            let line = item.unit_price.multiply(item.quantity)?;
            acc.add(&line)
        })?;
        let tier = self.tiers.select(class, subtotal.amount());
        let discount_percentage = tier.map(|t| t.discount_percentage).unwrap_or(Decimal::ZERO);
        let discount_amount = subtotal.percentage(discount_percentage)?;
        Ok(PricingResult { subtotal, discount_percentage, discount_amount, tier_name: tier.map(|t| t.tier_name.clone()) })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("invalid pricing tier: {0}")]
    InvalidTier(String),
    #[error(transparent)]
    Money(#[from] MoneyError),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::aggregates::Product;
    use crate::domain::value_objects::Sku;

    pub(crate) fn tier(class: CustomerClass, minimum: i64, pct: i64, name: &str) -> PricingTier {
        PricingTier { customer_class: class, minimum_subtotal: minimum, discount_percentage: Decimal::new(pct, 0), tier_name: name.into() }
    }

    pub(crate) fn distributor_table() -> TierTable {
        TierTable::new(vec![
            tier(CustomerClass::Distributor, 750_000, 25, "Gold"),
            tier(CustomerClass::Distributor, 250_000, 10, "Bronze"),
            tier(CustomerClass::Distributor, 500_000, 20, "Silver"),
            tier(CustomerClass::Direct, 100_000, 5, "Bulk"),
        ])
        .unwrap()
    }

    fn item(id: &str, price: i64, qty: u32) -> OrderItem {
        let p = Product::new(id, Sku::new(id).unwrap(), id, price, 1_000, "lithium");
        OrderItem::snapshot(&p, qty, "NGN").unwrap()
    }

    #[test]
    fn test_distributor_scenario() {
        let engine = PricingEngine::new(distributor_table());
        let items = vec![item("P-6AH", 9_500, 50), item("P-9AH", 12_500, 20)];
        let result = engine.price(&items, CustomerClass::Distributor, "NGN").unwrap();
        assert_eq!(result.subtotal.amount(), 725_000);
        assert_eq!(result.discount_percentage, Decimal::new(20, 0));
        assert_eq!(result.discount_amount.amount(), 145_000);
        assert_eq!(result.tier_name.as_deref(), Some("Silver"));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let table = distributor_table();
        assert_eq!(table.select(CustomerClass::Distributor, 750_000).unwrap().tier_name, "Gold");
        assert_eq!(table.select(CustomerClass::Distributor, 749_999).unwrap().tier_name, "Silver");
        assert!(table.select(CustomerClass::Distributor, 249_999).is_none());
    }

    #[test]
    fn test_class_scoping() {
        let table = distributor_table();
        assert_eq!(table.select(CustomerClass::Direct, 900_000).unwrap().tier_name, "Bulk");
        assert!(table.select(CustomerClass::Wholesale, 900_000).is_none());
    }

    #[test]
    fn test_discount_monotone_in_subtotal() {
        let engine = PricingEngine::new(distributor_table());
        let mut last = Decimal::ZERO;
        for qty in (1..400).step_by(7) {
            let result = engine.price(&[item("P-6AH", 9_500, qty)], CustomerClass::Distributor, "NGN").unwrap();
            assert!(result.discount_percentage >= last);
            last = result.discount_percentage;
        }
        assert_eq!(last, Decimal::new(25, 0));
    }

    #[test]
    fn test_discount_rounds_half_up() {
        let table = TierTable::new(vec![PricingTier {
            customer_class: CustomerClass::Direct, minimum_subtotal: 0, discount_percentage: Decimal::new(125, 1), tier_name: "Promo".into(),
        }])
        .unwrap();
        // 12.5% of 1_004 = 125.5
        let result = PricingEngine::new(table).price(&[item("P-X", 1_004, 1)], CustomerClass::Direct, "NGN").unwrap();
        assert_eq!(result.discount_amount.amount(), 126);
    }

    #[test]
    fn test_rejects_inverted_tiers() {
        let err = TierTable::new(vec![
            tier(CustomerClass::Wholesale, 100_000, 15, "A"),
            tier(CustomerClass::Wholesale, 200_000, 10, "B"),
        ])
        .unwrap_err();
        assert!(matches!(err, PricingError::InvalidTier(_)));
        assert!(TierTable::new(vec![tier(CustomerClass::Direct, 1, 101, "Bad")]).is_err());
    }
}
