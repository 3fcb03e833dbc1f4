//! Regional tax and shipping.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use crate::domain::value_objects::{Money, MoneyError, RegionCode};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightBracket {
    /// Inclusive upper bound of the bracket
    pub max_grams: u64,
    pub fee: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingTable {
    /// Discounted subtotal at or above which shipping is free
    pub free_threshold: Option<i64>,
    pub brackets: Vec<WeightBracket>,
    /// Charged per started kilogram above the heaviest bracket
    #[serde(default)]
    pub overflow_fee_per_kg: i64,
}

impl ShippingTable {
    fn fee_for(&self, weight_grams: u64) -> i64 {
        if let Some(bracket) = self.brackets.iter().find(|b| weight_grams <= b.max_grams) {
            return bracket.fee;
        }
        let Some(heaviest) = self.brackets.last() else { return 0 };
        let extra_kg = (weight_grams - heaviest.max_grams).div_ceil(1_000);
        heaviest.fee.saturating_add(self.overflow_fee_per_kg.saturating_mul(extra_kg as i64))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionRates {
    pub region: RegionCode,
    /// Fraction, e.g. 0.075
    pub tax_rate: Decimal,
    pub shipping: ShippingTable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxShipping {
    pub tax: Money,
    pub shipping: Money,
    pub free_shipping: bool,
}

#[derive(Clone, Debug, Default)]
pub struct TaxShippingCalculator {
    regions: HashMap<RegionCode, RegionRates>,
}

impl TaxShippingCalculator {
    pub fn new(rates: Vec<RegionRates>) -> Result<Self, TaxShippingError> {
        let mut regions = HashMap::with_capacity(rates.len());
        for mut rate in rates {
            if rate.tax_rate < Decimal::ZERO || rate.tax_rate >= Decimal::ONE {
                return Err(TaxShippingError::InvalidRate(rate.region));
            }
            if rate.shipping.brackets.iter().any(|b| b.fee < 0) || rate.shipping.overflow_fee_per_kg < 0 {
                return Err(TaxShippingError::InvalidRate(rate.region));
            }
            rate.shipping.brackets.sort_by_key(|b| b.max_grams);
            if regions.insert(rate.region.clone(), rate.clone()).is_some() {
                return Err(TaxShippingError::DuplicateRegion(rate.region));
            }
        }
        Ok(Self { regions })
    }

    pub fn supports(&self, region: &RegionCode) -> bool { self.regions.contains_key(region) }

    /// Pure: tax on the discounted subtotal, shipping stepped by discounted subtotal and weight.
    pub fn calculate(&self, subtotal: &Money, discount_amount: &Money, region: &RegionCode, total_weight_grams: u64) -> Result<TaxShipping, TaxShippingError> {
        let rates = self.regions.get(region).ok_or_else(|| TaxShippingError::UnknownRegion(region.clone()))?;
        let taxable = subtotal.subtract(discount_amount)?;
        let tax = taxable.scale(rates.tax_rate)?;
        let free_shipping = rates.shipping.free_threshold.is_some_and(|threshold| taxable.amount() >= threshold);
        let fee = if free_shipping { 0 } else { rates.shipping.fee_for(total_weight_grams) };
        Ok(TaxShipping { tax, shipping: Money::new(fee, taxable.currency()), free_shipping })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxShippingError {
    #[error("no tax or shipping rates for region {0}")]
    UnknownRegion(RegionCode),
    #[error("invalid rates for region {0}")]
    InvalidRate(RegionCode),
    #[error("region {0} configured twice")]
    DuplicateRegion(RegionCode),
    #[error(transparent)]
    Money(#[from] MoneyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(code: &str) -> RegionCode { RegionCode::new(code).unwrap() }

    fn table() -> ShippingTable {
        ShippingTable {
            free_threshold: Some(500_000),
            brackets: vec![WeightBracket { max_grams: 20_000, fee: 3_500 }, WeightBracket { max_grams: 5_000, fee: 1_500 }],
            overflow_fee_per_kg: 200,
        }
    }

    fn calculator() -> TaxShippingCalculator {
        TaxShippingCalculator::new(vec![
            RegionRates { region: region("NG-LA"), tax_rate: Decimal::new(75, 3), shipping: table() },
            RegionRates { region: region("NG-FTZ"), tax_rate: Decimal::ZERO, shipping: table() },
        ])
        .unwrap()
    }

    #[test]
    fn test_distributor_scenario_tax() {
        let result = calculator()
            .calculate(&Money::new(725_000, "NGN"), &Money::new(145_000, "NGN"), &region("NG-LA"), 92_000)
            .unwrap();
        assert_eq!(result.tax.amount(), 43_500);
        assert!(result.free_shipping);
        assert_eq!(result.shipping.amount(), 0);
    }

    #[test]
    fn test_zero_rate_region() {
        let result = calculator().calculate(&Money::new(10_000, "NGN"), &Money::zero("NGN"), &region("NG-FTZ"), 1_000).unwrap();
        assert!(result.tax.is_zero());
        assert_eq!(result.shipping.amount(), 1_500);
    }

    #[test]
    fn test_weight_steps() {
        let calc = calculator();
        let fee = |grams| calc.calculate(&Money::new(10_000, "NGN"), &Money::zero("NGN"), &region("NG-LA"), grams).unwrap().shipping.amount();
        assert_eq!(fee(5_000), 1_500);
        assert_eq!(fee(5_001), 3_500);
        assert_eq!(fee(20_000), 3_500);
        assert_eq!(fee(21_500), 3_500 + 2 * 200);
    }

    #[test]
    fn test_free_threshold_uses_discounted_subtotal() {
        let result = calculator()
            .calculate(&Money::new(510_000, "NGN"), &Money::new(20_000, "NGN"), &region("NG-LA"), 1_000)
            .unwrap();
        assert!(!result.free_shipping);
        // 7.5% of 490_000
        assert_eq!(result.tax.amount(), 36_750);
    }

    #[test]
    fn test_unknown_region() {
        let err = calculator().calculate(&Money::new(1, "NGN"), &Money::zero("NGN"), &region("US-CA"), 0).unwrap_err();
        assert_eq!(err, TaxShippingError::UnknownRegion(region("US-CA")));
    }
}
