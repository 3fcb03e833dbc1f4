//! Product reference data
//!
//! Products are immutable once loaded; prices are snapshotted into
//! [`OrderItem`](super::OrderItem)s at order time.

use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{Money, ProductId, Sku};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    id: ProductId,
    sku: Sku,
    name: String,
    /// Minor units of the catalog currency
    unit_price: i64,
    weight_grams: u32,
    category: String,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, sku: Sku, name: impl Into<String>, unit_price: i64, weight_grams: u32, category: impl Into<String>) -> Self {
        Self { id: id.into(), sku, name: name.into(), unit_price, weight_grams, category: category.into() }
    }

    pub fn id(&self) -> &ProductId { &self.id }
    pub fn sku(&self) -> &Sku { &self.sku }
    pub fn name(&self) -> &str { &self.name }
    pub fn unit_price(&self) -> i64 { self.unit_price }
    pub fn price_in(&self, currency: &str) -> Money { Money::new(self.unit_price, currency) }
    pub fn weight_grams(&self) -> u32 { self.weight_grams }
    pub fn category(&self) -> &str { &self.category }
}
