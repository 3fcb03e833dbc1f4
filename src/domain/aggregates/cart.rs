//! Cart Aggregate
//!
//! The normalized set of lines a customer asked for: one line per product,
//! every quantity positive and bounded.

use crate::domain::value_objects::{ProductId, Quantity};
use thiserror::Error;

pub const MAX_LINES: usize = 100;
pub const MAX_LINE_QUANTITY: u32 = 10_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: Quantity,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    /// Builds a cart from raw request lines, merging repeated products.
    pub fn from_lines(lines: impl IntoIterator<Item = (ProductId, u32)>) -> Result<Self, CartError> {
        let mut cart = Self::new();
        for (product_id, quantity) in lines {
            cart.add_item(product_id, quantity)?;
        }
        if cart.is_empty() { return Err(CartError::Empty); }
        Ok(cart)
    }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn add_item(&mut self, product_id: ProductId, quantity: u32) -> Result<(), CartError> {
        if quantity == 0 { return Err(CartError::ZeroQuantity(product_id)); }
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            let merged = existing.quantity.add(quantity);
            if merged.value() > MAX_LINE_QUANTITY { return Err(CartError::QuantityTooLarge(product_id)); }
            existing.quantity = merged;
        } else {
            if quantity > MAX_LINE_QUANTITY { return Err(CartError::QuantityTooLarge(product_id)); }
            if self.items.len() >= MAX_LINES { return Err(CartError::TooManyLines); }
            self.items.push(CartItem { product_id, quantity: Quantity::new(quantity) });
        }
        Ok(())
    }

    pub fn quantity_of(&self, product_id: &ProductId) -> u32 {
        self.items.iter().find(|i| &i.product_id == product_id).map(|i| i.quantity.value()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("cart has no items")]
    Empty,
    #[error("quantity for {0} must be positive")]
    ZeroQuantity(ProductId),
    #[error("quantity for {0} exceeds {}", MAX_LINE_QUANTITY)]
    QuantityTooLarge(ProductId),
    #[error("cart exceeds {} distinct products", MAX_LINES)]
    TooManyLines,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_merges_lines() {
        let cart = Cart::from_lines(vec![("P1".into(), 2), ("P2".into(), 1), ("P1".into(), 3)]).unwrap();
        assert_eq!(cart.item_count(), 2);
        assert_eq!(cart.quantity_of(&"P1".into()), 5); // Merged
    }

    #[test]
    fn test_cart_rejects_bad_lines() {
        assert_eq!(Cart::from_lines(Vec::new()), Err(CartError::Empty));
        assert_eq!(Cart::from_lines(vec![("P1".into(), 0)]), Err(CartError::ZeroQuantity("P1".into())));
        assert_eq!(
            Cart::from_lines(vec![("P1".into(), MAX_LINE_QUANTITY), ("P1".into(), 1)]),
            Err(CartError::QuantityTooLarge("P1".into()))
        );
    }
}
