//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::{Product, WarehouseAssignment};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{CustomerClass, CustomerId, Money, MoneyError, ProductId, RegionCode, Sku};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: Uuid,
    order_number: String,
    customer_id: CustomerId,
    customer_class: CustomerClass,
    status: OrderStatus,
    items: Vec<OrderItem>,
    subtotal: Money,
    discount_percentage: Decimal,
    discount_amount: Money,
    tier_name: Option<String>,
    tax: Money,
    shipping: Money,
    total: Money,
    warehouse_assignments: Vec<WarehouseAssignment>,
    shipping_address: Address,
    notes: Option<String>,
    reservation_id: Uuid,
    payment_ref: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem { pub product_id: ProductId, pub sku: Sku, pub name: String, pub quantity: u32, pub unit_price: Money, pub line_total: Money }

impl OrderItem {
    /// Snapshots the catalog price at order time.
    pub fn snapshot(product: &Product, quantity: u32, currency: &str) -> Result<Self, MoneyError> {
        let unit_price = product.price_in(currency);
        let line_total = unit_price.multiply(quantity)?;
        Ok(Self { product_id: product.id().clone(), sku: product.sku().clone(), name: product.name().to_string(), quantity, unit_price, line_total })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address { pub name: String, pub street1: String, pub street2: Option<String>, pub city: String, pub state: Option<String>, pub zip: String, pub country: String, pub region: RegionCode }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { #[default] Pending, Confirmed, Failed, Cancelled }

impl OrderStatus {
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Failed | Self::Cancelled) }
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "PENDING", Self::Confirmed => "CONFIRMED", Self::Failed => "FAILED", Self::Cancelled => "CANCELLED" }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Price adjustments computed by the pricing and tax/shipping stages, all in minor units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Adjustments {
    pub discount_percentage: Decimal,
    pub discount_amount: i64,
    pub tier_name: Option<String>,
    pub tax: i64,
    pub shipping: i64,
}

/// Everything needed to open an order in PENDING state.
#[derive(Clone, Debug)]
pub struct OrderDraft {
    pub order_number: String,
    pub customer_id: CustomerId,
    pub customer_class: CustomerClass,
    pub currency: String,
    pub items: Vec<OrderItem>,
    pub adjustments: Adjustments,
    pub warehouse_assignments: Vec<WarehouseAssignment>,
    pub shipping_address: Address,
    pub notes: Option<String>,
    pub reservation_id: Uuid,
}

impl Order {
    /// Opens a pending order. Subtotal and total are derived here, never supplied.
    pub fn create(draft: OrderDraft) -> Result<Self, OrderStateError> {
        if draft.items.is_empty() { return Err(OrderStateError::NoItems); }
        let currency = draft.currency.as_str();
        let subtotal = draft.items.iter().try_fold(Money::zero(currency), |acc, i| acc.add(&i.line_total))?;
        let adj = &draft.adjustments;
        if adj.discount_amount < 0 || adj.discount_amount > subtotal.amount() { return Err(OrderStateError::InvalidDiscount); }
        if adj.tax < 0 || adj.shipping < 0 { return Err(OrderStateError::NegativeCharge); }
        let discount_amount = Money::new(adj.discount_amount, currency);
        let tax = Money::new(adj.tax, currency);
        let shipping = Money::new(adj.shipping, currency);
        let total = subtotal.subtract(&discount_amount)?.add(&tax)?.add(&shipping)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(), order_number: draft.order_number, customer_id: draft.customer_id, customer_class: draft.customer_class,
            status: OrderStatus::Pending, items: draft.items, subtotal, discount_percentage: adj.discount_percentage,
            discount_amount, tier_name: adj.tier_name.clone(), tax, shipping, total,
            warehouse_assignments: draft.warehouse_assignments, shipping_address: draft.shipping_address, notes: draft.notes,
            reservation_id: draft.reservation_id, payment_ref: None, failure_reason: None,
            created_at: now, updated_at: now, events: vec![],
        })
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn customer_id(&self) -> &CustomerId { &self.customer_id }
    pub fn customer_class(&self) -> CustomerClass { self.customer_class }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn discount_percentage(&self) -> Decimal { self.discount_percentage }
    pub fn discount_amount(&self) -> &Money { &self.discount_amount }
    pub fn tier_name(&self) -> Option<&str> { self.tier_name.as_deref() }
    pub fn tax(&self) -> &Money { &self.tax }
    pub fn shipping(&self) -> &Money { &self.shipping }
    pub fn total(&self) -> &Money { &self.total }
    pub fn currency(&self) -> &str { self.total.currency() }
    pub fn warehouse_assignments(&self) -> &[WarehouseAssignment] { &self.warehouse_assignments }
    pub fn shipping_address(&self) -> &Address { &self.shipping_address }
    pub fn notes(&self) -> Option<&str> { self.notes.as_deref() }
    pub fn reservation_id(&self) -> Uuid { self.reservation_id }
    pub fn payment_ref(&self) -> Option<&str> { self.payment_ref.as_deref() }
    pub fn failure_reason(&self) -> Option<&str> { self.failure_reason.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn confirm(&mut self, payment_ref: impl Into<String>) -> Result<(), OrderStateError> {
        self.transition(OrderStatus::Confirmed)?;
        self.payment_ref = Some(payment_ref.into());
        self.raise_event(DomainEvent::Order(OrderEvent::Confirmed {
            order_id: self.id, order_number: self.order_number.clone(), customer_id: self.customer_id.clone(),
            total: self.total.amount(), currency: self.total.currency().to_string(),
        }));
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), OrderStateError> {
        self.transition(OrderStatus::Failed)?;
        let reason = reason.into();
        self.failure_reason = Some(reason.clone());
        self.raise_event(DomainEvent::Order(OrderEvent::Failed { order_id: self.id, reservation_id: self.reservation_id, reason }));
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), OrderStateError> {
        self.transition(OrderStatus::Cancelled)?;
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id }));
        Ok(())
    }

    /// Takes a fresh number when the stored one collided with another order.
    pub fn renumber(&mut self, order_number: String) {
        self.order_number = order_number;
        self.updated_at = Utc::now();
    }

    /// Points the order at a replacement hold after its original one lapsed.
    pub fn replace_reservation(&mut self, reservation_id: Uuid) {
        self.reservation_id = reservation_id;
        self.updated_at = Utc::now();
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }

    fn transition(&mut self, to: OrderStatus) -> Result<(), OrderStateError> {
        let allowed = matches!(
            (self.status, to),
            (OrderStatus::Pending, OrderStatus::Confirmed)
                | (OrderStatus::Pending, OrderStatus::Failed)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Confirmed, OrderStatus::Cancelled)
        );
        if !allowed { return Err(OrderStateError::InvalidTransition { from: self.status, to }); }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Issues `ORD-YYYYMMDD-NNNNNN` numbers. The sequence starts at a random
/// offset so restarts on the same day are unlikely to reissue a number.
#[derive(Debug)]
pub struct OrderNumberGenerator {
    sequence: AtomicU64,
}

impl OrderNumberGenerator {
    /// Starts at a random point below one million.
    pub fn new() -> Self { Self::starting_at(rand::random::<u32>() as u64 % 1_000_000) }

    pub fn starting_at(start: u64) -> Self { Self { sequence: AtomicU64::new(start) } }

    pub fn next(&self, now: DateTime<Utc>) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("ORD-{}-{:06}", now.format("%Y%m%d"), n)
    }
}

impl Default for OrderNumberGenerator {
    fn default() -> Self { Self::new() }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderStateError {
    #[error("order has no items")]
    NoItems,
    #[error("discount must be between zero and the subtotal")]
    InvalidDiscount,
    #[error("tax and shipping cannot be negative")]
    NegativeCharge,
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error(transparent)]
    Money(#[from] MoneyError),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn address() -> Address {
        Address {
            name: "Ada Obi".into(), street1: "12 Marina Rd".into(), street2: None, city: "Lagos".into(),
            state: Some("LA".into()), zip: "101241".into(), country: "NG".into(), region: RegionCode::new("NG-LA").unwrap(),
        }
    }

    pub(crate) fn draft(adjustments: Adjustments) -> OrderDraft {
        let six = Product::new("P-6AH", Sku::new("BAT-6AH").unwrap(), "6Ah Pack", 9_500, 1_200, "lithium");
        let nine = Product::new("P-9AH", Sku::new("BAT-9AH").unwrap(), "9Ah Pack", 12_500, 1_600, "lithium");
        OrderDraft {
            order_number: "ORD-20261018-000001".into(), customer_id: "CUST001".into(), customer_class: CustomerClass::Distributor,
            currency: "NGN".into(),
            items: vec![OrderItem::snapshot(&six, 50, "NGN").unwrap(), OrderItem::snapshot(&nine, 20, "NGN").unwrap()],
            adjustments, warehouse_assignments: vec![], shipping_address: address(), notes: None, reservation_id: Uuid::new_v4(),
        }
    }

    fn adjustments() -> Adjustments {
        Adjustments { discount_percentage: Decimal::new(20, 0), discount_amount: 145_000, tier_name: Some("Silver".into()), tax: 43_500, shipping: 0 }
    }

    #[test]
    fn test_totals_balance() {
        let order = Order::create(draft(adjustments())).unwrap();
        assert_eq!(order.subtotal().amount(), 725_000);
        assert_eq!(order.total().amount(), 725_000 - 145_000 + 43_500);
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[test]
    fn test_order_workflow() {
        let mut order = Order::create(draft(adjustments())).unwrap();
        order.confirm("txn-1").unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert!(order.fail("late").is_err());
        order.cancel().unwrap();
        assert!(order.status().is_terminal());
        assert!(order.cancel().is_err());
        assert_eq!(order.take_events().len(), 2);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut order = Order::create(draft(adjustments())).unwrap();
        order.fail("declined").unwrap();
        assert!(matches!(order.confirm("txn"), Err(OrderStateError::InvalidTransition { .. })));
    }

    #[test]
    fn test_order_numbers() {
        use chrono::TimeZone;
        let numbers = OrderNumberGenerator::starting_at(999_999);
        let day = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        assert_eq!(numbers.next(day), "ORD-20261018-999999");
        assert_eq!(numbers.next(day), "ORD-20261018-1000000");
    }

    #[test]
    fn test_discount_cannot_exceed_subtotal() {
        let mut adj = adjustments();
        adj.discount_amount = 725_001;
        assert_eq!(Order::create(draft(adj)).unwrap_err(), OrderStateError::InvalidDiscount);
    }
}
