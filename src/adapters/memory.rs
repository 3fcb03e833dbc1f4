//! In-process adapters used when no database or payment provider is configured,
//! and as the test doubles for the order path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;
use crate::domain::aggregates::{Invoice, Order, OrderStatus, Product};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::ProductId;
use crate::ports::{ChargeReceipt, Notifier, OrderStore, PaymentError, PaymentGateway, ProductCatalog, StoreError};

// =============================================================================
// Catalog
// =============================================================================

#[derive(Clone, Debug)]
pub struct InMemoryCatalog {
    currency: String,
    products: HashMap<ProductId, Product>,
}

impl InMemoryCatalog {
    pub fn new(currency: &str, products: Vec<Product>) -> Self {
        Self { currency: currency.to_uppercase(), products: products.into_iter().map(|p| (p.id().clone(), p)).collect() }
    }

    pub fn len(&self) -> usize { self.products.len() }
    pub fn is_empty(&self) -> bool { self.products.is_empty() }
}

impl ProductCatalog for InMemoryCatalog {
    fn product(&self, id: &ProductId) -> Option<Product> { self.products.get(id).cloned() }
    fn currency(&self) -> &str { &self.currency }
}

// =============================================================================
// Order store
// =============================================================================

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<Uuid, (Order, Invoice)>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.orders.read().map(|o| o.len()).unwrap_or(0) }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

fn poisoned<T>(_: T) -> StoreError { StoreError::Unavailable("order store lock poisoned".into()) }

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order_and_invoice(&self, order: &Order, invoice: &Invoice) -> Result<(), StoreError> {
        let mut orders = self.orders.write().map_err(poisoned)?;
        if orders.contains_key(&order.id()) {
            return Err(StoreError::Conflict(format!("order {} already exists", order.id())));
        }
        if orders.values().any(|(o, _)| o.order_number() == order.order_number()) {
            return Err(StoreError::DuplicateOrderNumber(order.order_number().to_string()));
        }
        orders.insert(order.id(), (order.clone(), invoice.clone()));
        Ok(())
    }

    async fn update_order_and_invoice(&self, order: &Order, invoice: &Invoice) -> Result<(), StoreError> {
        let mut orders = self.orders.write().map_err(poisoned)?;
        match orders.get_mut(&order.id()) {
            Some(entry) => {
                *entry = (order.clone(), invoice.clone());
                Ok(())
            }
            None => Err(StoreError::Conflict(format!("order {} does not exist", order.id()))),
        }
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<(Order, Invoice)>, StoreError> {
        let orders = self.orders.read().map_err(poisoned)?;
        Ok(orders.get(&id).cloned())
    }

    async fn find_orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().map_err(poisoned)?;
        Ok(orders.values().filter(|(o, _)| o.status() == status).map(|(o, _)| o.clone()).collect())
    }
}

// =============================================================================
// Payments
// =============================================================================

/// Sandbox gateway. Method refs starting with `decline` are refused and refs
/// starting with `pending` are accepted without settling; anything else settles.
#[derive(Default)]
pub struct SandboxPaymentGateway {
    captured: Mutex<HashMap<String, i64>>,
    charges: AtomicU32,
    refunds: AtomicU32,
}

impl SandboxPaymentGateway {
    pub fn new() -> Self { Self::default() }

    pub fn charge_count(&self) -> u32 { self.charges.load(Ordering::SeqCst) }
    pub fn refund_count(&self) -> u32 { self.refunds.load(Ordering::SeqCst) }
}

#[async_trait]
impl PaymentGateway for SandboxPaymentGateway {
    async fn charge(&self, amount: i64, currency: &str, method_ref: &str) -> Result<ChargeReceipt, PaymentError> {
        if amount <= 0 {
            return Err(PaymentError::Declined { reason: "amount must be positive".into(), retryable: false });
        }
        if method_ref.starts_with("decline") {
            return Err(PaymentError::Declined { reason: "card declined".into(), retryable: false });
        }
        let transaction_ref = format!("sbx_{}", Uuid::new_v4().simple());
        self.captured
            .lock()
            .map_err(|_| PaymentError::Unavailable("sandbox ledger poisoned".into()))?
            .insert(transaction_ref.clone(), amount);
        self.charges.fetch_add(1, Ordering::SeqCst);
        info!(transaction_ref = %transaction_ref, amount, currency, "sandbox charge captured");
        Ok(ChargeReceipt { transaction_ref, settled: !method_ref.starts_with("pending") })
    }

    async fn refund(&self, transaction_ref: &str, amount: i64) -> Result<(), PaymentError> {
        let mut captured = self.captured.lock().map_err(|_| PaymentError::Unavailable("sandbox ledger poisoned".into()))?;
        match captured.get(transaction_ref) {
            None => Err(PaymentError::Declined { reason: format!("no refundable charge {transaction_ref}"), retryable: false }),
            Some(charged) if *charged < amount => {
                Err(PaymentError::Declined { reason: "refund exceeds captured amount".into(), retryable: false })
            }
            Some(_) => {
                captured.remove(transaction_ref);
                self.refunds.fetch_add(1, Ordering::SeqCst);
                info!(transaction_ref, amount, "sandbox refund issued");
                Ok(())
            }
        }
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Writes events to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: DomainEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        info!(subject = event.subject(), payload = %payload, "domain event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::tests::draft;
    use crate::domain::aggregates::Adjustments;
    use rust_decimal::Decimal;

    fn order() -> Order {
        let adj = Adjustments { discount_percentage: Decimal::ZERO, discount_amount: 0, tier_name: None, tax: 0, shipping: 0 };
        Order::create(draft(adj)).unwrap()
    }

    #[tokio::test]
    async fn test_store_rejects_duplicate_order_numbers() {
        let store = InMemoryOrderStore::new();
        let first = order();
        store.create_order_and_invoice(&first, &Invoice::for_order(&first, true)).await.unwrap();
        let twin = order();
        let err = store.create_order_and_invoice(&twin, &Invoice::for_order(&twin, true)).await.unwrap_err();
        assert_eq!(err, StoreError::DuplicateOrderNumber(first.order_number().to_string()));
        assert!(!err.is_retryable());
        assert_eq!(store.len(), 1);
        assert!(store.find_order(first.id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_finds_orders_by_status() {
        let store = InMemoryOrderStore::new();
        let pending = order();
        let mut next = draft(Adjustments { discount_percentage: Decimal::ZERO, discount_amount: 0, tier_name: None, tax: 0, shipping: 0 });
        next.order_number = "ORD-20261018-000002".into();
        let mut confirmed = Order::create(next).unwrap();
        confirmed.confirm("txn-1").unwrap();
        for o in [&pending, &confirmed] {
            store.create_order_and_invoice(o, &Invoice::for_order(o, true)).await.unwrap();
        }

        let found = store.find_orders_by_status(OrderStatus::Confirmed).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), confirmed.id());
        assert!(store.find_orders_by_status(OrderStatus::Cancelled).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_requires_existing_order() {
        let store = InMemoryOrderStore::new();
        let o = order();
        assert!(store.update_order_and_invoice(&o, &Invoice::for_order(&o, true)).await.is_err());
    }

    #[tokio::test]
    async fn test_sandbox_refunds_once() {
        let gateway = SandboxPaymentGateway::new();
        let receipt = gateway.charge(5_000, "NGN", "card-ok").await.unwrap();
        assert!(receipt.settled);
        assert!(!gateway.charge(5_000, "NGN", "pending-transfer").await.unwrap().settled);
        assert!(gateway.refund(&receipt.transaction_ref, 6_000).await.is_err());
        gateway.refund(&receipt.transaction_ref, 5_000).await.unwrap();
        assert!(gateway.refund(&receipt.transaction_ref, 5_000).await.is_err());
        assert_eq!(gateway.refund_count(), 1);
        let declined = gateway.charge(5_000, "NGN", "decline-card").await.unwrap_err();
        assert!(!declined.is_retryable());
    }
}
