//! Collaborators the fulfillment core talks to but does not implement.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::{Invoice, Order, OrderStatus, Product};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::ProductId;

/// Read-only product lookup.
pub trait ProductCatalog: Send + Sync {
    fn product(&self, id: &ProductId) -> Option<Product>;
    /// Currency all catalog prices are quoted in.
    fn currency(&self) -> &str;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChargeReceipt {
    pub transaction_ref: String,
    /// Funds captured synchronously; otherwise settlement arrives later.
    pub settled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("declined: {reason}")]
    Declined { reason: String, retryable: bool },
    #[error("gateway timed out")]
    Timeout,
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Declined { retryable, .. } => *retryable,
            Self::Timeout | Self::Unavailable(_) => true,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, amount: i64, currency: &str, method_ref: &str) -> Result<ChargeReceipt, PaymentError>;
    async fn refund(&self, transaction_ref: &str, amount: i64) -> Result<(), PaymentError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("conflicting record: {0}")]
    Conflict(String),
    #[error("order number {0} already issued")]
    DuplicateOrderNumber(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool { matches!(self, Self::Unavailable(_)) }
}

/// Transactional order + invoice storage.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Writes both records or neither.
    async fn create_order_and_invoice(&self, order: &Order, invoice: &Invoice) -> Result<(), StoreError>;
    async fn update_order_and_invoice(&self, order: &Order, invoice: &Invoice) -> Result<(), StoreError>;
    async fn find_order(&self, id: Uuid) -> Result<Option<(Order, Invoice)>, StoreError>;
    async fn find_orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError>;
}

/// Fire-and-forget event sink. Implementations must not block the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: DomainEvent);
}
