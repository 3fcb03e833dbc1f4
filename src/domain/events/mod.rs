//! Domain events
//!
//! Published fire-and-forget through a [`Notifier`](crate::ports::Notifier).

use serde::Serialize;
use uuid::Uuid;
use crate::domain::value_objects::CustomerId;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Inventory(InventoryEvent),
    Alert(AlertEvent),
}

impl DomainEvent {
    /// Subject name used by message-bus notifiers.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Confirmed { .. }) => "order.confirmed",
            Self::Order(OrderEvent::Failed { .. }) => "order.failed",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
            Self::Inventory(InventoryEvent::ReservationExpired { .. }) => "reservation.expired",
            Self::Inventory(InventoryEvent::Restocked { .. }) => "inventory.restocked",
            Self::Alert(_) => "reconciliation.required",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Confirmed { order_id: Uuid, order_number: String, customer_id: CustomerId, total: i64, currency: String },
    Failed { order_id: Uuid, reservation_id: Uuid, reason: String },
    Cancelled { order_id: Uuid },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryEvent {
    ReservationExpired { reservation_id: Uuid },
    Restocked { product_id: String, warehouse_id: String, quantity: u32 },
}

/// Situations the service cannot heal on its own.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    RefundFailed { order_id: Uuid, transaction_ref: String, amount: i64, currency: String, reason: String },
    ReservationLapsed { order_id: Uuid, reservation_id: Uuid },
}
