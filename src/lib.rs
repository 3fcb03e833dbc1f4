//! OpenSASE Fulfillment - order pricing and fulfillment orchestration
//!
//! Turns a cart and a customer into a confirmed, invoiced order without
//! overselling stock or losing money on partial failures.
//!
//! ## Features
//! - Multi-warehouse routing with split shipments
//! - Time-bounded stock reservations with a background expiry sweep
//! - Tiered volume discounts per customer class
//! - Regional tax and weight-based shipping
//! - Charge, persist and commit with compensating rollback
//! - Idempotent order submission

pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod fulfillment;
pub mod ports;

use serde::Serialize;
use thiserror::Error;
use crate::domain::aggregates::{CartError, OrderStateError};
use crate::domain::value_objects::{MoneyError, ProductId, WarehouseId};
use crate::fulfillment::idempotency::IdempotencyError;
use crate::fulfillment::inventory::ReservationError;
use crate::fulfillment::pricing::PricingError;
use crate::fulfillment::routing::RoutingError;
use crate::fulfillment::tax_shipping::TaxShippingError;
use crate::ports::{PaymentError, StoreError};

pub use fulfillment::manager::{CreateOrderRequest, OrderReceipt, OrderTransactionManager, RequestedItem};

// =============================================================================
// Error Types
// =============================================================================

/// Error kinds as reported to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    RoutingFailed,
    InsufficientStock,
    PaymentFailed,
    PersistenceFailed,
    NotFound,
    InternalError,
}

/// A line that could not be covered by stock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortage {
    pub product_id: ProductId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warehouse_id: Option<WarehouseId>,
    pub requested: u32,
    pub available: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No warehouse combination can serve the order: {0}")]
    RoutingFailed(String),

    #[error("Insufficient stock for {} product(s)", .shortages.len())]
    InsufficientStock { shortages: Vec<Shortage> },

    #[error("Payment failed: {reason}")]
    PaymentFailed { reason: String, retryable: bool },

    #[error("Order could not be recorded: {reason}")]
    PersistenceFailed { reason: String, refunded: bool },

    #[error("Order not found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::RoutingFailed(_) => ErrorKind::RoutingFailed,
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::PaymentFailed { .. } => ErrorKind::PaymentFailed,
            Self::PersistenceFailed { .. } => ErrorKind::PersistenceFailed,
            Self::NotFound => ErrorKind::NotFound,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn shortages(&self) -> Option<&[Shortage]> {
        match self {
            Self::InsufficientStock { shortages } => Some(shortages),
            _ => None,
        }
    }
}

impl From<CartError> for OrderError {
    fn from(e: CartError) -> Self { Self::Validation(e.to_string()) }
}

impl From<RoutingError> for OrderError {
    fn from(e: RoutingError) -> Self { Self::RoutingFailed(e.to_string()) }
}

impl From<ReservationError> for OrderError {
    fn from(e: ReservationError) -> Self {
        match e {
            ReservationError::InsufficientStock { shortages } => Self::InsufficientStock { shortages },
            ReservationError::Empty => Self::Validation(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<PricingError> for OrderError {
    fn from(e: PricingError) -> Self { Self::Internal(e.to_string()) }
}

impl From<TaxShippingError> for OrderError {
    fn from(e: TaxShippingError) -> Self {
        match e {
            TaxShippingError::UnknownRegion(_) => Self::Validation(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<PaymentError> for OrderError {
    fn from(e: PaymentError) -> Self { Self::PaymentFailed { retryable: e.is_retryable(), reason: e.to_string() } }
}

impl From<StoreError> for OrderError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(_) => Self::PersistenceFailed { reason: e.to_string(), refunded: false },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<IdempotencyError> for OrderError {
    fn from(e: IdempotencyError) -> Self {
        match e {
            IdempotencyError::KeyReused(_) => Self::Validation(e.to_string()),
            IdempotencyError::Poisoned => Self::Internal(e.to_string()),
        }
    }
}

impl From<OrderStateError> for OrderError {
    fn from(e: OrderStateError) -> Self { Self::Internal(e.to_string()) }
}

impl From<MoneyError> for OrderError {
    fn from(e: MoneyError) -> Self { Self::Internal(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, OrderError>;
