//! Fulfillment services: routing, reservation, pricing and the order
//! transaction manager that drives them.
pub mod idempotency;
pub mod inventory;
pub mod manager;
pub mod pricing;
pub mod retry;
pub mod routing;
pub mod sweeper;
pub mod tax_shipping;
