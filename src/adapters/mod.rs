//! Implementations of the collaborator ports.
pub mod memory;
pub mod nats;
pub mod postgres;

pub use memory::{InMemoryCatalog, InMemoryOrderStore, SandboxPaymentGateway, TracingNotifier};
pub use nats::NatsNotifier;
pub use postgres::PgOrderStore;
