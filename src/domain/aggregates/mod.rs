//! Aggregates module
pub mod product;
pub mod warehouse;
pub mod cart;
pub mod reservation;
pub mod order;
pub mod invoice;

pub use product::Product;
pub use warehouse::{AssignedLine, OperatingHours, Warehouse, WarehouseAssignment};
pub use cart::{Cart, CartError, CartItem};
pub use reservation::{Reservation, ReservationLine, ReservationState, ReservationStateError, Transition};
pub use order::{Address, Adjustments, Order, OrderDraft, OrderNumberGenerator, OrderStateError, OrderItem, OrderStatus};
pub use invoice::{Invoice, PaymentStatus};
