//! Aggregate Models: Order, Payment, Refund. Each aggregate's
//! public operations are state transitions validated against an explicit
//! table of allowed edges.

pub mod events;
pub mod order;
pub mod payment;
pub mod refund;

pub use order::{Order, OrderLineItem, OrderStatus};
pub use payment::{Payment, PaymentMethod, PaymentStatus};
pub use refund::{Refund, RefundStatus};
