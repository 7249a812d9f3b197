//! State management for marketplace orders.
//!
//! Exposes the order state machine that owns every status change after an
//! order has been placed.

pub mod order;

pub use order::{OrderStateError, OrderStateMachine};
