//! Child order lifecycle.
//!
//! Every slice released by a ticket is tracked through an explicit state
//! machine; illegal transitions return a `TransitionError` and never mutate
//! the order.

pub mod child_order;

pub use child_order::{Applied, ChildEvent, ChildOrder, ChildOrderState, TransitionError};
