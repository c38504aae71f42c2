//! Order transport boundary.
//!
//! The engine hands child orders to an [`OrderTransport`] and never waits
//! for the outcome: `submit` and `cancel` only report whether the request
//! was accepted for delivery. Fills, cancel acknowledgements and
//! asynchronous rejections come back later as [`OrderEvent`]s.
//!
//! Implementations take `&self` and must be `Send + Sync` so one transport
//! can be shared by every instrument lane.
//!
//! [`OrderEvent`]: crate::types::OrderEvent

use std::sync::Arc;

use thiserror::Error;

use crate::types::{ChildOrderId, ChildOrderRequest};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport refused this request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The transport could not take requests at all.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub trait OrderTransport: Send + Sync {
    fn submit(&self, request: &ChildOrderRequest) -> Result<(), TransportError>;
    fn cancel(&self, order_id: &ChildOrderId) -> Result<(), TransportError>;
}

impl<T: OrderTransport + ?Sized> OrderTransport for Arc<T> {
    fn submit(&self, request: &ChildOrderRequest) -> Result<(), TransportError> {
        (**self).submit(request)
    }

    fn cancel(&self, order_id: &ChildOrderId) -> Result<(), TransportError> {
        (**self).cancel(order_id)
    }
}
