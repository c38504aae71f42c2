//! Transport decorator that keeps the shared order-id route map current.
//!
//! The route is written before the inner transport sees the submission, so
//! an order event that races back through the dispatcher always finds its
//! lane.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vwx_execution::{ChildOrderId, ChildOrderRequest, OrderRoutes, OrderTransport, TransportError};

pub(crate) type SharedRoutes = Arc<Mutex<OrderRoutes>>;

pub(crate) fn lock(routes: &SharedRoutes) -> MutexGuard<'_, OrderRoutes> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct RoutingTransport<T: ?Sized> {
    inner: Arc<T>,
    routes: SharedRoutes,
}

impl<T: ?Sized> RoutingTransport<T> {
    pub(crate) fn new(inner: Arc<T>, routes: SharedRoutes) -> Self {
        Self { inner, routes }
    }
}

impl<T: ?Sized> Clone for RoutingTransport<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            routes: Arc::clone(&self.routes),
        }
    }
}

impl<T: OrderTransport + ?Sized> OrderTransport for RoutingTransport<T> {
    fn submit(&self, request: &ChildOrderRequest) -> Result<(), TransportError> {
        lock(&self.routes).register(request.order_id.clone(), request.instrument.clone());
        let res = self.inner.submit(request);
        if res.is_err() {
            lock(&self.routes).deregister(&request.order_id);
        }
        res
    }

    fn cancel(&self, order_id: &ChildOrderId) -> Result<(), TransportError> {
        self.inner.cancel(order_id)
    }
}
