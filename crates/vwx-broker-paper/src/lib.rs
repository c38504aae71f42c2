//! Deterministic in-memory paper transport.
//!
//! - Submissions and cancel requests are recorded in arrival order.
//! - Nothing fills on its own. Tests and the replay CLI decide when and at
//!   what price an order fills, and get back the [`OrderEvent`] to feed into
//!   the engine.
//! - Event ids are derived from the order id and a per-order sequence
//!   number: `paper:evt:{order_id}:{seq}`. No randomness, no timestamps.
//! - `reject_next` makes the next `submit` fail synchronously;
//!   [`PaperTransport::reject`] produces an asynchronous rejection instead.
//!
//! All state sits behind one `Mutex`, so the transport can be shared across
//! instrument lanes.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use vwx_execution::{
    ChildOrderId, ChildOrderRequest, OrderEvent, OrderEventStatus, OrderTransport, TransportError,
};
use vwx_md::Instrument;

/// A child order the paper venue is still working.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaperOrder {
    pub request: ChildOrderRequest,
    pub filled_qty: i64,
    pub cancel_requested: bool,
    event_seq: u64,
}

impl PaperOrder {
    pub fn open_qty(&self) -> i64 {
        self.request.quantity - self.filled_qty
    }

    fn next_event_id(&mut self) -> String {
        self.event_seq += 1;
        format!("paper:evt:{}:{}", self.request.order_id, self.event_seq)
    }
}

#[derive(Debug, Default)]
struct PaperState {
    open: BTreeMap<ChildOrderId, PaperOrder>,
    submissions: Vec<ChildOrderRequest>,
    cancel_requests: Vec<ChildOrderId>,
    reject_next: Option<String>,
    unavailable: bool,
}

#[derive(Debug, Default)]
pub struct PaperTransport {
    state: Mutex<PaperState>,
}

impl PaperTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `submit` fails with [`TransportError::Rejected`].
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.state().reject_next = Some(reason.into());
    }

    /// While set, every `submit` and `cancel` fails with
    /// [`TransportError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Every accepted submission, in order.
    pub fn submissions(&self) -> Vec<ChildOrderRequest> {
        self.state().submissions.clone()
    }

    pub fn cancel_requests(&self) -> Vec<ChildOrderId> {
        self.state().cancel_requests.clone()
    }

    /// Orders still working, ordered by id.
    pub fn open_orders(&self) -> Vec<PaperOrder> {
        self.state().open.values().cloned().collect()
    }

    pub fn open_order(&self, order_id: &ChildOrderId) -> Option<PaperOrder> {
        self.state().open.get(order_id).cloned()
    }

    pub fn accept(&self, order_id: &ChildOrderId) -> Option<OrderEvent> {
        let mut st = self.state();
        let ord = st.open.get_mut(order_id)?;
        Some(OrderEvent::accepted(order_id.clone()).with_event_id(ord.next_event_id()))
    }

    /// Fill up to `qty` of an open order at `price_micros`. The quantity is
    /// capped at the open quantity; the order closes once fully filled.
    pub fn fill(
        &self,
        order_id: &ChildOrderId,
        qty: i64,
        price_micros: i64,
    ) -> Option<OrderEvent> {
        let mut st = self.state();
        let ord = st.open.get_mut(order_id)?;
        let qty = qty.min(ord.open_qty());
        if qty <= 0 {
            return None;
        }
        ord.filled_qty += qty;
        let event_id = ord.next_event_id();
        let done = ord.open_qty() == 0;
        let event = if done {
            OrderEvent::filled(order_id.clone(), qty, price_micros)
        } else {
            OrderEvent::partial_fill(order_id.clone(), qty, price_micros)
        };
        if done {
            st.open.remove(order_id);
        }
        Some(event.with_event_id(event_id))
    }

    /// Fill every open order for `instrument` completely at `price_micros`.
    pub fn fill_all_at(&self, instrument: &Instrument, price_micros: i64) -> Vec<OrderEvent> {
        let ids: Vec<ChildOrderId> = self
            .state()
            .open
            .values()
            .filter(|o| &o.request.instrument == instrument)
            .map(|o| o.request.order_id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| self.fill(id, i64::MAX, price_micros))
            .collect()
    }

    /// Confirm a requested cancel; the order closes with whatever it filled.
    pub fn acknowledge_cancel(&self, order_id: &ChildOrderId) -> Option<OrderEvent> {
        self.close(order_id, OrderEventStatus::Cancelled, true)
    }

    /// Confirm every requested cancel.
    pub fn acknowledge_all_cancels(&self) -> Vec<OrderEvent> {
        let ids: Vec<ChildOrderId> = self
            .state()
            .open
            .values()
            .filter(|o| o.cancel_requested)
            .map(|o| o.request.order_id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| self.acknowledge_cancel(id))
            .collect()
    }

    /// Reject an open order after it was accepted for delivery.
    pub fn reject(&self, order_id: &ChildOrderId) -> Option<OrderEvent> {
        self.close(order_id, OrderEventStatus::Rejected, false)
    }

    fn close(
        &self,
        order_id: &ChildOrderId,
        status: OrderEventStatus,
        requires_cancel: bool,
    ) -> Option<OrderEvent> {
        let mut st = self.state();
        let ord = st.open.get_mut(order_id)?;
        if requires_cancel && !ord.cancel_requested {
            return None;
        }
        let event_id = ord.next_event_id();
        st.open.remove(order_id);
        let event = match status {
            OrderEventStatus::Rejected => OrderEvent::rejected(order_id.clone()),
            _ => OrderEvent::cancelled(order_id.clone()),
        };
        Some(event.with_event_id(event_id))
    }
}

impl OrderTransport for PaperTransport {
    fn submit(&self, request: &ChildOrderRequest) -> Result<(), TransportError> {
        let mut st = self.state();
        if st.unavailable {
            return Err(TransportError::Unavailable("paper venue offline".to_string()));
        }
        if let Some(reason) = st.reject_next.take() {
            return Err(TransportError::Rejected(reason));
        }
        if st.open.contains_key(&request.order_id) {
            return Err(TransportError::Rejected(format!(
                "duplicate order id {}",
                request.order_id
            )));
        }
        st.submissions.push(request.clone());
        st.open.insert(
            request.order_id.clone(),
            PaperOrder {
                request: request.clone(),
                filled_qty: 0,
                cancel_requested: false,
                event_seq: 0,
            },
        );
        Ok(())
    }

    fn cancel(&self, order_id: &ChildOrderId) -> Result<(), TransportError> {
        let mut st = self.state();
        if st.unavailable {
            return Err(TransportError::Unavailable("paper venue offline".to_string()));
        }
        let Some(ord) = st.open.get_mut(order_id) else {
            return Err(TransportError::Rejected(format!("unknown order {order_id}")));
        };
        ord.cancel_requested = true;
        st.cancel_requests.push(order_id.clone());
        Ok(())
    }
}
