//! Per-instrument execution ticket.
//!
//! A ticket tracks one in-flight target change: direction, target quantity,
//! confirmed fills, and at most one outstanding child order. `remaining` is
//! only ever decremented by confirmed fills, never by submission.
//!
//! Re-targeting replaces the target quantity and restarts the fill count, so
//! sending the same delta twice with no fills in between is idempotent.
//! Each re-target bumps `epoch`; slice decisions carry the epoch they were
//! computed under and are discarded at commit if it no longer matches.

use serde::{Deserialize, Serialize};
use vwx_md::Instrument;

use crate::oms::{Applied, ChildEvent, ChildOrder, ChildOrderState, TransitionError};
use crate::policy::SlicePolicy;
use crate::types::{ChildOrderId, OrderEvent, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    /// Created, no slice released yet.
    Active,
    /// A child order is outstanding.
    PartiallyWorking,
    /// Nothing outstanding; waiting for a favorable tick.
    WaitingForFavorablePrice,
    Retired,
}

/// What a re-target requires of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retarget {
    pub side: Side,
    pub quantity: i64,
    /// The outstanding child must be cancelled before any new slice.
    pub cancel: Option<ChildOrderId>,
}

/// Result of applying an order event to the ticket's outstanding child.
#[derive(Debug, Clone)]
pub struct FillOutcome {
    /// Quantity credited against the ticket's remaining.
    pub credited: i64,
    /// Fill quantity that could not be credited (overfill).
    pub excess: i64,
    /// Fill quantity from a child on the opposite side of the current
    /// target; never credited.
    pub stale: i64,
    /// The child, once it reached a terminal state.
    pub closed: Option<ChildOrder>,
}

#[derive(Debug, Clone)]
pub struct ExecutionTicket {
    id: u64,
    instrument: Instrument,
    side: Side,
    target_qty: i64,
    filled_qty: i64,
    policy: SlicePolicy,
    epoch: u64,
    deadline_ms: Option<i64>,
    outstanding: Option<ChildOrder>,
    state: TicketState,
    slices_submitted: u64,
}

impl ExecutionTicket {
    /// `quantity` is signed and must be nonzero.
    pub fn new(
        id: u64,
        instrument: Instrument,
        quantity: i64,
        policy: SlicePolicy,
        deadline_ms: Option<i64>,
    ) -> Self {
        debug_assert!(quantity != 0, "ticket quantity must be nonzero");
        Self {
            id,
            instrument,
            side: Side::from_signed(quantity).unwrap_or(Side::Buy),
            target_qty: quantity.abs(),
            filled_qty: 0,
            policy,
            epoch: 0,
            deadline_ms,
            outstanding: None,
            state: TicketState::Active,
            slices_submitted: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn target_qty(&self) -> i64 {
        self.target_qty
    }

    pub fn filled_qty(&self) -> i64 {
        self.filled_qty
    }

    pub fn remaining(&self) -> i64 {
        (self.target_qty - self.filled_qty).max(0)
    }

    pub fn policy(&self) -> &SlicePolicy {
        &self.policy
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn deadline_ms(&self) -> Option<i64> {
        self.deadline_ms
    }

    pub fn state(&self) -> TicketState {
        self.state
    }

    pub fn outstanding(&self) -> Option<&ChildOrder> {
        self.outstanding.as_ref()
    }

    pub fn slices_submitted(&self) -> u64 {
        self.slices_submitted
    }

    /// A new slice may be released.
    pub fn can_slice(&self) -> bool {
        self.state != TicketState::Retired && self.outstanding.is_none() && self.remaining() > 0
    }

    /// Remaining is zero and nothing is outstanding.
    pub fn is_complete(&self) -> bool {
        self.outstanding.is_none() && self.remaining() == 0
    }

    /// Replace the target with a new signed quantity (nonzero).
    pub fn retarget(
        &mut self,
        quantity: i64,
        policy: SlicePolicy,
        deadline_ms: Option<i64>,
    ) -> Retarget {
        debug_assert!(quantity != 0, "retarget quantity must be nonzero");
        self.side = Side::from_signed(quantity).unwrap_or(self.side);
        self.target_qty = quantity.abs();
        self.filled_qty = 0;
        self.policy = policy;
        self.deadline_ms = deadline_ms;
        self.epoch += 1;

        let cancel = self
            .needs_cancel()
            .then(|| self.outstanding.as_ref().map(|c| c.order_id.clone()))
            .flatten();

        Retarget {
            side: self.side,
            quantity: self.target_qty,
            cancel,
        }
    }

    /// The live child no longer fits the target (wrong side, or more open
    /// than remains) and no cancel is in flight for it.
    pub fn needs_cancel(&self) -> bool {
        let remaining = self.remaining();
        self.outstanding.as_ref().is_some_and(|child| {
            let misfit = child.side != self.side || child.open_qty() > remaining;
            misfit && child.state != ChildOrderState::CancelPending && child.is_live()
        })
    }

    /// Record a child that the transport accepted for submission.
    pub fn attach_child(&mut self, child: ChildOrder) {
        debug_assert!(self.outstanding.is_none(), "ticket already has a child");
        self.outstanding = Some(child);
        self.slices_submitted += 1;
        self.state = TicketState::PartiallyWorking;
    }

    /// The transport refused a slice synchronously.
    pub fn submission_failed(&mut self) {
        if self.state != TicketState::Retired {
            self.state = TicketState::WaitingForFavorablePrice;
        }
    }

    /// Mark the outstanding child cancel-pending. Returns its id if a cancel
    /// request should be sent.
    pub fn begin_cancel(&mut self) -> Option<ChildOrderId> {
        let child = self.outstanding.as_mut()?;
        if child.state == ChildOrderState::CancelPending {
            return None;
        }
        child
            .apply(&ChildEvent::CancelRequest, None)
            .ok()
            .map(|_| child.order_id.clone())
    }

    /// The transport refused a cancel request synchronously.
    pub fn cancel_failed(&mut self) {
        if let Some(child) = self.outstanding.as_mut() {
            let _ = child.apply(&ChildEvent::CancelReject, None);
        }
    }

    /// Apply a transport report for the outstanding child.
    ///
    /// The caller must have checked that `event.order_id` is the outstanding
    /// child's id.
    pub fn apply_order_event(&mut self, event: &OrderEvent) -> Result<FillOutcome, TransitionError> {
        let Some(child) = self.outstanding.as_mut() else {
            return Ok(FillOutcome {
                credited: 0,
                excess: 0,
                stale: 0,
                closed: None,
            });
        };

        let Applied { filled, excess } =
            child.apply(&ChildEvent::from_order_event(event), event.event_id.as_deref())?;

        let (credited, overfill, stale) = if child.side == self.side {
            let room = (self.target_qty - self.filled_qty).max(0);
            let credited = filled.min(room);
            (credited, excess + filled - credited, 0)
        } else {
            (0, excess, filled)
        };
        self.filled_qty += credited;

        let closed = if child.state.is_terminal() {
            self.outstanding.take()
        } else {
            None
        };
        if self.state != TicketState::Retired {
            self.state = if self.outstanding.is_some() {
                TicketState::PartiallyWorking
            } else {
                TicketState::WaitingForFavorablePrice
            };
        }

        Ok(FillOutcome {
            credited,
            excess: overfill,
            stale,
            closed,
        })
    }

    /// Retire the ticket, handing back a still-live child.
    pub fn retire(&mut self) -> Option<ChildOrder> {
        self.state = TicketState::Retired;
        self.epoch += 1;
        self.outstanding.take().filter(ChildOrder::is_live)
    }

    pub fn snapshot(&self) -> TicketSnapshot {
        TicketSnapshot {
            id: self.id,
            instrument: self.instrument.clone(),
            side: self.side,
            target_qty: self.target_qty,
            filled_qty: self.filled_qty,
            remaining: self.remaining(),
            epoch: self.epoch,
            state: self.state,
            outstanding: self.outstanding.as_ref().map(|c| c.order_id.clone()),
            slices_submitted: self.slices_submitted,
            deadline_ms: self.deadline_ms,
        }
    }
}

/// Serializable read-only view of a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSnapshot {
    pub id: u64,
    pub instrument: Instrument,
    pub side: Side,
    pub target_qty: i64,
    pub filled_qty: i64,
    pub remaining: i64,
    pub epoch: u64,
    pub state: TicketState,
    pub outstanding: Option<ChildOrderId>,
    pub slices_submitted: u64,
    pub deadline_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spy() -> Instrument {
        Instrument::new("SPY", "USA")
    }

    fn ticket(qty: i64) -> ExecutionTicket {
        ExecutionTicket::new(1, spy(), qty, SlicePolicy::FixedLot { lot: 100 }, None)
    }

    fn attach(t: &mut ExecutionTicket, id: &str, side: Side, qty: i64) {
        t.attach_child(ChildOrder::new(ChildOrderId::new(id), side, qty, 1, 1));
    }

    #[test]
    fn new_ticket_from_signed_quantity() {
        let t = ticket(-300);
        assert_eq!(t.side(), Side::Sell);
        assert_eq!(t.remaining(), 300);
        assert_eq!(t.state(), TicketState::Active);
        assert!(t.can_slice());
    }

    #[test]
    fn fills_decrement_remaining_only_when_confirmed() {
        let mut t = ticket(1_000);
        attach(&mut t, "c1", Side::Buy, 100);
        assert_eq!(t.remaining(), 1_000);
        assert!(!t.can_slice());

        let id = ChildOrderId::new("c1");
        let o = t.apply_order_event(&OrderEvent::partial_fill(id.clone(), 40, 1)).unwrap();
        assert_eq!(o.credited, 40);
        assert!(o.closed.is_none());
        assert_eq!(t.remaining(), 960);
        assert_eq!(t.state(), TicketState::PartiallyWorking);

        let o = t.apply_order_event(&OrderEvent::filled(id, 60, 1)).unwrap();
        assert!(o.closed.is_some());
        assert_eq!(t.remaining(), 900);
        assert_eq!(t.state(), TicketState::WaitingForFavorablePrice);
        assert!(t.can_slice());
    }

    #[test]
    fn rejected_child_returns_to_waiting_without_decrement() {
        let mut t = ticket(500);
        attach(&mut t, "c1", Side::Buy, 100);
        let o = t
            .apply_order_event(&OrderEvent::rejected(ChildOrderId::new("c1")))
            .unwrap();
        assert_eq!(o.credited, 0);
        assert_eq!(t.remaining(), 500);
        assert_eq!(t.state(), TicketState::WaitingForFavorablePrice);
    }

    #[test]
    fn same_retarget_twice_is_idempotent() {
        let mut t = ticket(1_000);
        let policy = SlicePolicy::FixedLot { lot: 100 };
        t.retarget(800, policy.clone(), None);
        let r1 = t.remaining();
        t.retarget(800, policy, None);
        assert_eq!(t.remaining(), r1);
        assert_eq!(t.remaining(), 800);
    }

    #[test]
    fn opposite_retarget_requests_cancel_and_ignores_old_fills() {
        let mut t = ticket(500);
        attach(&mut t, "c1", Side::Buy, 100);

        let r = t.retarget(-200, SlicePolicy::FixedLot { lot: 100 }, None);
        assert_eq!(r.side, Side::Sell);
        assert_eq!(r.cancel, Some(ChildOrderId::new("c1")));
        assert_eq!(t.begin_cancel(), Some(ChildOrderId::new("c1")));
        assert!(!t.can_slice());

        let o = t
            .apply_order_event(&OrderEvent::partial_fill(ChildOrderId::new("c1"), 30, 1))
            .unwrap();
        assert_eq!(o.credited, 0);
        assert_eq!(o.stale, 30);
        assert_eq!(t.remaining(), 200);

        t.apply_order_event(&OrderEvent::cancelled(ChildOrderId::new("c1")))
            .unwrap();
        assert!(t.can_slice());
        assert_eq!(t.side(), Side::Sell);
    }

    #[test]
    fn shrinking_below_open_quantity_requests_cancel() {
        let mut t = ticket(1_000);
        attach(&mut t, "c1", Side::Buy, 100);
        let r = t.retarget(50, SlicePolicy::FixedLot { lot: 100 }, None);
        assert_eq!(r.cancel, Some(ChildOrderId::new("c1")));

        let r = t.retarget(500, SlicePolicy::FixedLot { lot: 100 }, None);
        assert!(r.cancel.is_none());
    }

    #[test]
    fn overfill_is_clamped() {
        let mut t = ticket(1_000);
        attach(&mut t, "c1", Side::Buy, 100);
        t.retarget(30, SlicePolicy::FixedLot { lot: 100 }, None);
        let o = t
            .apply_order_event(&OrderEvent::filled(ChildOrderId::new("c1"), 100, 1))
            .unwrap();
        assert_eq!(o.credited, 30);
        assert_eq!(o.excess, 70);
        assert_eq!(t.remaining(), 0);
        assert!(t.is_complete());
    }

    #[test]
    fn retire_hands_back_live_child() {
        let mut t = ticket(1_000);
        attach(&mut t, "c1", Side::Buy, 100);
        let epoch = t.epoch();
        let child = t.retire().unwrap();
        assert_eq!(child.order_id, ChildOrderId::new("c1"));
        assert_eq!(t.state(), TicketState::Retired);
        assert!(t.epoch() > epoch);
        assert!(!t.can_slice());
    }
}
