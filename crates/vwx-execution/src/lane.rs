//! One instrument's serialization unit.
//!
//! An [`InstrumentLane`] owns everything the engine keeps for a single
//! instrument: tick sequencer, session calendar, VWAP accumulator, the
//! (at most one) active ticket, and children orphaned by a cancel-all that
//! are still waiting for their terminal report. Nothing in a lane refers to
//! another lane, so lanes can be driven from separate tasks.
//!
//! Every entry point returns a [`LaneOutput`]. Input that is rejected
//! outright comes back as `Err`; problems with side effects of accepted
//! input (transport refusals, overfills) are collected in
//! [`LaneOutput::errors`].
//!
//! # Ordering on a market update
//!
//! 1. sequencer admits or drops the tick
//! 2. daily-mode session rollover resets the VWAP
//! 3. the tick is accumulated into the VWAP
//! 4. the scheduler evaluates the ticket against the updated VWAP
//! 5. the decision is committed if ticket id and epoch still match

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vwx_md::{Instrument, MarketUpdate, SessionCalendar, SessionConfig, TickSequencer, VwapState};

use crate::error::EngineError;
use crate::oms::{ChildEvent, ChildOrder, ChildOrderState};
use crate::policy::ExecutionConfig;
use crate::scheduler::{SliceDecision, SliceScheduler};
use crate::ticket::{ExecutionTicket, TicketSnapshot};
use crate::transport::OrderTransport;
use crate::types::{
    ChildOrderId, ChildOrderRequest, ExecutionNotification, OrderEvent, OrderEventStatus,
    RetireReason, TargetDelta,
};

/// Everything a lane call produced.
#[derive(Debug, Default, Clone)]
pub struct LaneOutput {
    pub notifications: Vec<ExecutionNotification>,
    pub errors: Vec<EngineError>,
    /// Child ids handed to the transport during this call.
    pub opened_orders: Vec<ChildOrderId>,
    /// Child ids that reached a terminal state during this call.
    pub closed_orders: Vec<ChildOrderId>,
}

impl LaneOutput {
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
            && self.errors.is_empty()
            && self.opened_orders.is_empty()
            && self.closed_orders.is_empty()
    }

    /// Child orders submitted during this call.
    pub fn submissions(&self) -> impl Iterator<Item = &ChildOrderRequest> {
        self.notifications.iter().filter_map(|n| match n {
            ExecutionNotification::SliceSubmitted { request, .. } => Some(request),
            _ => None,
        })
    }

    pub fn merge(&mut self, other: LaneOutput) {
        self.notifications.extend(other.notifications);
        self.errors.extend(other.errors);
        self.opened_orders.extend(other.opened_orders);
        self.closed_orders.extend(other.closed_orders);
    }
}

/// Serializable read-only view of a lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneSnapshot {
    pub instrument: Instrument,
    pub vwap_micros: Option<i64>,
    pub session_start_ms: Option<i64>,
    pub last_price_micros: Option<i64>,
    pub ticks_admitted: u64,
    pub ticks_dropped: u64,
    pub ticket: Option<TicketSnapshot>,
    pub orphaned_orders: Vec<ChildOrderId>,
}

#[derive(Debug)]
pub struct InstrumentLane {
    instrument: Instrument,
    config: ExecutionConfig,
    scheduler: SliceScheduler,
    sequencer: TickSequencer,
    calendar: SessionCalendar,
    vwap: VwapState,
    ticket: Option<ExecutionTicket>,
    orphans: BTreeMap<ChildOrderId, ChildOrder>,
    /// Distinguishes lanes re-created for the same instrument so child ids
    /// never repeat.
    generation: u64,
    next_ticket_id: u64,
    next_child_seq: u64,
    last_price_micros: Option<i64>,
}

impl InstrumentLane {
    /// `config` must already be validated.
    pub fn new(
        instrument: Instrument,
        config: ExecutionConfig,
        session: SessionConfig,
        generation: u64,
    ) -> Self {
        Self {
            scheduler: SliceScheduler::new(&config),
            instrument,
            config,
            sequencer: TickSequencer::new(),
            calendar: SessionCalendar::new(session),
            vwap: VwapState::new(),
            ticket: None,
            orphans: BTreeMap::new(),
            generation,
            next_ticket_id: 1,
            next_child_seq: 1,
            last_price_micros: None,
        }
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn vwap(&self) -> &VwapState {
        &self.vwap
    }

    pub fn ticket(&self) -> Option<&ExecutionTicket> {
        self.ticket.as_ref()
    }

    pub fn last_price_micros(&self) -> Option<i64> {
        self.last_price_micros
    }

    /// Child ids this lane can still receive events for.
    pub fn live_orders(&self) -> Vec<ChildOrderId> {
        self.ticket
            .as_ref()
            .and_then(|t| t.outstanding())
            .map(|c| c.order_id.clone())
            .into_iter()
            .chain(self.orphans.keys().cloned())
            .collect()
    }

    pub fn snapshot(&self) -> LaneSnapshot {
        LaneSnapshot {
            instrument: self.instrument.clone(),
            vwap_micros: self.vwap.estimate(),
            session_start_ms: self.vwap.session_start_ms(),
            last_price_micros: self.last_price_micros,
            ticks_admitted: self.sequencer.admitted(),
            ticks_dropped: self.sequencer.dropped(),
            ticket: self.ticket.as_ref().map(ExecutionTicket::snapshot),
            orphaned_orders: self.orphans.keys().cloned().collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Target deltas
    // -----------------------------------------------------------------------

    pub fn on_target_delta<T: OrderTransport + ?Sized>(
        &mut self,
        delta: &TargetDelta,
        transport: &T,
    ) -> Result<LaneOutput, EngineError> {
        let mut out = LaneOutput::default();
        if delta.quantity == 0 {
            debug!(instrument = %self.instrument, "target/zero_delta_ignored");
            return Ok(out);
        }

        let policy = delta
            .slice_policy
            .clone()
            .unwrap_or_else(|| self.config.slice_policy.clone());
        policy.validate().map_err(|source| EngineError::Config {
            instrument: self.instrument.clone(),
            source,
        })?;

        match self.ticket.as_mut() {
            Some(ticket) => {
                let r = ticket.retarget(delta.quantity, policy, delta.deadline_ms);
                info!(
                    instrument = %self.instrument,
                    ticket_id = ticket.id(),
                    side = %r.side,
                    quantity = r.quantity,
                    "ticket/retargeted"
                );
                out.notifications
                    .push(ExecutionNotification::TicketRetargeted {
                        instrument: self.instrument.clone(),
                        ticket_id: ticket.id(),
                        side: r.side,
                        quantity: r.quantity,
                    });
                if r.cancel.is_some() {
                    self.cancel_outstanding(transport, &mut out);
                }
            }
            None => {
                let id = self.next_ticket_id;
                self.next_ticket_id += 1;
                let ticket = ExecutionTicket::new(
                    id,
                    self.instrument.clone(),
                    delta.quantity,
                    policy,
                    delta.deadline_ms,
                );
                info!(
                    instrument = %self.instrument,
                    ticket_id = id,
                    side = %ticket.side(),
                    quantity = ticket.target_qty(),
                    "ticket/created"
                );
                out.notifications.push(ExecutionNotification::TicketCreated {
                    instrument: self.instrument.clone(),
                    ticket_id: id,
                    side: ticket.side(),
                    quantity: ticket.target_qty(),
                });
                self.ticket = Some(ticket);
            }
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Market data
    // -----------------------------------------------------------------------

    pub fn on_market_update<T: OrderTransport + ?Sized>(
        &mut self,
        update: &MarketUpdate,
        transport: &T,
    ) -> Result<LaneOutput, EngineError> {
        let data_err = |source| EngineError::Data {
            instrument: update.instrument.clone(),
            source,
        };

        if let Err(e) = self.sequencer.admit(update) {
            debug!(instrument = %self.instrument, ts_ms = update.ts_ms, error = %e, "md/tick_dropped");
            return Err(data_err(e));
        }

        let mut out = LaneOutput::default();
        if let Some(session_start_ms) = self.calendar.observe(update.ts_ms) {
            self.reset_session(session_start_ms, &mut out);
        }
        self.vwap
            .update(update.price_micros, update.volume)
            .map_err(data_err)?;
        self.last_price_micros = Some(update.price_micros);

        // A cancel the transport refused earlier is retried while the child
        // still does not fit the ticket.
        if self.ticket.as_ref().is_some_and(ExecutionTicket::needs_cancel) {
            self.cancel_outstanding(transport, &mut out);
        }

        let decision = self.ticket.as_ref().and_then(|t| {
            self.scheduler
                .on_market_update(t, update.price_micros, update.volume, &self.vwap)
        });
        if let Some(decision) = decision {
            self.commit_slice(&decision, update.ts_ms, transport, &mut out);
        }
        Ok(out)
    }

    pub fn on_session_boundary(&mut self, session_start_ms: i64) -> LaneOutput {
        let mut out = LaneOutput::default();
        self.calendar.mark_explicit(session_start_ms);
        self.reset_session(session_start_ms, &mut out);
        out
    }

    fn reset_session(&mut self, session_start_ms: i64, out: &mut LaneOutput) {
        self.vwap.reset(session_start_ms);
        info!(instrument = %self.instrument, session_start_ms, "md/session_reset");
        out.notifications.push(ExecutionNotification::SessionReset {
            instrument: self.instrument.clone(),
            session_start_ms,
        });
    }

    /// Commit a scheduler decision. A decision whose ticket was retired or
    /// re-targeted since it was computed is discarded.
    pub fn commit_slice<T: OrderTransport + ?Sized>(
        &mut self,
        decision: &SliceDecision,
        ts_ms: i64,
        transport: &T,
        out: &mut LaneOutput,
    ) {
        let Some(ticket) = self.ticket.as_mut() else {
            debug!(instrument = %self.instrument, ticket_id = decision.ticket_id, "slice/discarded");
            out.notifications.push(ExecutionNotification::SliceDiscarded {
                instrument: self.instrument.clone(),
                ticket_id: decision.ticket_id,
            });
            return;
        };
        if ticket.id() != decision.ticket_id
            || ticket.epoch() != decision.epoch
            || ticket.side() != decision.side
            || !ticket.can_slice()
        {
            debug!(
                instrument = %self.instrument,
                ticket_id = decision.ticket_id,
                epoch = decision.epoch,
                "slice/discarded"
            );
            out.notifications.push(ExecutionNotification::SliceDiscarded {
                instrument: self.instrument.clone(),
                ticket_id: decision.ticket_id,
            });
            return;
        }

        let quantity = decision.quantity.min(ticket.remaining());
        let order_id = child_order_id(&self.instrument, self.generation, self.next_child_seq);
        self.next_child_seq += 1;

        let request = ChildOrderRequest {
            order_id: order_id.clone(),
            instrument: self.instrument.clone(),
            side: decision.side,
            quantity,
            price_ref_micros: decision.price_micros,
            vwap_ref_micros: decision.vwap_micros,
            ts_ms,
        };

        match transport.submit(&request) {
            Ok(()) => {
                ticket.attach_child(ChildOrder::new(
                    order_id.clone(),
                    decision.side,
                    quantity,
                    decision.price_micros,
                    decision.vwap_micros,
                ));
                info!(
                    instrument = %self.instrument,
                    ticket_id = ticket.id(),
                    order_id = %order_id,
                    side = %decision.side,
                    quantity,
                    price_micros = decision.price_micros,
                    vwap_micros = decision.vwap_micros,
                    "slice/submitted"
                );
                out.opened_orders.push(order_id);
                out.notifications.push(ExecutionNotification::SliceSubmitted {
                    request,
                    ticket_id: ticket.id(),
                });
            }
            Err(source) => {
                ticket.submission_failed();
                warn!(
                    instrument = %self.instrument,
                    ticket_id = ticket.id(),
                    order_id = %order_id,
                    error = %source,
                    "slice/submit_failed"
                );
                out.notifications.push(ExecutionNotification::SliceRejected {
                    instrument: self.instrument.clone(),
                    ticket_id: ticket.id(),
                    order_id: order_id.clone(),
                    reason: source.to_string(),
                });
                out.errors.push(EngineError::Submission {
                    instrument: self.instrument.clone(),
                    order_id,
                    source,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Order events
    // -----------------------------------------------------------------------

    pub fn on_order_event(&mut self, event: &OrderEvent) -> Result<LaneOutput, EngineError> {
        if self.orphans.contains_key(&event.order_id) {
            return self.on_orphan_event(event);
        }

        let Some(ticket) = self.ticket.as_mut() else {
            return Err(EngineError::NoActiveTicket {
                instrument: self.instrument.clone(),
                order_id: event.order_id.clone(),
            });
        };
        if ticket.outstanding().map(|c| &c.order_id) != Some(&event.order_id) {
            return Err(EngineError::UnknownOrder(event.order_id.clone()));
        }

        let outcome = ticket
            .apply_order_event(event)
            .map_err(|source| EngineError::Transition {
                order_id: event.order_id.clone(),
                source,
            })?;

        let mut out = LaneOutput::default();
        if outcome.credited > 0 {
            debug!(
                instrument = %self.instrument,
                order_id = %event.order_id,
                credited = outcome.credited,
                remaining = ticket.remaining(),
                "ticket/fill"
            );
        }
        if outcome.stale > 0 {
            info!(
                instrument = %self.instrument,
                order_id = %event.order_id,
                qty = outcome.stale,
                "ticket/stale_direction_fill"
            );
        }
        if outcome.excess > 0 {
            warn!(
                instrument = %self.instrument,
                order_id = %event.order_id,
                excess = outcome.excess,
                "ticket/overfill"
            );
            out.notifications.push(ExecutionNotification::Anomaly {
                instrument: Some(self.instrument.clone()),
                message: format!("{} overfilled by {}", event.order_id, outcome.excess),
            });
            out.errors.push(EngineError::Overfill {
                instrument: self.instrument.clone(),
                order_id: event.order_id.clone(),
                excess: outcome.excess,
            });
        }

        if let Some(child) = outcome.closed {
            if event.status == OrderEventStatus::Rejected {
                warn!(instrument = %self.instrument, order_id = %child.order_id, "slice/rejected");
            }
            self.close_child(&child, event.status, &mut out);
        }

        if self.ticket.as_ref().is_some_and(ExecutionTicket::is_complete) {
            self.retire_ticket(RetireReason::Completed, &mut out);
        }
        Ok(out)
    }

    fn on_orphan_event(&mut self, event: &OrderEvent) -> Result<LaneOutput, EngineError> {
        let mut out = LaneOutput::default();
        let Some(child) = self.orphans.get_mut(&event.order_id) else {
            return Ok(out);
        };
        let applied = child
            .apply(
                &ChildEvent::from_order_event(event),
                event.event_id.as_deref(),
            )
            .map_err(|source| EngineError::Transition {
                order_id: event.order_id.clone(),
                source,
            })?;

        let filled = applied.filled + applied.excess;
        if filled > 0 {
            warn!(
                instrument = %self.instrument,
                order_id = %event.order_id,
                qty = filled,
                "ticket/fill_after_retire"
            );
            out.notifications.push(ExecutionNotification::Anomaly {
                instrument: Some(self.instrument.clone()),
                message: format!(
                    "{} filled {} after its ticket was retired",
                    event.order_id, filled
                ),
            });
        }
        if child.state.is_terminal() {
            if let Some(child) = self.orphans.remove(&event.order_id) {
                self.close_child(&child, event.status, &mut out);
            }
        }
        Ok(out)
    }

    fn close_child(&self, child: &ChildOrder, status: OrderEventStatus, out: &mut LaneOutput) {
        info!(
            instrument = %self.instrument,
            order_id = %child.order_id,
            status = ?status,
            filled_qty = child.filled_qty,
            "slice/closed"
        );
        out.closed_orders.push(child.order_id.clone());
        out.notifications.push(ExecutionNotification::ChildClosed {
            instrument: self.instrument.clone(),
            order_id: child.order_id.clone(),
            status,
            filled_qty: child.filled_qty,
        });
    }

    // -----------------------------------------------------------------------
    // Cancellation / retirement
    // -----------------------------------------------------------------------

    /// Retire the active ticket and request cancellation of its outstanding
    /// child. A no-op when there is no ticket.
    pub fn cancel_all<T: OrderTransport + ?Sized>(
        &mut self,
        reason: RetireReason,
        transport: &T,
    ) -> LaneOutput {
        let mut out = LaneOutput::default();
        if self.ticket.is_none() {
            return out;
        }
        self.cancel_outstanding(transport, &mut out);
        self.retire_ticket(reason, &mut out);
        out
    }

    fn cancel_outstanding<T: OrderTransport + ?Sized>(
        &mut self,
        transport: &T,
        out: &mut LaneOutput,
    ) {
        let Some(ticket) = self.ticket.as_mut() else {
            return;
        };
        let Some(order_id) = ticket.begin_cancel() else {
            return;
        };
        match transport.cancel(&order_id) {
            Ok(()) => {
                info!(instrument = %self.instrument, order_id = %order_id, "slice/cancel_requested");
                out.notifications.push(ExecutionNotification::CancelRequested {
                    instrument: self.instrument.clone(),
                    order_id,
                });
            }
            Err(source) => {
                ticket.cancel_failed();
                warn!(
                    instrument = %self.instrument,
                    order_id = %order_id,
                    error = %source,
                    "slice/cancel_failed"
                );
                out.errors.push(EngineError::Cancel {
                    instrument: self.instrument.clone(),
                    order_id,
                    source,
                });
            }
        }
    }

    fn retire_ticket(&mut self, reason: RetireReason, out: &mut LaneOutput) {
        let Some(mut ticket) = self.ticket.take() else {
            return;
        };
        if let Some(child) = ticket.retire() {
            self.orphans.insert(child.order_id.clone(), child);
        }
        info!(
            instrument = %self.instrument,
            ticket_id = ticket.id(),
            reason = ?reason,
            filled_qty = ticket.filled_qty(),
            "ticket/retired"
        );
        out.notifications.push(ExecutionNotification::TicketRetired {
            instrument: self.instrument.clone(),
            ticket_id: ticket.id(),
            reason,
            filled_qty: ticket.filled_qty(),
        });
    }

    /// Orphaned child ids whose cancel is still pending.
    pub fn pending_cancels(&self) -> impl Iterator<Item = &ChildOrderId> {
        self.orphans
            .values()
            .filter(|c| c.state == ChildOrderState::CancelPending)
            .map(|c| &c.order_id)
    }
}

/// Deterministic child order id (UUID v5 over the DNS namespace), so a
/// replay of the same inputs produces the same ids.
pub fn child_order_id(instrument: &Instrument, generation: u64, seq: u64) -> ChildOrderId {
    let data = format!("vwx/{instrument}/{generation}/{seq}");
    ChildOrderId::new(Uuid::new_v5(&Uuid::NAMESPACE_DNS, data.as_bytes()).to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::policy::{PriceComparison, SlicePolicy};
    use crate::transport::TransportError;

    #[derive(Default)]
    struct Recorder {
        submitted: Mutex<Vec<ChildOrderRequest>>,
        cancelled: Mutex<Vec<ChildOrderId>>,
        reject: Mutex<bool>,
        refuse_cancel: Mutex<bool>,
    }

    impl OrderTransport for Recorder {
        fn submit(&self, request: &ChildOrderRequest) -> Result<(), TransportError> {
            if *self.reject.lock().unwrap() {
                return Err(TransportError::Rejected("halted".into()));
            }
            self.submitted.lock().unwrap().push(request.clone());
            Ok(())
        }

        fn cancel(&self, order_id: &ChildOrderId) -> Result<(), TransportError> {
            if *self.refuse_cancel.lock().unwrap() {
                return Err(TransportError::Rejected("busy".into()));
            }
            self.cancelled.lock().unwrap().push(order_id.clone());
            Ok(())
        }
    }

    fn x() -> Instrument {
        Instrument::new("X", "USA")
    }

    fn lane() -> InstrumentLane {
        InstrumentLane::new(
            x(),
            ExecutionConfig {
                slice_policy: SlicePolicy::FixedLot { lot: 100 },
                lot_size: 1,
                price_comparison: PriceComparison::Inclusive,
            },
            SessionConfig::default(),
            0,
        )
    }

    fn tick(ts: i64, price: i64, vol: i64) -> MarketUpdate {
        MarketUpdate::new(x(), ts, price * 1_000_000, vol)
    }

    #[test]
    fn zero_delta_is_a_no_op() {
        let t = Recorder::default();
        let mut l = lane();
        let out = l.on_target_delta(&TargetDelta::new(x(), 0), &t).unwrap();
        assert!(out.is_empty());
        assert!(l.ticket().is_none());
    }

    #[test]
    fn invalid_policy_creates_no_ticket() {
        let t = Recorder::default();
        let mut l = lane();
        let delta = TargetDelta::new(x(), 100).with_slice_policy(SlicePolicy::FixedLot { lot: 0 });
        let err = l.on_target_delta(&delta, &t).unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
        assert!(l.ticket().is_none());
    }

    #[test]
    fn dropped_tick_leaves_vwap_untouched() {
        let t = Recorder::default();
        let mut l = lane();
        l.on_market_update(&tick(2, 10, 100), &t).unwrap();
        let err = l.on_market_update(&tick(1, 50, 100), &t).unwrap_err();
        assert!(matches!(err, EngineError::Data { .. }));
        assert_eq!(l.vwap().estimate(), Some(10_000_000));
    }

    #[test]
    fn submission_failure_keeps_remaining_and_waits() {
        let t = Recorder::default();
        *t.reject.lock().unwrap() = true;
        let mut l = lane();
        l.on_target_delta(&TargetDelta::new(x(), 300), &t).unwrap();
        let out = l.on_market_update(&tick(1, 10, 100), &t).unwrap();
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(out.errors[0], EngineError::Submission { .. }));
        assert!(out.opened_orders.is_empty());
        let ticket = l.ticket().unwrap();
        assert_eq!(ticket.remaining(), 300);
        assert!(ticket.can_slice());

        *t.reject.lock().unwrap() = false;
        let out = l.on_market_update(&tick(2, 10, 100), &t).unwrap();
        assert_eq!(out.submissions().count(), 1);
    }

    #[test]
    fn stale_decision_is_discarded_at_commit() {
        let t = Recorder::default();
        let mut l = lane();
        l.on_target_delta(&TargetDelta::new(x(), 300), &t).unwrap();
        l.on_market_update(&tick(1, 10, 100), &t).unwrap();
        let decision = SliceDecision {
            ticket_id: 1,
            epoch: 0,
            side: crate::types::Side::Buy,
            quantity: 100,
            price_micros: 1,
            vwap_micros: 1,
        };
        // Ticket now has an outstanding child; the decision cannot commit.
        let mut out = LaneOutput::default();
        l.commit_slice(&decision, 2, &t, &mut out);
        assert!(matches!(
            out.notifications[0],
            ExecutionNotification::SliceDiscarded { ticket_id: 1, .. }
        ));
        assert_eq!(t.submitted.lock().unwrap().len(), 1);
    }

    #[test]
    fn unknown_and_ticketless_events_are_rejected() {
        let t = Recorder::default();
        let mut l = lane();
        let ev = OrderEvent::accepted(ChildOrderId::new("nope"));
        assert!(matches!(
            l.on_order_event(&ev),
            Err(EngineError::NoActiveTicket { .. })
        ));
        l.on_target_delta(&TargetDelta::new(x(), 300), &t).unwrap();
        assert!(matches!(
            l.on_order_event(&ev),
            Err(EngineError::UnknownOrder(_))
        ));
    }

    #[test]
    fn cancel_all_orphans_the_child_until_its_terminal_report() {
        let t = Recorder::default();
        let mut l = lane();
        l.on_target_delta(&TargetDelta::new(x(), 300), &t).unwrap();
        let out = l.on_market_update(&tick(1, 10, 100), &t).unwrap();
        let id = out.opened_orders[0].clone();

        let out = l.cancel_all(RetireReason::Cancelled, &t);
        assert!(l.ticket().is_none());
        assert_eq!(t.cancelled.lock().unwrap().as_slice(), &[id.clone()]);
        assert!(out.notifications.iter().any(|n| matches!(
            n,
            ExecutionNotification::TicketRetired {
                reason: RetireReason::Cancelled,
                ..
            }
        )));
        assert_eq!(l.pending_cancels().count(), 1);

        let out = l.on_order_event(&OrderEvent::cancelled(id.clone())).unwrap();
        assert_eq!(out.closed_orders, vec![id]);
        assert!(l.live_orders().is_empty());
    }

    #[test]
    fn refused_cancel_after_side_flip_is_retried_on_next_tick() {
        let t = Recorder::default();
        let mut l = lane();
        l.on_target_delta(&TargetDelta::new(x(), 300), &t).unwrap();
        let out = l.on_market_update(&tick(1, 10, 100), &t).unwrap();
        let buy = out.opened_orders[0].clone();

        *t.refuse_cancel.lock().unwrap() = true;
        let out = l.on_target_delta(&TargetDelta::new(x(), -200), &t).unwrap();
        assert!(matches!(out.errors[0], EngineError::Cancel { .. }));
        assert!(l.ticket().unwrap().needs_cancel());

        // Still refused: the tick retries, reports again, and submits nothing.
        let out = l.on_market_update(&tick(2, 10, 100), &t).unwrap();
        assert!(matches!(out.errors[0], EngineError::Cancel { .. }));
        assert_eq!(out.submissions().count(), 0);

        *t.refuse_cancel.lock().unwrap() = false;
        let out = l.on_market_update(&tick(3, 10, 100), &t).unwrap();
        assert!(out.errors.is_empty());
        assert_eq!(t.cancelled.lock().unwrap().as_slice(), &[buy.clone()]);
        assert!(!l.ticket().unwrap().needs_cancel());

        // Once the venue confirms, the sell side slices.
        l.on_order_event(&OrderEvent::cancelled(buy)).unwrap();
        let out = l.on_market_update(&tick(4, 10, 100), &t).unwrap();
        let sells: Vec<_> = out.submissions().collect();
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].side, crate::types::Side::Sell);
    }

    #[test]
    fn child_ids_are_deterministic_and_distinct() {
        let a = child_order_id(&x(), 0, 1);
        assert_eq!(a, child_order_id(&x(), 0, 1));
        assert_ne!(a, child_order_id(&x(), 0, 2));
        assert_ne!(a, child_order_id(&x(), 1, 1));
    }
}
