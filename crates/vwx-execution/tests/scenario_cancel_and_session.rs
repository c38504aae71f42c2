//! Cancel-all, instrument removal and session resets.
//!
//! GREEN when:
//! - A decision computed before a cancel-all is discarded at commit.
//! - Cancel-all cancels the outstanding child, retires the ticket, and the
//!   child's later terminal report is still routed (not an unknown order).
//! - Removing an instrument drops its state; late events become unknown.
//! - An explicit session boundary clears the VWAP; daily mode rolls on the
//!   first tick of a new local date.

use std::sync::Mutex;

use vwx_execution::{
    ChildOrderId, ChildOrderRequest, EngineError, ExecutionConfig, ExecutionEngine,
    ExecutionNotification, InstrumentLane, LaneOutput, OrderEvent, OrderTransport, RetireReason,
    SliceScheduler, TargetDelta, TransportError,
};
use vwx_md::{Instrument, MarketUpdate, SessionBoundary, SessionConfig, SessionMode};

#[derive(Default)]
struct Recorder {
    submitted: Mutex<Vec<ChildOrderRequest>>,
    cancelled: Mutex<Vec<ChildOrderId>>,
}

impl OrderTransport for Recorder {
    fn submit(&self, request: &ChildOrderRequest) -> Result<(), TransportError> {
        self.submitted.lock().unwrap().push(request.clone());
        Ok(())
    }

    fn cancel(&self, order_id: &ChildOrderId) -> Result<(), TransportError> {
        self.cancelled.lock().unwrap().push(order_id.clone());
        Ok(())
    }
}

fn x() -> Instrument {
    Instrument::new("X", "USA")
}

fn engine(session: SessionConfig) -> ExecutionEngine<Recorder> {
    ExecutionEngine::new(Recorder::default(), ExecutionConfig::default(), session).unwrap()
}

#[test]
fn cancel_all_preempts_an_in_flight_decision() {
    let t = Recorder::default();
    let config = ExecutionConfig::default();
    let scheduler = SliceScheduler::new(&config);
    let mut lane = InstrumentLane::new(x(), config, SessionConfig::default(), 0);

    lane.on_target_delta(&TargetDelta::new(x(), 500), &t).unwrap();
    // Decide against a VWAP of 10 without committing.
    let mut vwap = lane.vwap().clone();
    vwap.update(10_000_000, 100).unwrap();
    let decision = scheduler
        .on_market_update(lane.ticket().unwrap(), 9_000_000, 100, &vwap)
        .unwrap();

    // Cancel-all observed before commit.
    let out = lane.cancel_all(RetireReason::Cancelled, &t);
    assert!(matches!(
        out.notifications[..],
        [ExecutionNotification::TicketRetired {
            reason: RetireReason::Cancelled,
            ..
        }]
    ));

    let mut out = LaneOutput::default();
    lane.commit_slice(&decision, 1, &t, &mut out);
    assert!(matches!(
        out.notifications[..],
        [ExecutionNotification::SliceDiscarded { .. }]
    ));
    assert!(t.submitted.lock().unwrap().is_empty());
}

#[test]
fn decision_from_an_older_epoch_is_discarded() {
    let t = Recorder::default();
    let config = ExecutionConfig::default();
    let scheduler = SliceScheduler::new(&config);
    let mut lane = InstrumentLane::new(x(), config, SessionConfig::default(), 0);

    lane.on_target_delta(&TargetDelta::new(x(), 500), &t).unwrap();
    let mut vwap = lane.vwap().clone();
    vwap.update(10_000_000, 100).unwrap();
    let decision = scheduler
        .on_market_update(lane.ticket().unwrap(), 9_000_000, 100, &vwap)
        .unwrap();

    lane.on_target_delta(&TargetDelta::new(x(), 300), &t).unwrap();
    let mut out = LaneOutput::default();
    lane.commit_slice(&decision, 1, &t, &mut out);
    assert!(out.opened_orders.is_empty());
    assert!(t.submitted.lock().unwrap().is_empty());
}

#[test]
fn cancel_all_cancels_child_and_routes_its_terminal_report() {
    let mut e = engine(SessionConfig::default());
    e.on_target_delta(&TargetDelta::new(x(), 1_000)).unwrap();
    let out = e
        .on_market_update(&MarketUpdate::new(x(), 1, 10_000_000, 100))
        .unwrap();
    let child = out.opened_orders[0].clone();

    let out = e.cancel_all(&x());
    assert!(out.notifications.iter().any(|n| matches!(
        n,
        ExecutionNotification::CancelRequested { order_id, .. } if *order_id == child
    )));
    assert!(e.ticket(&x()).is_none());
    assert_eq!(
        e.transport().cancelled.lock().unwrap().as_slice(),
        &[child.clone()]
    );

    // A fill racing the cancel is reported, not credited anywhere.
    let out = e
        .on_order_event(&OrderEvent::partial_fill(child.clone(), 10, 10_000_000))
        .unwrap();
    assert!(matches!(
        out.notifications[..],
        [ExecutionNotification::Anomaly { .. }]
    ));

    let out = e.on_order_event(&OrderEvent::cancelled(child.clone())).unwrap();
    assert!(out.notifications.iter().any(|n| matches!(
        n,
        ExecutionNotification::ChildClosed { filled_qty: 10, .. }
    )));
    assert_eq!(e.routed_orders(), 0);

    // Cancel-all with no ticket is a no-op.
    assert!(e.cancel_all(&x()).is_empty());

    // Further ticks do not submit anything for the retired ticket.
    let out = e
        .on_market_update(&MarketUpdate::new(x(), 2, 1_000_000, 100))
        .unwrap();
    assert_eq!(out.submissions().count(), 0);
}

#[test]
fn removed_instrument_forgets_everything() {
    let mut e = engine(SessionConfig::default());
    e.on_target_delta(&TargetDelta::new(x(), 1_000)).unwrap();
    let out = e
        .on_market_update(&MarketUpdate::new(x(), 1, 10_000_000, 100))
        .unwrap();
    let child = out.opened_orders[0].clone();

    let out = e.remove_instrument(&x());
    assert!(out.notifications.iter().any(|n| matches!(
        n,
        ExecutionNotification::TicketRetired {
            reason: RetireReason::Removed,
            ..
        }
    )));
    assert!(e.lane(&x()).is_none());
    assert_eq!(e.vwap(&x()), None);

    let err = e.on_order_event(&OrderEvent::cancelled(child)).unwrap_err();
    assert!(matches!(err, EngineError::UnknownOrder(_)));
}

#[test]
fn explicit_session_boundary_clears_vwap() {
    let mut e = engine(SessionConfig::default());
    e.on_market_update(&MarketUpdate::new(x(), 1, 10_000_000, 100))
        .unwrap();
    assert_eq!(e.vwap(&x()), Some(10_000_000));

    let out = e.on_session_boundary(&SessionBoundary::all(86_400_000));
    assert!(matches!(
        out.notifications[..],
        [ExecutionNotification::SessionReset {
            session_start_ms: 86_400_000,
            ..
        }]
    ));
    assert_eq!(e.vwap(&x()), None);

    e.on_market_update(&MarketUpdate::new(x(), 86_400_001, 12_000_000, 5))
        .unwrap();
    assert_eq!(e.vwap(&x()), Some(12_000_000));

    // Scoped boundary for another instrument leaves X alone.
    e.on_session_boundary(&SessionBoundary::for_instrument(
        Instrument::new("Y", "USA"),
        90_000_000,
    ));
    assert_eq!(e.vwap(&x()), Some(12_000_000));
}

#[test]
fn daily_mode_rolls_on_new_local_date() {
    // 2013-10-07 09:30 at UTC-5.
    const MON_OPEN_MS: i64 = 1_381_156_200_000;
    const DAY_MS: i64 = 86_400_000;

    let mut e = engine(SessionConfig {
        mode: SessionMode::Daily,
        utc_offset_secs: -5 * 3600,
    });
    e.on_market_update(&MarketUpdate::new(x(), MON_OPEN_MS, 10_000_000, 100))
        .unwrap();
    e.on_market_update(&MarketUpdate::new(x(), MON_OPEN_MS + 60_000, 20_000_000, 100))
        .unwrap();
    assert_eq!(e.vwap(&x()), Some(15_000_000));

    let out = e
        .on_market_update(&MarketUpdate::new(x(), MON_OPEN_MS + DAY_MS, 30_000_000, 1))
        .unwrap();
    assert!(out
        .notifications
        .iter()
        .any(|n| matches!(n, ExecutionNotification::SessionReset { .. })));
    assert_eq!(e.vwap(&x()), Some(30_000_000));
}
