//! Concurrent runtime: per-instrument lanes behind a dispatcher.
//!
//! GREEN when:
//! - Two instruments are sliced independently, each against its own VWAP.
//! - Order events routed by child id reach the owning lane; a completed
//!   ticket is announced on the bus.
//! - An event for an unknown child id is published as a bus error and
//!   changes nothing.
//! - Ticks for one instrument are applied in arrival order; a regressing
//!   timestamp is dropped and reported.
//! - Removing an instrument cancels its child and forgets its routes.
//! - An all-instrument session boundary resets every lane's VWAP.
//! - An instrument stuck in its transport falls behind on its own: its
//!   backlog is reported, and other instruments keep slicing.
//! - An invalid slice policy refuses to start the runtime.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use vwx_broker_paper::PaperTransport;
use vwx_config::EngineConfig;
use vwx_execution::{
    ChildOrderId, ChildOrderRequest, ExecutionConfig, ExecutionNotification, OrderTransport,
    PriceComparison, RetireReason, SlicePolicy, TargetDelta, TicketState, TransportError,
};
use vwx_md::{Instrument, MarketUpdate, SessionBoundary};
use vwx_runtime::{spawn_engine, BusMsg, EngineHandle, EngineInput, RuntimeError};

fn spy() -> Instrument {
    Instrument::new("SPY", "USA")
}

fn qqq() -> Instrument {
    Instrument::new("QQQ", "USA")
}

fn config() -> EngineConfig {
    EngineConfig {
        execution: ExecutionConfig {
            slice_policy: SlicePolicy::FixedLot { lot: 100 },
            lot_size: 1,
            price_comparison: PriceComparison::Inclusive,
        },
        ..EngineConfig::default()
    }
}

fn start() -> (Arc<PaperTransport>, EngineHandle) {
    let paper = Arc::new(PaperTransport::new());
    let handle = spawn_engine(Arc::clone(&paper), &config()).unwrap();
    (paper, handle)
}

fn tick(instrument: Instrument, ts_ms: i64, price_micros: i64, volume: i64) -> MarketUpdate {
    MarketUpdate::new(instrument, ts_ms, price_micros, volume)
}

fn drain(rx: &mut broadcast::Receiver<BusMsg>) -> Vec<BusMsg> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

#[tokio::test]
async fn instruments_are_sliced_independently() {
    let (paper, engine) = start();

    engine.send(TargetDelta::new(spy(), 300)).await.unwrap();
    engine.send(TargetDelta::new(qqq(), -200)).await.unwrap();
    engine.send(tick(spy(), 1, 100_000_000, 1_000)).await.unwrap();
    engine.send(tick(qqq(), 1, 50_000_000, 500)).await.unwrap();

    let snaps = engine.snapshot().await.unwrap();
    assert_eq!(snaps.len(), 2);
    // Ordered by instrument.
    assert_eq!(snaps[0].instrument, qqq());
    assert_eq!(snaps[0].vwap_micros, Some(50_000_000));
    assert_eq!(snaps[1].instrument, spy());
    assert_eq!(snaps[1].vwap_micros, Some(100_000_000));

    let subs = paper.submissions();
    assert_eq!(subs.len(), 2);
    assert!(subs.iter().any(|r| r.instrument == spy() && r.quantity == 100));
    assert!(subs.iter().any(|r| r.instrument == qqq() && r.quantity == 100));

    for snap in &snaps {
        let t = snap.ticket.as_ref().unwrap();
        assert_eq!(t.state, TicketState::PartiallyWorking);
        assert!(t.outstanding.is_some());
    }
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn routed_fills_complete_the_ticket() {
    let (paper, engine) = start();
    let mut bus = engine.subscribe();

    engine.send(TargetDelta::new(spy(), 200)).await.unwrap();
    for ts in 1..=2 {
        engine.send(tick(spy(), ts, 100_000_000, 1_000)).await.unwrap();
        // Barrier: the slice for this tick has been submitted.
        engine.snapshot().await.unwrap();
        for ev in paper.fill_all_at(&spy(), 100_000_000) {
            engine.send(ev).await.unwrap();
        }
    }

    let snaps = engine.snapshot().await.unwrap();
    assert!(snaps[0].ticket.is_none());
    assert!(paper.open_orders().is_empty());

    let msgs = drain(&mut bus);
    assert!(msgs.iter().any(|m| matches!(
        m,
        BusMsg::Notification {
            notification: ExecutionNotification::TicketRetired {
                reason: RetireReason::Completed,
                filled_qty: 200,
                ..
            }
        }
    )));
    assert!(!msgs.iter().any(|m| matches!(m, BusMsg::Error { .. })));
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_order_event_is_reported_on_the_bus() {
    let (paper, engine) = start();
    let mut bus = engine.subscribe();

    engine.send(TargetDelta::new(spy(), 100)).await.unwrap();
    engine.send(tick(spy(), 1, 100_000_000, 1_000)).await.unwrap();
    engine.snapshot().await.unwrap();

    // An order the engine never submitted.
    let stray = vwx_execution::ChildOrderRequest {
        order_id: vwx_execution::ChildOrderId::new("stray"),
        ..paper.submissions()[0].clone()
    };
    paper.submit(&stray).unwrap();
    let ev = paper.fill(&stray.order_id, 10, 100_000_000).unwrap();
    engine.send(ev).await.unwrap();

    let snaps = engine.snapshot().await.unwrap();
    assert_eq!(snaps[0].ticket.as_ref().unwrap().filled_qty, 0);
    let msgs = drain(&mut bus);
    assert!(msgs.iter().any(|m| matches!(
        m,
        BusMsg::Error { instrument: None, message } if message.contains("stray")
    )));
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn regressing_tick_is_dropped_in_arrival_order() {
    let (_paper, engine) = start();
    let mut bus = engine.subscribe();

    engine.send(tick(spy(), 10, 100_000_000, 100)).await.unwrap();
    engine.send(tick(spy(), 5, 200_000_000, 100)).await.unwrap();
    engine.send(tick(spy(), 10, 300_000_000, 100)).await.unwrap();

    let snaps = engine.snapshot().await.unwrap();
    assert_eq!(snaps[0].ticks_admitted, 2);
    assert_eq!(snaps[0].ticks_dropped, 1);
    assert_eq!(snaps[0].vwap_micros, Some(200_000_000));

    let errors: Vec<_> = drain(&mut bus)
        .into_iter()
        .filter(|m| matches!(m, BusMsg::Error { .. }))
        .collect();
    assert_eq!(errors.len(), 1);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn removing_an_instrument_cancels_and_forgets_it() {
    let (paper, engine) = start();
    let mut bus = engine.subscribe();

    engine.send(TargetDelta::new(spy(), 500)).await.unwrap();
    engine.send(tick(spy(), 1, 100_000_000, 1_000)).await.unwrap();
    engine
        .send(EngineInput::RemoveInstrument { instrument: spy() })
        .await
        .unwrap();

    assert!(engine.snapshot().await.unwrap().is_empty());
    let child = paper.submissions()[0].order_id.clone();
    assert_eq!(paper.cancel_requests(), vec![child.clone()]);

    // The venue's cancel confirmation arrives after removal.
    let ev = paper.acknowledge_cancel(&child).unwrap();
    engine.send(ev).await.unwrap();
    engine.snapshot().await.unwrap();

    let msgs = drain(&mut bus);
    assert!(msgs.iter().any(|m| matches!(
        m,
        BusMsg::Notification {
            notification: ExecutionNotification::TicketRetired {
                reason: RetireReason::Removed,
                ..
            }
        }
    )));
    assert!(msgs.iter().any(|m| matches!(
        m,
        BusMsg::Error { message, .. } if message.contains(child.as_str())
    )));

    // A new tick brings the instrument back with a fresh lane.
    engine.send(tick(spy(), 2, 90_000_000, 10)).await.unwrap();
    let snaps = engine.snapshot().await.unwrap();
    assert_eq!(snaps.len(), 1);
    assert_eq!(snaps[0].vwap_micros, Some(90_000_000));
    assert!(snaps[0].ticket.is_none());
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn session_boundary_resets_every_lane() {
    let (_paper, engine) = start();

    engine.send(tick(spy(), 1, 100_000_000, 10)).await.unwrap();
    engine.send(tick(qqq(), 1, 50_000_000, 10)).await.unwrap();
    engine.send(SessionBoundary::all(2)).await.unwrap();

    let snaps = engine.snapshot().await.unwrap();
    assert_eq!(snaps.len(), 2);
    for snap in &snaps {
        assert_eq!(snap.vwap_micros, None);
        assert_eq!(snap.session_start_ms, Some(2));
    }

    engine
        .send(SessionBoundary::for_instrument(spy(), 3))
        .await
        .unwrap();
    engine.send(tick(spy(), 4, 101_000_000, 10)).await.unwrap();
    let snaps = engine.snapshot().await.unwrap();
    assert_eq!(snaps[1].session_start_ms, Some(3));
    assert_eq!(snaps[0].session_start_ms, Some(2));
    engine.shutdown().await.unwrap();
}

/// Paper venue whose submits for one instrument hang until released.
struct StalledVenue {
    paper: PaperTransport,
    stalled: Instrument,
    released: Mutex<bool>,
    wake: Condvar,
}

impl StalledVenue {
    fn new(stalled: Instrument) -> Self {
        Self {
            paper: PaperTransport::new(),
            stalled,
            released: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.wake.notify_all();
    }
}

impl OrderTransport for StalledVenue {
    fn submit(&self, request: &ChildOrderRequest) -> Result<(), TransportError> {
        if request.instrument == self.stalled {
            let mut released = self.released.lock().unwrap();
            while !*released {
                released = self.wake.wait(released).unwrap();
            }
        }
        self.paper.submit(request)
    }

    fn cancel(&self, order_id: &ChildOrderId) -> Result<(), TransportError> {
        self.paper.cancel(order_id)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_instrument_does_not_hold_up_others() {
    let mut cfg = config();
    cfg.runtime.lane_queue_capacity = 2;
    let venue = Arc::new(StalledVenue::new(spy()));
    let engine = spawn_engine(Arc::clone(&venue), &cfg).unwrap();
    let mut bus = engine.subscribe();

    // SPY's first slice hangs in the venue; its later ticks pile up.
    engine.send(TargetDelta::new(spy(), 300)).await.unwrap();
    for ts in 1..=19 {
        engine.send(tick(spy(), ts, 100_000_000, 1_000)).await.unwrap();
    }
    engine.send(TargetDelta::new(qqq(), -100)).await.unwrap();
    engine.send(tick(qqq(), 1, 50_000_000, 500)).await.unwrap();

    let qqq_sliced = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if venue.paper.submissions().iter().any(|r| r.instrument == qqq()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(qqq_sliced.is_ok(), "QQQ waited on SPY");

    let msgs = drain(&mut bus);
    assert!(msgs.iter().any(|m| matches!(
        m,
        BusMsg::Error { instrument: Some(i), message } if *i == spy() && message.contains("behind")
    )));

    venue.release();
    let snaps = engine.snapshot().await.unwrap();
    assert_eq!(snaps.len(), 2);
    let spy_ticket = snaps[1].ticket.as_ref().unwrap();
    assert!(spy_ticket.outstanding.is_some());
    assert_eq!(snaps[1].ticks_admitted, 19);
    assert_eq!(venue.paper.submissions().len(), 2);
    engine.shutdown().await.unwrap();
}

#[test]
fn invalid_policy_refuses_to_start() {
    let mut cfg = config();
    cfg.execution.slice_policy = SlicePolicy::FixedLot { lot: 0 };
    let res = spawn_engine(Arc::new(PaperTransport::new()), &cfg);
    assert!(matches!(res, Err(RuntimeError::Config(_))));
}

#[test]
fn bus_messages_serialize_with_a_type_tag() {
    let msg = BusMsg::Error {
        instrument: Some(spy()),
        message: "boom".to_string(),
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "error");
    assert_eq!(json["message"], "boom");
}
