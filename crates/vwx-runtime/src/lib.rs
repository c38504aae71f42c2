//! Concurrent runtime for the execution engine.
//!
//! Layout:
//! - one dispatcher task reading [`EngineInput`]s from a bounded channel
//! - one task per instrument, each owning an [`InstrumentLane`] and fed by
//!   its own queue, so everything for one instrument is applied in arrival
//!   order while instruments run in parallel
//! - a shared order-id route map, written before the transport sees a
//!   submission, used to route order events to the owning lane
//! - a broadcast bus carrying notifications and per-input errors
//!
//! The dispatcher never waits on a lane. Lane queues are unbounded; a lane
//! whose backlog passes `lane_queue_capacity` is reported on the bus and
//! keeps its input. A lane task that dies is dropped from the dispatcher;
//! other lanes keep running.
//!
//! [`EngineHandle::snapshot`] is answered only after every input sent before
//! it has been applied, including the exit of any removed lane, which makes
//! it usable as a barrier. The reply is gathered off the dispatcher task.

mod bus;
mod routing;

pub use bus::{BusMsg, EngineInput};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vwx_config::EngineConfig;
use vwx_execution::{
    EngineError, ExecutionConfig, InstrumentLane, LaneOutput, LaneSnapshot, OrderEvent,
    OrderRoutes, OrderTransport, PolicyError, RetireReason, TargetDelta,
};
use vwx_md::{Instrument, MarketUpdate, SessionConfig};

use crate::routing::{lock, RoutingTransport, SharedRoutes};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("invalid execution config: {0}")]
    Config(#[from] PolicyError),
    #[error("runtime is shut down")]
    Closed,
    #[error("runtime task failed: {0}")]
    TaskFailed(String),
}

enum Command {
    Input(EngineInput),
    Snapshot(oneshot::Sender<Vec<LaneSnapshot>>),
}

enum LaneMsg {
    Delta(TargetDelta),
    Tick(MarketUpdate),
    Event(OrderEvent),
    Session(i64),
    CancelAll,
    Remove,
    Snapshot(oneshot::Sender<LaneSnapshot>),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    bus: broadcast::Sender<BusMsg>,
    join: JoinHandle<()>,
}

impl EngineHandle {
    /// Queue one input. Waits only when the dispatcher queue is full.
    pub async fn send(&self, input: impl Into<EngineInput>) -> Result<(), RuntimeError> {
        self.tx
            .send(Command::Input(input.into()))
            .await
            .map_err(|_| RuntimeError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMsg> {
        self.bus.subscribe()
    }

    /// Snapshots of every live lane, ordered by instrument.
    pub async fn snapshot(&self) -> Result<Vec<LaneSnapshot>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply))
            .await
            .map_err(|_| RuntimeError::Closed)?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    /// Stop accepting input, drain every lane, and wait for all tasks.
    pub async fn shutdown(self) -> Result<(), RuntimeError> {
        drop(self.tx);
        self.join
            .await
            .map_err(|e| RuntimeError::TaskFailed(e.to_string()))
    }
}

/// Start the dispatcher on the current tokio runtime.
pub fn spawn_engine<T>(transport: Arc<T>, config: &EngineConfig) -> Result<EngineHandle, RuntimeError>
where
    T: OrderTransport + ?Sized + 'static,
{
    config.execution.validate()?;

    let routes: SharedRoutes = Arc::new(Mutex::new(OrderRoutes::new()));
    let (bus, _rx) = broadcast::channel::<BusMsg>(config.runtime.notification_capacity.max(1));
    let lane_capacity = config.runtime.lane_queue_capacity.max(1);
    let (tx, rx) = mpsc::channel(lane_capacity);

    let dispatcher = Dispatcher {
        transport: RoutingTransport::new(transport, Arc::clone(&routes)),
        routes,
        bus: bus.clone(),
        execution: config.execution.clone(),
        session: config.session,
        backlog_limit: lane_capacity,
        lanes: BTreeMap::new(),
        retiring: Vec::new(),
        failed: Vec::new(),
        generation: 0,
    };
    let join = tokio::spawn(dispatcher.run(rx));
    info!(lane_queue_capacity = lane_capacity, "runtime/started");

    Ok(EngineHandle { tx, bus, join })
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

struct LaneTask {
    tx: mpsc::UnboundedSender<LaneMsg>,
    /// Messages queued but not yet taken by the lane task.
    depth: Arc<AtomicUsize>,
    backlogged: bool,
    join: JoinHandle<()>,
}

struct Dispatcher<T: ?Sized> {
    transport: RoutingTransport<T>,
    routes: SharedRoutes,
    bus: broadcast::Sender<BusMsg>,
    execution: ExecutionConfig,
    session: SessionConfig,
    backlog_limit: usize,
    lanes: BTreeMap<Instrument, LaneTask>,
    /// Removed lanes still cancelling; awaited by the next snapshot.
    retiring: Vec<JoinHandle<()>>,
    /// Lanes whose task stopped unexpectedly; awaited at shutdown.
    failed: Vec<JoinHandle<()>>,
    generation: u64,
}

impl<T: OrderTransport + ?Sized + 'static> Dispatcher<T> {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Input(input) => self.dispatch(input),
                Command::Snapshot(reply) => self.snapshot(reply),
            }
        }
        self.close().await;
    }

    fn dispatch(&mut self, input: EngineInput) {
        match input {
            EngineInput::TargetDelta { delta } => {
                if delta.quantity == 0 {
                    debug!(instrument = %delta.instrument, "target/zero_delta_ignored");
                    return;
                }
                let instrument = delta.instrument.clone();
                self.ensure_lane(&instrument);
                self.send(&instrument, LaneMsg::Delta(delta));
            }
            EngineInput::MarketUpdate { update } => {
                let instrument = update.instrument.clone();
                self.ensure_lane(&instrument);
                self.send(&instrument, LaneMsg::Tick(update));
            }
            EngineInput::OrderEvent { event } => {
                let routed = lock(&self.routes).instrument(&event.order_id).cloned();
                match routed {
                    Some(instrument) if self.lanes.contains_key(&instrument) => {
                        self.send(&instrument, LaneMsg::Event(event));
                    }
                    _ => {
                        warn!(order_id = %event.order_id, "order/unknown");
                        let _ = self
                            .bus
                            .send(BusMsg::error(&EngineError::UnknownOrder(event.order_id)));
                    }
                }
            }
            EngineInput::SessionBoundary { boundary } => {
                let targets: Vec<Instrument> = self
                    .lanes
                    .keys()
                    .filter(|i| boundary.applies_to(i))
                    .cloned()
                    .collect();
                for instrument in targets {
                    self.send(&instrument, LaneMsg::Session(boundary.ts_ms));
                }
            }
            EngineInput::CancelAll { instrument } => {
                if self.lanes.contains_key(&instrument) {
                    self.send(&instrument, LaneMsg::CancelAll);
                }
            }
            EngineInput::RemoveInstrument { instrument } => {
                let Some(lane) = self.lanes.remove(&instrument) else {
                    return;
                };
                // The lane drains its queue, cancels, and exits on its own.
                lane.depth.fetch_add(1, Ordering::AcqRel);
                if lane.tx.send(LaneMsg::Remove).is_err() {
                    warn!(instrument = %instrument, "lane/already_stopped");
                }
                self.retiring.push(lane.join);
            }
        }
    }

    fn ensure_lane(&mut self, instrument: &Instrument) {
        if self.lanes.contains_key(instrument) {
            return;
        }
        let generation = self.generation;
        self.generation += 1;
        let lane = InstrumentLane::new(
            instrument.clone(),
            self.execution.clone(),
            self.session,
            generation,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let join = tokio::spawn(run_lane(
            lane,
            rx,
            Arc::clone(&depth),
            self.transport.clone(),
            Arc::clone(&self.routes),
            self.bus.clone(),
        ));
        debug!(instrument = %instrument, generation, "lane/spawned");
        self.lanes.insert(
            instrument.clone(),
            LaneTask {
                tx,
                depth,
                backlogged: false,
                join,
            },
        );
    }

    /// Deliver to an existing lane without waiting on it. A lane whose task
    /// has stopped is dropped along with its routes.
    fn send(&mut self, instrument: &Instrument, msg: LaneMsg) {
        let Some(lane) = self.lanes.get_mut(instrument) else {
            return;
        };
        let depth = lane.depth.fetch_add(1, Ordering::AcqRel) + 1;
        if lane.tx.send(msg).is_ok() {
            if depth > self.backlog_limit && !lane.backlogged {
                lane.backlogged = true;
                warn!(
                    instrument = %instrument,
                    depth,
                    limit = self.backlog_limit,
                    "lane/backlogged"
                );
                let _ = self.bus.send(BusMsg::Error {
                    instrument: Some(instrument.clone()),
                    message: format!(
                        "lane for {instrument} is behind: {depth} inputs queued (limit {})",
                        self.backlog_limit
                    ),
                });
            } else if depth <= self.backlog_limit && lane.backlogged {
                lane.backlogged = false;
                info!(instrument = %instrument, depth, "lane/caught_up");
            }
            return;
        }
        if let Some(dead) = self.lanes.remove(instrument) {
            self.failed.push(dead.join);
        }
        let dropped = lock(&self.routes).deregister_instrument(instrument);
        warn!(instrument = %instrument, dropped_routes = dropped, "lane/failed");
        let _ = self.bus.send(BusMsg::Error {
            instrument: Some(instrument.clone()),
            message: format!("lane for {instrument} stopped; input dropped"),
        });
    }

    /// Queue a snapshot request behind every lane's pending input and
    /// collect the answers on a separate task.
    fn snapshot(&mut self, reply: oneshot::Sender<Vec<LaneSnapshot>>) {
        let instruments: Vec<Instrument> = self.lanes.keys().cloned().collect();
        let mut pending = Vec::with_capacity(instruments.len());
        for instrument in &instruments {
            let (tx, rx) = oneshot::channel();
            self.send(instrument, LaneMsg::Snapshot(tx));
            pending.push(rx);
        }
        let retiring = std::mem::take(&mut self.retiring);
        tokio::spawn(async move {
            for join in retiring {
                if let Err(e) = join.await {
                    warn!(error = %e, "lane/join_failed");
                }
            }
            let mut snaps = Vec::with_capacity(pending.len());
            for rx in pending {
                if let Ok(snap) = rx.await {
                    snaps.push(snap);
                }
            }
            let _ = reply.send(snaps);
        });
    }

    async fn close(mut self) {
        let lanes = std::mem::take(&mut self.lanes);
        let joins = lanes
            .into_values()
            .map(|l| l.join)
            .chain(std::mem::take(&mut self.retiring))
            .chain(std::mem::take(&mut self.failed));
        for join in joins {
            if let Err(e) = join.await {
                warn!(error = %e, "lane/join_failed");
            }
        }
        info!("runtime/stopped");
    }
}

// ---------------------------------------------------------------------------
// Lane task
// ---------------------------------------------------------------------------

async fn run_lane<T: OrderTransport + ?Sized>(
    mut lane: InstrumentLane,
    mut rx: mpsc::UnboundedReceiver<LaneMsg>,
    depth: Arc<AtomicUsize>,
    transport: RoutingTransport<T>,
    routes: SharedRoutes,
    bus: broadcast::Sender<BusMsg>,
) {
    while let Some(msg) = rx.recv().await {
        depth.fetch_sub(1, Ordering::AcqRel);
        let res = match msg {
            LaneMsg::Delta(delta) => lane.on_target_delta(&delta, &transport),
            LaneMsg::Tick(update) => lane.on_market_update(&update, &transport),
            LaneMsg::Event(event) => lane.on_order_event(&event),
            LaneMsg::Session(ts_ms) => Ok(lane.on_session_boundary(ts_ms)),
            LaneMsg::CancelAll => Ok(lane.cancel_all(RetireReason::Cancelled, &transport)),
            LaneMsg::Remove => {
                let live = lane.live_orders();
                let out = lane.cancel_all(RetireReason::Removed, &transport);
                publish(&bus, &routes, out);
                let mut r = lock(&routes);
                for id in &live {
                    r.deregister(id);
                }
                debug!(instrument = %lane.instrument(), dropped_routes = live.len(), "lane/removed");
                return;
            }
            LaneMsg::Snapshot(reply) => {
                let _ = reply.send(lane.snapshot());
                continue;
            }
        };
        match res {
            Ok(out) => publish(&bus, &routes, out),
            Err(e) => {
                let _ = bus.send(BusMsg::error(&e));
            }
        }
    }
}

fn publish(bus: &broadcast::Sender<BusMsg>, routes: &SharedRoutes, out: LaneOutput) {
    if !out.closed_orders.is_empty() {
        let mut r = lock(routes);
        for id in &out.closed_orders {
            r.deregister(id);
        }
    }
    // No subscribers is not an error.
    for notification in out.notifications {
        let _ = bus.send(BusMsg::Notification { notification });
    }
    for err in &out.errors {
        let _ = bus.send(BusMsg::error(err));
    }
}
