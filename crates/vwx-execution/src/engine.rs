//! Synchronous execution engine.
//!
//! Owns one [`InstrumentLane`] per instrument (created on first use) and
//! the child order routing table. Every call touches exactly one lane,
//! except a session boundary scoped to all instruments. For a concurrent
//! deployment, `vwx-runtime` drives the same lanes from one task each.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use vwx_md::{Instrument, MarketUpdate, SessionBoundary, SessionConfig};

use crate::error::EngineError;
use crate::id_map::OrderRoutes;
use crate::lane::{InstrumentLane, LaneOutput, LaneSnapshot};
use crate::policy::{ExecutionConfig, PolicyError};
use crate::ticket::ExecutionTicket;
use crate::transport::OrderTransport;
use crate::types::{OrderEvent, RetireReason, TargetDelta};

pub struct ExecutionEngine<T: OrderTransport> {
    transport: T,
    config: ExecutionConfig,
    session: SessionConfig,
    lanes: BTreeMap<Instrument, InstrumentLane>,
    routes: OrderRoutes,
    lane_generation: u64,
}

impl<T: OrderTransport> ExecutionEngine<T> {
    pub fn new(
        transport: T,
        config: ExecutionConfig,
        session: SessionConfig,
    ) -> Result<Self, PolicyError> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            session,
            lanes: BTreeMap::new(),
            routes: OrderRoutes::new(),
            lane_generation: 0,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn track(&mut self, instrument: &Instrument, out: &LaneOutput) {
        for id in &out.opened_orders {
            self.routes.register(id.clone(), instrument.clone());
        }
        for id in &out.closed_orders {
            self.routes.deregister(id);
        }
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    pub fn on_target_delta(&mut self, delta: &TargetDelta) -> Result<LaneOutput, EngineError> {
        if delta.quantity == 0 {
            debug!(instrument = %delta.instrument, "target/zero_delta_ignored");
            return Ok(LaneOutput::default());
        }
        let instrument = delta.instrument.clone();
        let transport = &self.transport;
        let lane = lane_entry(
            &mut self.lanes,
            &mut self.lane_generation,
            &instrument,
            &self.config,
            self.session,
        );
        let out = lane.on_target_delta(delta, transport)?;
        self.track(&instrument, &out);
        Ok(out)
    }

    pub fn on_market_update(&mut self, update: &MarketUpdate) -> Result<LaneOutput, EngineError> {
        let instrument = update.instrument.clone();
        let transport = &self.transport;
        let lane = lane_entry(
            &mut self.lanes,
            &mut self.lane_generation,
            &instrument,
            &self.config,
            self.session,
        );
        let out = lane.on_market_update(update, transport)?;
        self.track(&instrument, &out);
        Ok(out)
    }

    pub fn on_order_event(&mut self, event: &OrderEvent) -> Result<LaneOutput, EngineError> {
        let Some(instrument) = self.routes.instrument(&event.order_id).cloned() else {
            warn!(order_id = %event.order_id, "order/unknown");
            return Err(EngineError::UnknownOrder(event.order_id.clone()));
        };
        let Some(lane) = self.lanes.get_mut(&instrument) else {
            return Err(EngineError::UnknownOrder(event.order_id.clone()));
        };
        let out = lane.on_order_event(event)?;
        self.track(&instrument, &out);
        Ok(out)
    }

    /// Reset VWAP accumulation for the instruments the boundary covers.
    /// Lanes that do not exist yet are not created.
    pub fn on_session_boundary(&mut self, boundary: &SessionBoundary) -> LaneOutput {
        let mut out = LaneOutput::default();
        for (instrument, lane) in self.lanes.iter_mut() {
            if boundary.applies_to(instrument) {
                out.merge(lane.on_session_boundary(boundary.ts_ms));
            }
        }
        out
    }

    /// Retire the instrument's ticket and cancel its outstanding child.
    pub fn cancel_all(&mut self, instrument: &Instrument) -> LaneOutput {
        let Some(lane) = self.lanes.get_mut(instrument) else {
            return LaneOutput::default();
        };
        let out = lane.cancel_all(RetireReason::Cancelled, &self.transport);
        self.track(instrument, &out);
        out
    }

    /// Cancel-all for every instrument with an active ticket.
    pub fn cancel_everything(&mut self) -> LaneOutput {
        let instruments: Vec<Instrument> = self.lanes.keys().cloned().collect();
        let mut out = LaneOutput::default();
        for instrument in instruments {
            out.merge(self.cancel_all(&instrument));
        }
        out
    }

    /// Drop an instrument from the universe: retire its ticket, cancel its
    /// child, and discard its VWAP state and routes. Late events for its
    /// children are reported as unknown orders.
    pub fn remove_instrument(&mut self, instrument: &Instrument) -> LaneOutput {
        let Some(mut lane) = self.lanes.remove(instrument) else {
            return LaneOutput::default();
        };
        let out = lane.cancel_all(RetireReason::Removed, &self.transport);
        let dropped = self.routes.deregister_instrument(instrument);
        debug!(instrument = %instrument, dropped_routes = dropped, "lane/removed");
        out
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn ticket(&self, instrument: &Instrument) -> Option<&ExecutionTicket> {
        self.lanes.get(instrument).and_then(InstrumentLane::ticket)
    }

    pub fn vwap(&self, instrument: &Instrument) -> Option<i64> {
        self.lanes.get(instrument).and_then(|l| l.vwap().estimate())
    }

    pub fn lane(&self, instrument: &Instrument) -> Option<&InstrumentLane> {
        self.lanes.get(instrument)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.lanes.keys()
    }

    pub fn snapshot(&self) -> Vec<LaneSnapshot> {
        self.lanes.values().map(InstrumentLane::snapshot).collect()
    }

    /// Number of child orders the engine can still route events for.
    pub fn routed_orders(&self) -> usize {
        self.routes.len()
    }
}

fn lane_entry<'a>(
    lanes: &'a mut BTreeMap<Instrument, InstrumentLane>,
    generation: &mut u64,
    instrument: &Instrument,
    config: &ExecutionConfig,
    session: SessionConfig,
) -> &'a mut InstrumentLane {
    lanes.entry(instrument.clone()).or_insert_with(|| {
        let g = *generation;
        *generation += 1;
        debug!(instrument = %instrument, generation = g, "lane/created");
        InstrumentLane::new(instrument.clone(), config.clone(), session, g)
    })
}
