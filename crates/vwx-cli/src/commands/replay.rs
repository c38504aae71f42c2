//! `vwx replay`: drive ticks and timed targets through the engine against
//! the paper venue.
//!
//! For every tick, in order:
//! 1. the venue confirms pending cancels, then fills every open child of the
//!    tick's instrument completely at the tick's price
//! 2. targets stamped at or before the tick are applied
//! 3. the tick itself is applied, which may submit a new slice
//!
//! A slice submitted on one tick therefore fills at the next tick's price
//! for the same instrument. Both drivers (synchronous engine, concurrent
//! runtime) see the same sequence and produce the same summary.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};
use vwx_broker_paper::PaperTransport;
use vwx_config::EngineConfig;
use vwx_execution::{
    targets_to_deltas, ChildOrderId, ChildOrderRequest, EngineError, ExecutionEngine, LaneOutput,
    LaneSnapshot, OrderEvent, PositionBook, Side, TargetDelta, TargetPosition, TicketSnapshot,
};
use vwx_md::{ingest_csv, micros_to_price, Instrument, MarketUpdate};
use vwx_runtime::{spawn_engine, BusMsg, EngineInput};

use super::{load_config, load_targets, TimedTarget};

pub struct ReplayArgs {
    pub config_paths: Vec<String>,
    pub ticks: PathBuf,
    pub targets: PathBuf,
    pub absolute: bool,
    pub concurrent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub config_hash: String,
    pub driver: &'static str,
    pub ticks_accepted: usize,
    pub ticks_rejected: usize,
    pub errors: usize,
    pub instruments: Vec<InstrumentSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentSummary {
    pub instrument: String,
    /// Signed filled position: bought - sold.
    pub position: i64,
    pub bought: i64,
    pub sold: i64,
    pub avg_fill_price: Option<f64>,
    pub session_vwap: Option<f64>,
    pub slices: usize,
    pub cancels: usize,
    /// The ticket still working at the end of the replay, if any.
    pub ticket: Option<TicketSnapshot>,
}

pub async fn run(args: ReplayArgs) -> Result<ReplaySummary> {
    let loaded = load_config(&args.config_paths)?;
    let ingest = ingest_csv::parse_csv_file(&args.ticks)
        .with_context(|| format!("tick ingest failed: {}", args.ticks.display()))?;
    for rejection in &ingest.rejected {
        warn!(error = %rejection, "replay/tick_rejected");
    }
    let targets = load_targets(&args.targets)?;
    info!(
        config_hash = %loaded.config_hash,
        ticks = ingest.updates.len(),
        targets = targets.len(),
        concurrent = args.concurrent,
        "replay/start"
    );

    let feed = TargetFeed::new(targets, args.absolute);
    let (driver, outcome) = if args.concurrent {
        ("concurrent", replay_concurrent(&loaded.config, &ingest.updates, feed).await?)
    } else {
        ("sync", replay_sync(&loaded.config, &ingest.updates, feed)?)
    };

    let summary = ReplaySummary {
        config_hash: loaded.config_hash,
        driver,
        ticks_accepted: ingest.updates.len(),
        ticks_rejected: ingest.rejected.len(),
        errors: outcome.errors,
        instruments: outcome.summarize(),
    };
    info!(errors = summary.errors, instruments = summary.instruments.len(), "replay/done");
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

struct Outcome {
    snapshots: Vec<LaneSnapshot>,
    ledger: Ledger,
    submissions: Vec<ChildOrderRequest>,
    cancels: Vec<ChildOrderId>,
    errors: usize,
}

fn replay_sync(
    config: &EngineConfig,
    ticks: &[MarketUpdate],
    mut feed: TargetFeed,
) -> Result<Outcome> {
    let mut engine = ExecutionEngine::new(
        PaperTransport::new(),
        config.execution.clone(),
        config.session,
    )
    .context("CONFIG_INVALID execution")?;
    let mut ledger = Ledger::default();
    let mut errors = 0;

    for update in ticks {
        for ev in settle(engine.transport(), &mut ledger, update) {
            errors += count_errors(engine.on_order_event(&ev));
        }
        for action in feed.due(update.ts_ms, &ledger) {
            errors += match action {
                FeedAction::Delta(delta) => count_errors(engine.on_target_delta(&delta)),
                FeedAction::CancelAll(instrument) => {
                    count_errors(Ok(engine.cancel_all(&instrument)))
                }
            };
        }
        errors += count_errors(engine.on_market_update(update));
    }

    Ok(Outcome {
        snapshots: engine.snapshot(),
        submissions: engine.transport().submissions(),
        cancels: engine.transport().cancel_requests(),
        ledger,
        errors,
    })
}

async fn replay_concurrent(
    config: &EngineConfig,
    ticks: &[MarketUpdate],
    mut feed: TargetFeed,
) -> Result<Outcome> {
    let paper = Arc::new(PaperTransport::new());
    let engine = spawn_engine(Arc::clone(&paper), config)?;
    let mut bus = engine.subscribe();
    let mut ledger = Ledger::default();
    let mut errors = 0;

    for update in ticks {
        for ev in settle(&paper, &mut ledger, update) {
            engine.send(ev).await?;
        }
        for action in feed.due(update.ts_ms, &ledger) {
            match action {
                FeedAction::Delta(delta) => engine.send(delta).await?,
                FeedAction::CancelAll(instrument) => {
                    engine.send(EngineInput::CancelAll { instrument }).await?
                }
            }
        }
        engine.send(update.clone()).await?;
        // Barrier: the next settle must see any slice this tick submitted.
        engine.snapshot().await?;
        errors += drain_errors(&mut bus);
    }

    let snapshots = engine.snapshot().await?;
    errors += drain_errors(&mut bus);
    engine.shutdown().await?;

    Ok(Outcome {
        snapshots,
        submissions: paper.submissions(),
        cancels: paper.cancel_requests(),
        ledger,
        errors,
    })
}

fn count_errors(res: Result<LaneOutput, EngineError>) -> usize {
    match res {
        Ok(out) => {
            for e in &out.errors {
                warn!(error = %e, "replay/engine_error");
            }
            out.errors.len()
        }
        Err(e) => {
            warn!(error = %e, "replay/input_rejected");
            1
        }
    }
}

fn drain_errors(bus: &mut broadcast::Receiver<BusMsg>) -> usize {
    let mut n = 0;
    loop {
        match bus.try_recv() {
            Ok(BusMsg::Error { message, .. }) => {
                warn!(error = %message, "replay/engine_error");
                n += 1;
            }
            Ok(BusMsg::Notification { .. }) => {}
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "replay/bus_lagged");
            }
            Err(_) => return n,
        }
    }
}

// ---------------------------------------------------------------------------
// Paper venue
// ---------------------------------------------------------------------------

/// Confirm every pending cancel, then fully fill the tick instrument's open
/// children at the tick price.
fn settle(paper: &PaperTransport, ledger: &mut Ledger, update: &MarketUpdate) -> Vec<OrderEvent> {
    let mut events = paper.acknowledge_all_cancels();
    for ord in paper
        .open_orders()
        .into_iter()
        .filter(|o| o.request.instrument == update.instrument)
    {
        if let Some(ev) = paper.fill(&ord.request.order_id, ord.open_qty(), update.price_micros) {
            ledger.record(&ord.request, ev.fill_qty, update.price_micros);
            events.push(ev);
        }
    }
    events
}

#[derive(Debug, Default, Clone, Copy)]
struct Fills {
    bought: i64,
    sold: i64,
    notional_micros: i128,
}

/// Venue-side record of every fill handed to the engine.
#[derive(Debug, Default)]
struct Ledger {
    fills: BTreeMap<Instrument, Fills>,
}

impl Ledger {
    fn record(&mut self, request: &ChildOrderRequest, qty: i64, price_micros: i64) {
        let f = self.fills.entry(request.instrument.clone()).or_default();
        match request.side {
            Side::Buy => f.bought += qty,
            Side::Sell => f.sold += qty,
        }
        f.notional_micros += i128::from(qty) * i128::from(price_micros);
    }

    fn positions(&self) -> PositionBook {
        self.fills
            .iter()
            .map(|(i, f)| (i.clone(), f.bought - f.sold))
            .filter(|(_, pos)| *pos != 0)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

enum FeedAction {
    Delta(TargetDelta),
    /// The filled position already meets an absolute target: stop any
    /// ticket still working toward the previous one.
    CancelAll(Instrument),
}

struct TargetFeed {
    rows: Vec<TimedTarget>,
    next: usize,
    absolute: bool,
}

impl TargetFeed {
    fn new(rows: Vec<TimedTarget>, absolute: bool) -> Self {
        Self {
            rows,
            next: 0,
            absolute,
        }
    }

    /// Actions for every row stamped at or before `ts_ms` not yet applied.
    ///
    /// An absolute target is measured against the filled position. A delta
    /// replaces whatever a working ticket has left, so a nonzero delta is
    /// already exact; a target that is met needs the ticket stopped instead.
    fn due(&mut self, ts_ms: i64, ledger: &Ledger) -> Vec<FeedAction> {
        let start = self.next;
        while self.next < self.rows.len() && self.rows[self.next].ts_ms <= ts_ms {
            self.next += 1;
        }
        let rows = &self.rows[start..self.next];
        if !self.absolute {
            return rows.iter().map(|t| FeedAction::Delta(to_delta(t))).collect();
        }

        // Each timestamp group is a whole portfolio.
        let book = ledger.positions();
        let mut out = Vec::new();
        for group in rows.chunk_by(|a, b| a.ts_ms == b.ts_ms) {
            let targets: Vec<TargetPosition> = group
                .iter()
                .map(|t| TargetPosition::new(t.instrument.clone(), t.quantity))
                .collect();
            let deltas = targets_to_deltas(&book, &targets);
            let met: BTreeSet<&Instrument> = targets
                .iter()
                .map(|t| &t.instrument)
                .filter(|i| !deltas.iter().any(|d| &d.instrument == *i))
                .collect();
            out.extend(met.into_iter().cloned().map(FeedAction::CancelAll));
            out.extend(deltas.into_iter().map(FeedAction::Delta));
        }
        out
    }
}

fn to_delta(t: &TimedTarget) -> TargetDelta {
    let delta = TargetDelta::new(t.instrument.clone(), t.quantity);
    match t.deadline_ms {
        Some(deadline_ms) => delta.with_deadline(deadline_ms),
        None => delta,
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

impl Outcome {
    fn summarize(&self) -> Vec<InstrumentSummary> {
        let snaps: BTreeMap<&Instrument, &LaneSnapshot> =
            self.snapshots.iter().map(|s| (&s.instrument, s)).collect();
        let mut slices: BTreeMap<&Instrument, usize> = BTreeMap::new();
        let mut order_instrument: BTreeMap<&ChildOrderId, &Instrument> = BTreeMap::new();
        for r in &self.submissions {
            *slices.entry(&r.instrument).or_default() += 1;
            order_instrument.insert(&r.order_id, &r.instrument);
        }
        let mut cancels: BTreeMap<&Instrument, usize> = BTreeMap::new();
        for id in &self.cancels {
            if let Some(inst) = order_instrument.get(id) {
                *cancels.entry(*inst).or_default() += 1;
            }
        }

        let mut instruments: BTreeSet<&Instrument> = BTreeSet::new();
        instruments.extend(snaps.keys().copied());
        instruments.extend(slices.keys().copied());
        instruments.extend(self.ledger.fills.keys());

        instruments
            .into_iter()
            .map(|inst| {
                let f = self.ledger.fills.get(inst).copied().unwrap_or_default();
                let snap = snaps.get(inst);
                InstrumentSummary {
                    instrument: inst.to_string(),
                    position: f.bought - f.sold,
                    bought: f.bought,
                    sold: f.sold,
                    avg_fill_price: avg_price(f),
                    session_vwap: snap.and_then(|s| s.vwap_micros).map(micros_to_price),
                    slices: slices.get(inst).copied().unwrap_or(0),
                    cancels: cancels.get(inst).copied().unwrap_or(0),
                    ticket: snap.and_then(|s| s.ticket.clone()),
                }
            })
            .collect()
    }
}

fn avg_price(f: Fills) -> Option<f64> {
    let qty = i128::from(f.bought + f.sold);
    if qty == 0 {
        return None;
    }
    let micros = (f.notional_micros + qty / 2) / qty;
    i64::try_from(micros).ok().map(micros_to_price)
}
