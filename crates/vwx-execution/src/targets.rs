use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use vwx_md::Instrument;

use crate::types::TargetDelta;

/// Signed holdings per instrument: +long, -short.
pub type PositionBook = BTreeMap<Instrument, i64>;

/// Absolute holding the portfolio layer wants for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPosition {
    pub instrument: Instrument,
    pub target_qty: i64,
}

impl TargetPosition {
    pub fn new(instrument: Instrument, target_qty: i64) -> Self {
        Self {
            instrument,
            target_qty,
        }
    }
}

/// Convert absolute targets into signed deltas given current holdings.
///
/// - `delta = target - current`; zero deltas are omitted
/// - an instrument held but absent from `targets` is flattened (target 0)
/// - output is ordered by instrument; duplicate targets: last one wins
pub fn targets_to_deltas(current: &PositionBook, targets: &[TargetPosition]) -> Vec<TargetDelta> {
    let mut wanted: BTreeMap<&Instrument, i64> = BTreeMap::new();
    for t in targets {
        wanted.insert(&t.instrument, t.target_qty);
    }

    let mut instruments: BTreeSet<&Instrument> = BTreeSet::new();
    instruments.extend(current.keys());
    instruments.extend(wanted.keys().copied());

    instruments
        .into_iter()
        .filter_map(|inst| {
            let cur = current.get(inst).copied().unwrap_or(0);
            let tgt = wanted.get(inst).copied().unwrap_or(0);
            let delta = tgt - cur;
            (delta != 0).then(|| TargetDelta::new(inst.clone(), delta))
        })
        .collect()
}
