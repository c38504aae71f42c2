//! Incremental intraday VWAP.
//!
//! # Numeric model
//!
//! Prices are `i64` micros and volumes are `i64` shares, so every
//! `price × volume` product is an exact integer. Both running sums are held
//! in `i128`, which leaves ~10^17 headroom above any realistic session
//! (a $10_000 price is 10^10 micros; 10^12 shares traded gives 10^22).
//! There is no rounding anywhere in the accumulation, so a session of
//! millions of ticks yields exactly `Σ(p·v) / Σ(v)`.
//!
//! The estimate itself is rounded to the nearest micro for display. Trading
//! decisions use [`VwapState::compare`], which cross-multiplies instead of
//! dividing and is therefore exact.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::sequencer::TickError;
use crate::Instrument;

// ---------------------------------------------------------------------------
// VwapState
// ---------------------------------------------------------------------------

/// Single-instrument VWAP accumulator for the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VwapState {
    cum_pv: i128,
    cum_volume: i128,
    /// Start of the current session (epoch ms); `None` until the first reset.
    session_start_ms: Option<i64>,
    /// Number of updates applied this session, zero-volume ones included.
    updates: u64,
}

impl VwapState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one tick.
    ///
    /// `volume == 0` is accepted (quote tick) and leaves the estimate
    /// unchanged. Negative volume and accumulator overflow are rejected
    /// without mutating state.
    pub fn update(&mut self, price_micros: i64, volume: i64) -> Result<(), TickError> {
        if volume < 0 {
            return Err(TickError::NegativeVolume(volume));
        }
        let pv = (price_micros as i128) * (volume as i128);
        let cum_pv = self
            .cum_pv
            .checked_add(pv)
            .ok_or(TickError::AccumulatorOverflow)?;
        let cum_volume = self
            .cum_volume
            .checked_add(volume as i128)
            .ok_or(TickError::AccumulatorOverflow)?;

        self.cum_pv = cum_pv;
        self.cum_volume = cum_volume;
        self.updates += 1;
        Ok(())
    }

    /// Zero the accumulator at the start of a new session.
    pub fn reset(&mut self, session_start_ms: i64) {
        *self = Self {
            session_start_ms: Some(session_start_ms),
            ..Self::default()
        };
    }

    /// Current VWAP in micros, rounded to the nearest micro.
    ///
    /// `None` while no volume has been observed this session.
    pub fn estimate(&self) -> Option<i64> {
        if self.cum_volume == 0 {
            return None;
        }
        let half = self.cum_volume / 2;
        let rounded = if self.cum_pv >= 0 {
            (self.cum_pv + half) / self.cum_volume
        } else {
            (self.cum_pv - half) / self.cum_volume
        };
        i64::try_from(rounded).ok()
    }

    /// Exact ordering of `price_micros` relative to the VWAP.
    ///
    /// `Some(Ordering::Less)` means the price is below the VWAP. `None`
    /// while the VWAP is undefined.
    pub fn compare(&self, price_micros: i64) -> Option<Ordering> {
        if self.cum_volume == 0 {
            return None;
        }
        let lhs = (price_micros as i128).checked_mul(self.cum_volume)?;
        Some(lhs.cmp(&self.cum_pv))
    }

    pub fn is_defined(&self) -> bool {
        self.cum_volume > 0
    }

    pub fn cumulative_volume(&self) -> i128 {
        self.cum_volume
    }

    pub fn cumulative_price_volume(&self) -> i128 {
        self.cum_pv
    }

    pub fn session_start_ms(&self) -> Option<i64> {
        self.session_start_ms
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }
}

// ---------------------------------------------------------------------------
// VwapTracker
// ---------------------------------------------------------------------------

/// VWAP accumulators keyed by instrument, for callers that track a whole
/// tape in one place.
///
/// The execution engine does not go through this map: each instrument lane
/// owns its [`VwapState`] so that a lane can run on its own task.
///
/// Instruments never share state; an instrument that has not been seen
/// simply has no estimate.
#[derive(Debug, Clone, Default)]
pub struct VwapTracker {
    states: HashMap<Instrument, VwapState>,
}

impl VwapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(
        &mut self,
        instrument: &Instrument,
        price_micros: i64,
        volume: i64,
    ) -> Result<(), TickError> {
        self.states
            .entry(instrument.clone())
            .or_default()
            .update(price_micros, volume)
    }

    pub fn reset(&mut self, instrument: &Instrument, session_start_ms: i64) {
        self.states
            .entry(instrument.clone())
            .or_default()
            .reset(session_start_ms);
    }

    /// Reset every tracked instrument (market-wide session boundary).
    pub fn reset_all(&mut self, session_start_ms: i64) {
        for state in self.states.values_mut() {
            state.reset(session_start_ms);
        }
    }

    pub fn estimate(&self, instrument: &Instrument) -> Option<i64> {
        self.states.get(instrument).and_then(VwapState::estimate)
    }

    pub fn state(&self, instrument: &Instrument) -> Option<&VwapState> {
        self.states.get(instrument)
    }

    /// Release an instrument's state (instrument left the universe).
    pub fn remove(&mut self, instrument: &Instrument) -> Option<VwapState> {
        self.states.remove(instrument)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
