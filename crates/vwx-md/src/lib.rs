//! vwx-md
//!
//! Market-data side of the VWAP execution engine.
//!
//! - [`Instrument`] is the key for every piece of per-instrument state.
//! - [`MarketUpdate`] is a normalized trade/quote tick (integer-micro prices).
//! - [`vwap`] owns the incremental VWAP accumulator.
//! - [`sequencer`] drops malformed or out-of-order ticks before they reach it.
//! - [`session`] derives session boundaries from tick timestamps (no wall clock).
//! - [`normalizer`] / [`ingest_csv`] turn decimal-string ticks into updates.
//!
//! Nothing in this crate performs I/O except [`ingest_csv::parse_csv_file`].

pub mod ingest_csv;
pub mod normalizer;
pub mod sequencer;
pub mod session;
pub mod vwap;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use sequencer::{TickError, TickSequencer};
pub use session::{SessionCalendar, SessionConfig, SessionMode};
pub use vwap::{VwapState, VwapTracker};

/// Scale factor: 1 price unit = 1_000_000 micros (6 decimal places).
pub const MICROS_PER_UNIT: i64 = 1_000_000;

/// Convert an integer-micros price to `f64` for display / wire output only.
pub fn micros_to_price(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_UNIT as f64
}

// ---------------------------------------------------------------------------
// Instrument
// ---------------------------------------------------------------------------

/// Opaque instrument identifier: symbol + venue.
///
/// Fields are private so an instrument cannot be mutated once it has been
/// used as a map key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Instrument {
    symbol: String,
    venue: String,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, venue: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            venue: venue.into(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.symbol, self.venue)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A single trade or quote tick.
///
/// Quote-only ticks carry `volume == 0`; they are valid inputs that move the
/// current price without moving the VWAP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketUpdate {
    pub instrument: Instrument,
    /// UTC epoch milliseconds.
    pub ts_ms: i64,
    /// Trade (or quote) price in micros.
    pub price_micros: i64,
    /// Traded volume (integer shares / contracts). Must be >= 0.
    pub volume: i64,
}

impl MarketUpdate {
    pub fn new(instrument: Instrument, ts_ms: i64, price_micros: i64, volume: i64) -> Self {
        Self {
            instrument,
            ts_ms,
            price_micros,
            volume,
        }
    }
}

/// Which instruments a session boundary applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    All,
    Instrument(Instrument),
}

/// Explicit "new trading session" signal. Resets VWAP accumulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBoundary {
    pub scope: SessionScope,
    /// UTC epoch milliseconds at which the new session starts.
    pub ts_ms: i64,
}

impl SessionBoundary {
    pub fn all(ts_ms: i64) -> Self {
        Self {
            scope: SessionScope::All,
            ts_ms,
        }
    }

    pub fn for_instrument(instrument: Instrument, ts_ms: i64) -> Self {
        Self {
            scope: SessionScope::Instrument(instrument),
            ts_ms,
        }
    }

    /// `true` if this boundary resets `instrument`.
    pub fn applies_to(&self, instrument: &Instrument) -> bool {
        match &self.scope {
            SessionScope::All => true,
            SessionScope::Instrument(i) => i == instrument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_display_is_symbol_dot_venue() {
        assert_eq!(Instrument::new("SPY", "USA").to_string(), "SPY.USA");
    }

    #[test]
    fn session_boundary_scope() {
        let spy = Instrument::new("SPY", "USA");
        let ibm = Instrument::new("IBM", "USA");
        assert!(SessionBoundary::all(0).applies_to(&spy));
        let b = SessionBoundary::for_instrument(spy.clone(), 0);
        assert!(b.applies_to(&spy));
        assert!(!b.applies_to(&ibm));
    }

    #[test]
    fn micros_to_price_one_and_a_half() {
        assert!((micros_to_price(1_500_000) - 1.5).abs() < f64::EPSILON);
    }
}
