//! Per-instrument tick admission gate.
//!
//! A tick is admitted only if it is well-formed and its timestamp does not
//! precede the last admitted tick for the same instrument. Equal timestamps
//! are admitted in arrival order. Rejected ticks leave the sequencer (and
//! therefore the VWAP) untouched.

use thiserror::Error;

use crate::MarketUpdate;

/// Data errors for a single tick. None of these are fatal; the tick is
/// dropped and processing continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TickError {
    #[error("volume must be >= 0, got {0}")]
    NegativeVolume(i64),

    #[error("price must be > 0 micros, got {0}")]
    NonPositivePrice(i64),

    #[error("out-of-order tick: ts_ms={ts_ms} precedes last admitted ts_ms={last_ts_ms}")]
    OutOfOrder { ts_ms: i64, last_ts_ms: i64 },

    #[error("VWAP accumulator overflow")]
    AccumulatorOverflow,
}

/// Stateless shape checks shared by the sequencer and the CSV ingest path.
pub fn validate(update: &MarketUpdate) -> Result<(), TickError> {
    if update.volume < 0 {
        return Err(TickError::NegativeVolume(update.volume));
    }
    if update.price_micros <= 0 {
        return Err(TickError::NonPositivePrice(update.price_micros));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSequencer {
    last_ts_ms: Option<i64>,
    admitted: u64,
    dropped: u64,
}

impl TickSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `update` or explain why it was dropped.
    pub fn admit(&mut self, update: &MarketUpdate) -> Result<(), TickError> {
        let verdict = validate(update).and_then(|()| match self.last_ts_ms {
            Some(last) if update.ts_ms < last => Err(TickError::OutOfOrder {
                ts_ms: update.ts_ms,
                last_ts_ms: last,
            }),
            _ => Ok(()),
        });

        match verdict {
            Ok(()) => {
                self.last_ts_ms = Some(update.ts_ms);
                self.admitted += 1;
                Ok(())
            }
            Err(e) => {
                self.dropped += 1;
                Err(e)
            }
        }
    }

    pub fn last_ts_ms(&self) -> Option<i64> {
        self.last_ts_ms
    }

    pub fn admitted(&self) -> u64 {
        self.admitted
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
