//! Trading session calendar.
//!
//! Deterministic, pure logic. No IO, no wall-clock, no randomness.
//!
//! # Modes
//!
//! - [`SessionMode::Explicit`]: sessions change only when the caller feeds a
//!   [`crate::SessionBoundary`]. The calendar never reports a rollover.
//! - [`SessionMode::Daily`]: a session is one local trading date. The local
//!   date of a tick is its UTC timestamp shifted by a fixed `utc_offset_secs`
//!   (daylight saving is ignored). The first tick on a new local date rolls
//!   the session before that tick is accumulated.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Explicit,
    Daily,
}

/// Session settings (the `session:` config section).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub mode: SessionMode,
    /// Fixed offset of the exchange's local time from UTC, in seconds.
    pub utc_offset_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Explicit,
            // US equities, standard time.
            utc_offset_secs: -5 * 3600,
        }
    }
}

/// Per-instrument session tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCalendar {
    config: SessionConfig,
    current: Option<NaiveDate>,
}

impl SessionCalendar {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Local trading date of `ts_ms`, or `None` if the timestamp is outside
    /// chrono's representable range.
    pub fn trading_date(&self, ts_ms: i64) -> Option<NaiveDate> {
        let local_ms = ts_ms.checked_add(self.config.utc_offset_secs.checked_mul(1000)?)?;
        DateTime::from_timestamp_millis(local_ms).map(|dt| dt.date_naive())
    }

    /// UTC epoch-ms at which the local trading date `date` begins.
    pub fn session_start_ms(&self, date: NaiveDate) -> i64 {
        let local_midnight_ms = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or_default();
        local_midnight_ms - self.config.utc_offset_secs * 1000
    }

    /// Observe a tick timestamp.
    ///
    /// Returns `Some(session_start_ms)` when a new session begins at this tick
    /// (including the first tick ever observed in daily mode), `None`
    /// otherwise. Always `None` in explicit mode.
    pub fn observe(&mut self, ts_ms: i64) -> Option<i64> {
        if self.config.mode == SessionMode::Explicit {
            return None;
        }
        let date = self.trading_date(ts_ms)?;
        if self.current == Some(date) {
            return None;
        }
        // Never roll backwards: a late tick for an earlier date stays in the
        // current session (the sequencer has already ordered ticks).
        if let Some(cur) = self.current {
            if date < cur {
                return None;
            }
        }
        self.current = Some(date);
        Some(self.session_start_ms(date))
    }

    /// Record an explicit boundary so daily mode does not roll again on the
    /// next tick of the same date.
    pub fn mark_explicit(&mut self, ts_ms: i64) {
        if self.config.mode == SessionMode::Daily {
            self.current = self.trading_date(ts_ms);
        }
    }

    pub fn current_date(&self) -> Option<NaiveDate> {
        self.current
    }
}
