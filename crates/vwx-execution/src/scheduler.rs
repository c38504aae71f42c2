//! Tick-by-tick slice release decisions.
//!
//! The scheduler is pure: it reads a ticket and the VWAP state that already
//! includes the current tick, and returns at most one [`SliceDecision`]. It
//! never looks ahead and never mutates anything; the lane commits the
//! decision only if the ticket id and epoch still match.

use serde::{Deserialize, Serialize};
use vwx_md::VwapState;

use crate::policy::{ExecutionConfig, PriceComparison};
use crate::ticket::ExecutionTicket;
use crate::types::Side;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceDecision {
    pub ticket_id: u64,
    pub epoch: u64,
    pub side: Side,
    pub quantity: i64,
    pub price_micros: i64,
    pub vwap_micros: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceScheduler {
    comparison: PriceComparison,
    lot_size: i64,
}

impl SliceScheduler {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            comparison: config.price_comparison,
            lot_size: config.lot_size.max(1),
        }
    }

    pub fn on_market_update(
        &self,
        ticket: &ExecutionTicket,
        price_micros: i64,
        tick_volume: i64,
        vwap: &VwapState,
    ) -> Option<SliceDecision> {
        if !ticket.can_slice() {
            return None;
        }
        let ordering = vwap.compare(price_micros)?;
        if !self.comparison.is_favorable(ticket.side(), ordering) {
            return None;
        }
        let vwap_micros = vwap.estimate()?;

        let unit = ticket.policy().unit(ticket.target_qty(), tick_volume);
        let quantity = slice_quantity(ticket.remaining(), unit, self.lot_size);
        if quantity <= 0 {
            return None;
        }

        Some(SliceDecision {
            ticket_id: ticket.id(),
            epoch: ticket.epoch(),
            side: ticket.side(),
            quantity,
            price_micros,
            vwap_micros,
        })
    }
}

/// `min(remaining, unit)`, with non-final slices rounded down to whole lots.
/// A remainder smaller than one unit goes out in full.
pub fn slice_quantity(remaining: i64, unit: i64, lot_size: i64) -> i64 {
    if remaining <= unit {
        return remaining.max(0);
    }
    if lot_size <= 1 {
        return unit;
    }
    match unit / lot_size * lot_size {
        0 => lot_size.min(remaining),
        rounded => rounded,
    }
}
