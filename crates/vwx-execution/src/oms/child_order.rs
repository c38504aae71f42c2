//! Child order state machine.
//!
//! # Design
//!
//! One [`ChildOrder`] per slice handed to the transport. Every transport
//! report is applied via [`ChildOrder::apply`], which enforces:
//!
//! 1. **Legal transitions only.** Illegal events return [`TransitionError`]
//!    and leave the order untouched.
//! 2. **Idempotent replay.** An `event_id` that has already been applied is a
//!    silent no-op that credits nothing.
//! 3. **No overfill.** Fill quantities are clamped to the open quantity; the
//!    clamped-off part is returned to the caller as excess.
//!
//! ```text
//!   new() ──► Submitted ──Fill──► PartiallyFilled ──FinalFill──► Filled (term.)
//!                 │                     │
//!                 └──CancelRequest──────┴──► CancelPending ──CancelAck──► Cancelled (term.)
//!                                                 │
//!                                           CancelReject (restores live state)
//!
//!   any live state ──Reject──► Rejected (term.)
//! ```
//!
//! Fills arriving while `CancelPending` are accepted; the venue may fill
//! before it processes the cancel. A venue may also cancel on its own, so
//! `CancelAck` is accepted from every live state.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ChildOrderId, OrderEvent, OrderEventStatus, Side};

// ---------------------------------------------------------------------------
// ChildOrderState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildOrderState {
    Submitted,
    PartiallyFilled,
    CancelPending,
    /// **Terminal.**
    Filled,
    /// **Terminal.**
    Cancelled,
    /// **Terminal.**
    Rejected,
}

impl ChildOrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

// ---------------------------------------------------------------------------
// ChildEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    Ack,
    /// Partial fill of `qty` (this event only).
    Fill { qty: i64, price_micros: Option<i64> },
    /// Last fill; the order is complete afterwards. `qty` may be zero when
    /// the venue only reports the terminal status.
    FinalFill { qty: i64, price_micros: Option<i64> },
    CancelRequest,
    CancelAck,
    CancelReject,
    Reject,
}

impl ChildEvent {
    pub fn from_order_event(event: &OrderEvent) -> Self {
        match event.status {
            OrderEventStatus::Accepted => ChildEvent::Ack,
            OrderEventStatus::PartiallyFilled => ChildEvent::Fill {
                qty: event.fill_qty,
                price_micros: event.fill_price_micros,
            },
            OrderEventStatus::Filled => ChildEvent::FinalFill {
                qty: event.fill_qty,
                price_micros: event.fill_price_micros,
            },
            OrderEventStatus::Cancelled => ChildEvent::CancelAck,
            OrderEventStatus::Rejected => ChildEvent::Reject,
        }
    }
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal child order transition: {from:?} + {event}")]
    Illegal {
        from: ChildOrderState,
        event: String,
    },

    #[error("fill quantity must be positive, got {0}")]
    NonPositiveFill(i64),
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    /// Quantity added to `filled_qty` by this event.
    pub filled: i64,
    /// Reported fill quantity beyond the open quantity (dropped).
    pub excess: i64,
}

// ---------------------------------------------------------------------------
// ChildOrder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChildOrder {
    pub order_id: ChildOrderId,
    pub side: Side,
    pub quantity: i64,
    pub filled_qty: i64,
    pub price_ref_micros: i64,
    pub vwap_ref_micros: i64,
    pub state: ChildOrderState,
    /// Σ(fill price × fill qty) over fills that carried a price.
    fill_notional: i128,
    priced_qty: i64,
    applied: HashSet<String>,
}

impl ChildOrder {
    pub fn new(
        order_id: ChildOrderId,
        side: Side,
        quantity: i64,
        price_ref_micros: i64,
        vwap_ref_micros: i64,
    ) -> Self {
        debug_assert!(quantity > 0, "child quantity must be positive");
        Self {
            order_id,
            side,
            quantity,
            filled_qty: 0,
            price_ref_micros,
            vwap_ref_micros,
            state: ChildOrderState::Submitted,
            fill_notional: 0,
            priced_qty: 0,
            applied: HashSet::new(),
        }
    }

    pub fn open_qty(&self) -> i64 {
        if self.state.is_terminal() {
            0
        } else {
            (self.quantity - self.filled_qty).max(0)
        }
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Average fill price in micros, rounded to nearest.
    pub fn avg_fill_price_micros(&self) -> Option<i64> {
        if self.priced_qty == 0 {
            return None;
        }
        let q = self.priced_qty as i128;
        i64::try_from((self.fill_notional + q / 2) / q).ok()
    }

    pub fn apply(
        &mut self,
        event: &ChildEvent,
        event_id: Option<&str>,
    ) -> Result<Applied, TransitionError> {
        if let Some(id) = event_id {
            if self.applied.contains(id) {
                return Ok(Applied::default());
            }
        }

        let applied = self.do_transition(event)?;

        if let Some(id) = event_id {
            self.applied.insert(id.to_string());
        }
        Ok(applied)
    }

    fn credit(&mut self, qty: i64, price_micros: Option<i64>) -> Applied {
        let filled = qty.min(self.quantity - self.filled_qty).max(0);
        self.filled_qty += filled;
        if let Some(px) = price_micros {
            self.fill_notional += px as i128 * filled as i128;
            self.priced_qty += filled;
        }
        Applied {
            filled,
            excess: qty - filled,
        }
    }

    fn do_transition(&mut self, event: &ChildEvent) -> Result<Applied, TransitionError> {
        use ChildEvent::*;
        use ChildOrderState::*;

        let illegal = |from: ChildOrderState| TransitionError::Illegal {
            from,
            event: format!("{event:?}"),
        };

        match (self.state, event) {
            (Submitted | PartiallyFilled | CancelPending, Ack) => Ok(Applied::default()),

            (Submitted | PartiallyFilled | CancelPending, Fill { qty, price_micros }) => {
                if *qty <= 0 {
                    return Err(TransitionError::NonPositiveFill(*qty));
                }
                let applied = self.credit(*qty, *price_micros);
                if self.filled_qty >= self.quantity {
                    self.state = Filled;
                } else if self.state != CancelPending {
                    self.state = PartiallyFilled;
                }
                Ok(applied)
            }

            (Submitted | PartiallyFilled | CancelPending, FinalFill { qty, price_micros }) => {
                if *qty < 0 {
                    return Err(TransitionError::NonPositiveFill(*qty));
                }
                let applied = self.credit(*qty, *price_micros);
                self.state = Filled;
                Ok(applied)
            }

            // Duplicate fill report for a completed order.
            (Filled, Fill { .. } | FinalFill { .. }) => Ok(Applied::default()),

            (Submitted | PartiallyFilled, CancelRequest) => {
                self.state = CancelPending;
                Ok(Applied::default())
            }
            (CancelPending, CancelRequest) => Ok(Applied::default()),

            (Submitted | PartiallyFilled | CancelPending, CancelAck) => {
                self.state = Cancelled;
                Ok(Applied::default())
            }
            (Cancelled, CancelAck) => Ok(Applied::default()),

            (CancelPending, CancelReject) => {
                self.state = if self.filled_qty > 0 {
                    PartiallyFilled
                } else {
                    Submitted
                };
                Ok(Applied::default())
            }

            (Submitted | PartiallyFilled | CancelPending, Reject) => {
                self.state = Rejected;
                Ok(Applied::default())
            }
            (Rejected, Reject) => Ok(Applied::default()),

            (from, _) => Err(illegal(from)),
        }
    }
}
