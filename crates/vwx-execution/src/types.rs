use std::fmt;

use serde::{Deserialize, Serialize};
use vwx_md::Instrument;

use crate::policy::SlicePolicy;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Direction implied by a signed quantity; `None` for zero.
    pub fn from_signed(qty: i64) -> Option<Side> {
        match qty.signum() {
            1 => Some(Side::Buy),
            -1 => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Portfolio-layer input
// ---------------------------------------------------------------------------

/// Desired change in holdings for one instrument.
///
/// Signed quantity: positive buys, negative sells, zero is a no-op. A delta
/// for an instrument that already has a ticket replaces that ticket's
/// remaining quantity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetDelta {
    pub instrument: Instrument,
    pub quantity: i64,
    /// Informational; the portfolio layer enforces it by cancelling.
    #[serde(default)]
    pub deadline_ms: Option<i64>,
    /// Overrides the engine-wide slice policy for this ticket.
    #[serde(default)]
    pub slice_policy: Option<SlicePolicy>,
}

impl TargetDelta {
    pub fn new(instrument: Instrument, quantity: i64) -> Self {
        Self {
            instrument,
            quantity,
            deadline_ms: None,
            slice_policy: None,
        }
    }

    pub fn with_deadline(mut self, deadline_ms: i64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    pub fn with_slice_policy(mut self, policy: SlicePolicy) -> Self {
        self.slice_policy = Some(policy);
        self
    }

    pub fn side(&self) -> Option<Side> {
        Side::from_signed(self.quantity)
    }
}

// ---------------------------------------------------------------------------
// Transport boundary
// ---------------------------------------------------------------------------

/// Engine-assigned child order identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChildOrderId(String);

impl ChildOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChildOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A child order handed to the transport. Quantity is always positive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildOrderRequest {
    pub order_id: ChildOrderId,
    pub instrument: Instrument,
    pub side: Side,
    pub quantity: i64,
    /// Market price that triggered the slice, in micros.
    pub price_ref_micros: i64,
    /// VWAP at decision time, in micros.
    pub vwap_ref_micros: i64,
    /// Timestamp of the triggering tick (epoch ms).
    pub ts_ms: i64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventStatus {
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

/// Asynchronous report from the transport about one child order.
///
/// `fill_qty` is the quantity filled by *this* event (not cumulative).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: ChildOrderId,
    pub status: OrderEventStatus,
    #[serde(default)]
    pub fill_qty: i64,
    #[serde(default)]
    pub fill_price_micros: Option<i64>,
    /// Optional transport-assigned id; replays of an applied id are ignored.
    #[serde(default)]
    pub event_id: Option<String>,
}

impl OrderEvent {
    fn bare(order_id: ChildOrderId, status: OrderEventStatus) -> Self {
        Self {
            order_id,
            status,
            fill_qty: 0,
            fill_price_micros: None,
            event_id: None,
        }
    }

    pub fn accepted(order_id: ChildOrderId) -> Self {
        Self::bare(order_id, OrderEventStatus::Accepted)
    }

    pub fn partial_fill(order_id: ChildOrderId, qty: i64, price_micros: i64) -> Self {
        Self {
            fill_qty: qty,
            fill_price_micros: Some(price_micros),
            ..Self::bare(order_id, OrderEventStatus::PartiallyFilled)
        }
    }

    pub fn filled(order_id: ChildOrderId, qty: i64, price_micros: i64) -> Self {
        Self {
            fill_qty: qty,
            fill_price_micros: Some(price_micros),
            ..Self::bare(order_id, OrderEventStatus::Filled)
        }
    }

    pub fn cancelled(order_id: ChildOrderId) -> Self {
        Self::bare(order_id, OrderEventStatus::Cancelled)
    }

    pub fn rejected(order_id: ChildOrderId) -> Self {
        Self::bare(order_id, OrderEventStatus::Rejected)
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Observability
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireReason {
    /// Remaining quantity reached zero with nothing outstanding.
    Completed,
    /// Explicit cancel-all from the portfolio layer.
    Cancelled,
    /// Instrument removed from the universe.
    Removed,
}

/// Execution-status notifications for the integration layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionNotification {
    TicketCreated {
        instrument: Instrument,
        ticket_id: u64,
        side: Side,
        quantity: i64,
    },
    TicketRetargeted {
        instrument: Instrument,
        ticket_id: u64,
        side: Side,
        quantity: i64,
    },
    TicketRetired {
        instrument: Instrument,
        ticket_id: u64,
        reason: RetireReason,
        filled_qty: i64,
    },
    SliceSubmitted {
        request: ChildOrderRequest,
        ticket_id: u64,
    },
    SliceRejected {
        instrument: Instrument,
        ticket_id: u64,
        order_id: ChildOrderId,
        reason: String,
    },
    /// A decision computed before a retire/retarget was dropped at commit.
    SliceDiscarded {
        instrument: Instrument,
        ticket_id: u64,
    },
    CancelRequested {
        instrument: Instrument,
        order_id: ChildOrderId,
    },
    ChildClosed {
        instrument: Instrument,
        order_id: ChildOrderId,
        status: OrderEventStatus,
        filled_qty: i64,
    },
    SessionReset {
        instrument: Instrument,
        session_start_ms: i64,
    },
    Anomaly {
        instrument: Option<Instrument>,
        message: String,
    },
}
