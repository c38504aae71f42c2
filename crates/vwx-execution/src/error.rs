use thiserror::Error;
use vwx_md::{Instrument, TickError};

use crate::oms::TransitionError;
use crate::policy::PolicyError;
use crate::transport::TransportError;
use crate::types::ChildOrderId;

/// Errors reported by the engine. None of them are fatal and none of them
/// affect instruments other than the one named.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Malformed or out-of-order market update; dropped.
    #[error("{instrument}: dropped market update: {source}")]
    Data {
        instrument: Instrument,
        #[source]
        source: TickError,
    },

    /// Invalid slice policy; no ticket was created or changed.
    #[error("{instrument}: invalid execution config: {source}")]
    Config {
        instrument: Instrument,
        #[source]
        source: PolicyError,
    },

    /// The transport refused a child order; the ticket is waiting again.
    #[error("{instrument}: submission of {order_id} failed: {source}")]
    Submission {
        instrument: Instrument,
        order_id: ChildOrderId,
        #[source]
        source: TransportError,
    },

    #[error("{instrument}: cancel of {order_id} failed: {source}")]
    Cancel {
        instrument: Instrument,
        order_id: ChildOrderId,
        #[source]
        source: TransportError,
    },

    #[error("order event for unknown order id {0}")]
    UnknownOrder(ChildOrderId),

    #[error("{instrument}: order event for {order_id} but no active ticket")]
    NoActiveTicket {
        instrument: Instrument,
        order_id: ChildOrderId,
    },

    /// The order event is illegal for the child's current state; not applied.
    #[error("{order_id}: {source}")]
    Transition {
        order_id: ChildOrderId,
        #[source]
        source: TransitionError,
    },

    /// Fills beyond the ticket's remaining quantity; the excess was dropped.
    #[error("{instrument}: {order_id} overfilled by {excess}")]
    Overfill {
        instrument: Instrument,
        order_id: ChildOrderId,
        excess: i64,
    },
}

impl EngineError {
    pub fn instrument(&self) -> Option<&Instrument> {
        match self {
            EngineError::Data { instrument, .. }
            | EngineError::Config { instrument, .. }
            | EngineError::Submission { instrument, .. }
            | EngineError::Cancel { instrument, .. }
            | EngineError::NoActiveTicket { instrument, .. }
            | EngineError::Overfill { instrument, .. } => Some(instrument),
            EngineError::UnknownOrder(_) | EngineError::Transition { .. } => None,
        }
    }
}
