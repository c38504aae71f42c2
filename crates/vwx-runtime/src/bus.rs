//! Runtime inputs and the broadcast bus payload.

use serde::{Deserialize, Serialize};
use vwx_execution::{EngineError, ExecutionNotification, OrderEvent, TargetDelta};
use vwx_md::{Instrument, MarketUpdate, SessionBoundary};

/// Everything the runtime accepts from its producers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineInput {
    TargetDelta { delta: TargetDelta },
    MarketUpdate { update: MarketUpdate },
    OrderEvent { event: OrderEvent },
    SessionBoundary { boundary: SessionBoundary },
    CancelAll { instrument: Instrument },
    RemoveInstrument { instrument: Instrument },
}

impl From<TargetDelta> for EngineInput {
    fn from(delta: TargetDelta) -> Self {
        EngineInput::TargetDelta { delta }
    }
}

impl From<MarketUpdate> for EngineInput {
    fn from(update: MarketUpdate) -> Self {
        EngineInput::MarketUpdate { update }
    }
}

impl From<OrderEvent> for EngineInput {
    fn from(event: OrderEvent) -> Self {
        EngineInput::OrderEvent { event }
    }
}

impl From<SessionBoundary> for EngineInput {
    fn from(boundary: SessionBoundary) -> Self {
        EngineInput::SessionBoundary { boundary }
    }
}

/// Messages broadcast to every subscriber.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Notification {
        notification: ExecutionNotification,
    },
    Error {
        instrument: Option<Instrument>,
        message: String,
    },
}

impl BusMsg {
    pub fn error(err: &EngineError) -> Self {
        BusMsg::Error {
            instrument: err.instrument().cloned(),
            message: err.to_string(),
        }
    }
}
