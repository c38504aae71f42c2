//! vwx-execution
//!
//! VWAP-aware slicing of target changes into child orders.
//!
//! - [`policy`]: slice sizing and the favorable-price tie-break
//! - [`oms`]: child order state machine (idempotent event replay)
//! - [`ticket`]: one in-flight target change per instrument
//! - [`scheduler`]: pure tick-by-tick release decisions
//! - [`lane`]: one instrument's serialized state and entry points
//! - [`engine`]: synchronous multi-instrument orchestrator
//! - [`transport`]: the order transport boundary
//!
//! No IO, no wall clock, no randomness: replaying the same inputs yields the
//! same child orders with the same ids.

pub mod engine;
pub mod error;
pub mod id_map;
pub mod lane;
pub mod oms;
pub mod policy;
pub mod scheduler;
pub mod targets;
pub mod ticket;
pub mod transport;
mod types;

pub use engine::ExecutionEngine;
pub use error::EngineError;
pub use id_map::OrderRoutes;
pub use lane::{InstrumentLane, LaneOutput, LaneSnapshot};
pub use policy::{ExecutionConfig, PolicyError, PriceComparison, SlicePolicy};
pub use scheduler::{SliceDecision, SliceScheduler};
pub use targets::{targets_to_deltas, PositionBook, TargetPosition};
pub use ticket::{ExecutionTicket, TicketSnapshot, TicketState};
pub use transport::{OrderTransport, TransportError};
pub use types::{
    ChildOrderId, ChildOrderRequest, ExecutionNotification, OrderEvent, OrderEventStatus,
    RetireReason, Side, TargetDelta,
};
