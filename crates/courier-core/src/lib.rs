//! Core domain types for the courier dispatch engine.
//!
//! Provides the task model, priority tiers, lifecycle states, the clock
//! abstraction for deterministic time control, the outbound transport
//! capability boundary, and the observer event system. All other crates
//! depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod task;
pub mod time;
pub mod transport;

pub use events::{
    DispatchEvent, EventHandler, MulticastEventHandler, NoOpEventHandler, TaskCancelled,
    TaskCompleted, TaskFailed, TaskRetryScheduled,
};
pub use task::{BatchId, DispatchTask, Payload, Priority, TaskId, TaskState};
pub use time::{Clock, ManualClock, TokioClock};
pub use transport::{Transport, TransportError};
