//! Asynchronous, priority-ordered task dispatch engine.
//!
//! This crate implements the delivery core that accepts outbound tasks,
//! schedules them for immediate or future dispatch, retries failures with
//! exponential backoff and jitter, and tracks every task to a terminal
//! state without ever blocking the submitting caller.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  commands   ┌─────────────────────────────┐
//! │ Dispatcher │────────────▶│        Engine loop          │
//! │ (front-end)│◀────────────│  registry · timers · ready  │
//! └────────────┘   replies   └─────────────────────────────┘
//!                                  │ deliver        ▲ outcome
//!                                  ▼                │
//!                            ┌───────────────────────────┐
//!                            │   Transport (injected)    │
//!                            └───────────────────────────┘
//! ```
//!
//! All mutable state lives on a single cooperative loop; the front-end
//! communicates with it through channels, so observable transitions are
//! linearizable without locks. Time and randomness are injected
//! capabilities, which makes the whole state machine deterministic under
//! test.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier_core::{Payload, Priority, Transport};
//! use courier_dispatch::{DispatchOptions, Dispatcher};
//!
//! # async fn example(transport: Arc<dyn Transport>) -> courier_dispatch::Result<()> {
//! let dispatcher = Dispatcher::new(transport);
//!
//! let options = DispatchOptions::new().marker("session-42").priority(Priority::High);
//! dispatcher.dispatch_with(Payload::named("signup", r#"{"user":1}"#), options)?;
//!
//! // Drive everything to a terminal state before exiting.
//! dispatcher.wait(None).await;
//! dispatcher.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod config;
mod engine;
pub mod error;
pub mod registry;
mod scheduler;
mod timer;

pub use backoff::{BackoffPolicy, JitterSource, NoJitter, SeededJitter, ThreadRngJitter};
pub use config::DispatcherConfig;
pub use engine::DispatcherStats;
pub use error::{DispatchError, Result};
pub use registry::TaskRegistry;
pub use scheduler::{DispatchOptions, Dispatcher, DispatcherBuilder, ScheduledEntry};

/// Default number of retries after the initial delivery attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default cap on simultaneous in-flight deliveries.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Default base backoff delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default backoff delay ceiling in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Default upper bound on backoff jitter in milliseconds.
pub const DEFAULT_JITTER_MAX_MS: u64 = 1_000;
