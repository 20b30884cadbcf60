//! Test doubles and deterministic harness for the dispatch engine.
//!
//! Provides a scripted [`MockTransport`] with attempt recording, a
//! [`RecordingHandler`] capturing observer events, and a [`TestDispatcher`]
//! that wires both into a dispatcher with seeded jitter. Combined with
//! tokio's paused test time, these make every retry, schedule, and
//! cancellation scenario reproducible.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod transport;

pub use events::RecordingHandler;
pub use transport::{DeliveryScript, MockTransport, RecordedAttempt};

mod env;

pub use env::{TestDispatcher, TestDispatcherBuilder};

/// Yields the cooperative scheduler until queued engine work has drained.
///
/// Lets the engine loop process submitted commands and delivery outcomes
/// without advancing time, so timers stay unfired. Useful for asserting on
/// intermediate states like `Retrying`.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
