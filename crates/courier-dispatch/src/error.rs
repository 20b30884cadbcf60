//! Error types for dispatch operations.
//!
//! Delivery failures never surface as errors from submit calls; they are
//! handled inside the engine (retry or terminal failure) and observed later
//! through state queries, statistics, and observer events. The errors here
//! cover the synchronous failure cases only.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors surfaced by the dispatcher front-end.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The dispatcher has been shut down; no further submissions or queries
    /// are accepted.
    #[error("dispatcher is shut down")]
    Shutdown,

    /// The engine loop failed to drain within the shutdown timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Configured shutdown timeout that was exceeded.
        timeout: Duration,
    },

    /// All delivery attempts for a task were exhausted.
    ///
    /// Never returned from a call; carried in [`TaskFailed`] observer events
    /// and logs as the terminal failure description.
    ///
    /// [`TaskFailed`]: courier_core::events::TaskFailed
    #[error("delivery failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Total delivery attempts made.
        attempts: u32,
        /// Error reported by the final attempt.
        last_error: String,
    },
}

impl DispatchError {
    /// Creates a retries-exhausted error from the final attempt's failure.
    pub fn retries_exhausted(attempts: u32, last_error: impl Into<String>) -> Self {
        Self::RetriesExhausted { attempts, last_error: last_error.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        assert_eq!(DispatchError::Shutdown.to_string(), "dispatcher is shut down");

        let exhausted = DispatchError::retries_exhausted(4, "connection failed: refused");
        assert_eq!(
            exhausted.to_string(),
            "delivery failed after 4 attempts: connection failed: refused"
        );
    }
}
