//! Outbound transport capability boundary.
//!
//! The dispatch engine never talks to the network itself; it is handed a
//! [`Transport`] at construction and invokes it once per delivery attempt.
//! Concrete transports (HTTP collectors, message brokers, test doubles) live
//! outside this workspace's core.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::task::Payload;

/// Capability that performs one delivery attempt.
///
/// Implementations must tolerate being called repeatedly with the same
/// payload: the engine re-delivers the identical payload on every retry.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Attempts to deliver `payload` to the remote collector.
    async fn deliver(&self, payload: &Payload) -> Result<(), TransportError>;
}

/// Failure reported by a transport for a single delivery attempt.
///
/// The engine treats every variant uniformly: any failure is retried until
/// the attempt cap is reached. The variants exist for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote collector could not be reached.
    #[error("connection failed: {message}")]
    Connection {
        /// Description of the connectivity failure.
        message: String,
    },

    /// The attempt exceeded the transport's own deadline.
    #[error("delivery timed out after {timeout_ms}ms")]
    Timeout {
        /// Deadline that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// The collector answered and refused the payload.
    #[error("collector rejected payload: {message}")]
    Rejected {
        /// Reason reported by the collector.
        message: String,
    },
}

impl TransportError {
    /// Creates a connection failure.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Creates a timeout failure.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a rejection failure.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }
}
