//! Dispatcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;

/// Configuration for the dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Retries allowed after the initial attempt. A task makes at most
    /// `max_retries + 1` delivery attempts.
    pub max_retries: u32,

    /// Maximum deliveries handed to the transport simultaneously. Ready
    /// tasks beyond this queue up and launch highest-priority first.
    pub max_in_flight: usize,

    /// Retry delay policy.
    pub backoff: BackoffPolicy,

    /// Maximum time `shutdown` waits for in-flight deliveries to finish.
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: crate::DEFAULT_MAX_RETRIES,
            max_in_flight: crate::DEFAULT_MAX_IN_FLIGHT,
            backoff: BackoffPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}
