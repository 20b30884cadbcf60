//! Observer events for task lifecycle outcomes.
//!
//! The engine reports terminal outcomes and retry scheduling through an
//! injected [`EventHandler`], keeping delivery logic decoupled from whatever
//! wants to observe it (an SDK facade surfacing completion callbacks, a
//! metrics bridge, test assertions). Handlers must not block: the engine
//! awaits them on its scheduling loop.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Priority, TaskId};

/// Events emitted by the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchEvent {
    /// A task was delivered successfully.
    Completed(TaskCompleted),

    /// A task exhausted its retry attempts.
    Failed(TaskFailed),

    /// A failed attempt was scheduled for retry.
    RetryScheduled(TaskRetryScheduled),

    /// A task was cancelled before reaching a delivery outcome.
    Cancelled(TaskCancelled),
}

impl DispatchEvent {
    /// Id of the task this event concerns.
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Completed(event) => event.task_id,
            Self::Failed(event) => event.task_id,
            Self::RetryScheduled(event) => event.task_id,
            Self::Cancelled(event) => event.task_id,
        }
    }
}

/// Emitted when a delivery attempt succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleted {
    /// Id of the completed task.
    pub task_id: TaskId,
    /// Display name of the delivered payload, if any.
    pub display_name: Option<String>,
    /// Marker the task was submitted with, if any.
    pub marker: Option<String>,
    /// Priority tier the task ran under.
    pub priority: Priority,
    /// Total delivery attempts made, including the successful one.
    pub attempts: u32,
    /// When the successful delivery completed.
    pub completed_at: DateTime<Utc>,
}

/// Emitted when a task runs out of retry attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailed {
    /// Id of the failed task.
    pub task_id: TaskId,
    /// Display name of the payload, if any.
    pub display_name: Option<String>,
    /// Marker the task was submitted with, if any.
    pub marker: Option<String>,
    /// Priority tier the task ran under.
    pub priority: Priority,
    /// Total delivery attempts made.
    pub attempts: u32,
    /// Error reported by the final attempt.
    pub error_message: String,
    /// When the task was declared failed.
    pub failed_at: DateTime<Utc>,
}

/// Emitted when a failed attempt is parked for retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRetryScheduled {
    /// Id of the retrying task.
    pub task_id: TaskId,
    /// Display name of the payload, if any.
    pub display_name: Option<String>,
    /// Priority tier the task runs under.
    pub priority: Priority,
    /// Attempts made so far.
    pub attempt: u32,
    /// Backoff delay before the next attempt.
    pub delay: Duration,
    /// Wall-clock time the next attempt becomes eligible.
    pub next_attempt_at: DateTime<Utc>,
}

/// Emitted when a task is cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCancelled {
    /// Id of the cancelled task.
    pub task_id: TaskId,
    /// Display name of the payload, if any.
    pub display_name: Option<String>,
    /// Marker the task was submitted with, if any.
    pub marker: Option<String>,
    /// Priority tier the task was registered under.
    pub priority: Priority,
    /// Whether a delivery was already handed to the transport. Its eventual
    /// result will be discarded.
    pub was_in_flight: bool,
    /// When the cancellation was applied.
    pub cancelled_at: DateTime<Utc>,
}

/// Trait for observing dispatch events.
///
/// Implementations should return quickly and must not propagate failures
/// back into the engine; log and move on.
#[async_trait]
pub trait EventHandler: Send + Sync + fmt::Debug {
    /// Handles one dispatch event.
    async fn handle_event(&self, event: DispatchEvent);
}

/// Event handler that discards everything.
///
/// The default when no observer is configured.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: DispatchEvent) {}
}

/// Forwards each event to every registered subscriber concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: DispatchEvent) {
        let fanout = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move { handler.handle_event(event).await }
        });
        futures::future::join_all(fanout).await;
    }
}
