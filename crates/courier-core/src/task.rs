//! Task model and strongly-typed identifiers.
//!
//! Defines dispatch tasks, priority tiers, lifecycle states, and newtype ID
//! wrappers for compile-time type safety. Tasks carry an opaque payload that
//! the engine never inspects beyond a display-name hint for diagnostics.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed task identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. An id is unique among
/// the tasks currently tracked by the registry; once a task reaches a
/// terminal state its id leaves the registry with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Creates a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier shared by every task submitted through the same batch call.
///
/// A batch carries no atomicity guarantee; the shared id exists purely for
/// correlation in diagnostics and downstream bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    /// Creates a new random batch ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling preference for a task, from least to most urgent.
///
/// Priority is a best-effort preference when the engine chooses among
/// multiple ready tasks, not a hard real-time guarantee. Tasks already
/// handed to the transport are never preempted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background traffic, dispatched when nothing more urgent is ready.
    Low,
    /// Default tier for ordinary submissions.
    #[default]
    Normal,
    /// Preferred over normal traffic when slots are contended.
    High,
    /// Dispatched ahead of every other tier.
    Critical,
}

impl Priority {
    /// All tiers in descending preference order.
    pub const DESCENDING: [Priority; 4] =
        [Priority::Critical, Priority::High, Priority::Normal, Priority::Low];

    /// Converts a numeric priority level into a tier.
    ///
    /// Levels are `0` (low) through `3` (critical). Any other value is
    /// silently normalized to [`Priority::Normal`]; out-of-range input is
    /// never an error.
    pub fn from_level(level: i64) -> Self {
        match level {
            0 => Self::Low,
            1 => Self::Normal,
            2 => Self::High,
            3 => Self::Critical,
            _ => Self::Normal,
        }
    }

    /// Returns the numeric level of this tier.
    pub const fn as_level(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Lifecycle state of a dispatch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Ready for delivery, waiting for the engine to pick it up.
    Pending,
    /// Armed for future dispatch; becomes pending when its timer fires.
    Scheduled,
    /// A delivery attempt has been handed to the transport.
    InFlight,
    /// A failed attempt is waiting out its backoff delay.
    Retrying,
    /// Delivered successfully. Terminal.
    Completed,
    /// Retry attempts exhausted. Terminal.
    Failed,
    /// Explicitly cancelled. Terminal.
    Cancelled,
}

impl TaskState {
    /// Whether this state ends the task's lifecycle.
    ///
    /// A task is removed from the registry the moment it reaches a terminal
    /// state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the task still occupies the registry.
    pub const fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::InFlight => "in_flight",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// Opaque payload handed to the transport on every delivery attempt.
///
/// The engine never inspects `body`; `display_name` exists only so logs and
/// observer events can identify what is being delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Optional human-readable name used in diagnostics.
    pub display_name: Option<String>,
    /// Raw payload bytes, passed through untouched.
    pub body: Bytes,
}

impl Payload {
    /// Creates an unnamed payload from raw bytes.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { display_name: None, body: body.into() }
    }

    /// Creates a named payload from raw bytes.
    pub fn named(name: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self { display_name: Some(name.into()), body: body.into() }
    }

    /// Creates a named payload by serializing `value` as JSON.
    pub fn from_json<T: Serialize>(name: impl Into<String>, value: &T) -> serde_json::Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::named(name, body))
    }

    /// Name to use in logs, falling back to a placeholder.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or("<unnamed>")
    }
}

/// A unit of work tracking one payload through its delivery lifecycle.
///
/// Tasks are created by submit/schedule calls, owned exclusively by the
/// registry until terminal, and mutated only by the dispatch engine and
/// explicit cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchTask {
    /// Unique id assigned at submission.
    pub id: TaskId,
    /// Opaque payload delivered by the transport.
    pub payload: Payload,
    /// Free-form label for grouped cancellation and lookup; not an identity.
    pub marker: Option<String>,
    /// Scheduling preference tier.
    pub priority: Priority,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Delivery attempts made so far. Never exceeds the configured retry cap
    /// plus the initial attempt.
    pub attempt: u32,
    /// Set when the task was submitted as part of a batch.
    pub batch_id: Option<BatchId>,
    /// Wall-clock time of submission.
    pub submitted_at: DateTime<Utc>,
    /// Wall-clock time a scheduled task should first become pending.
    pub dispatch_at: Option<DateTime<Utc>>,
}

impl DispatchTask {
    /// Creates a pending task with a fresh id.
    pub fn new(payload: Payload, priority: Priority, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            payload,
            marker: None,
            priority,
            state: TaskState::Pending,
            attempt: 0,
            batch_id: None,
            submitted_at,
            dispatch_at: None,
        }
    }

    /// Attaches a marker for grouped cancellation.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// Associates the task with a batch.
    pub fn in_batch(mut self, batch: BatchId) -> Self {
        self.batch_id = Some(batch);
        self
    }

    /// Converts the task into a scheduled task due at `dispatch_at`.
    pub fn scheduled_for(mut self, dispatch_at: DateTime<Utc>) -> Self {
        self.state = TaskState::Scheduled;
        self.dispatch_at = Some(dispatch_at);
        self
    }

    /// Records the start of a delivery attempt.
    pub fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.state = TaskState::InFlight;
    }

    /// Moves a task back to pending, ready for the next launch.
    pub fn mark_pending(&mut self) {
        self.state = TaskState::Pending;
    }

    /// Parks the task while its retry backoff elapses.
    pub fn mark_retrying(&mut self) {
        self.state = TaskState::Retrying;
    }
}
