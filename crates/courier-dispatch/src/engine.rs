//! Dispatch engine driving tasks from submission to a terminal state.
//!
//! The engine is a single cooperative loop that owns the task registry, the
//! timer set, and the in-flight delivery set. Every externally observable
//! transition happens on this loop, so no locking is needed and transitions
//! are linearizable. The front-end talks to the loop exclusively through a
//! command channel.
//!
//! # State machine
//!
//! ```text
//!             ┌──────────────┐ timer  ┌─────────┐ launch ┌──────────┐
//! schedule ──▶│  Scheduled   │───────▶│ Pending │───────▶│ InFlight │
//!             └──────────────┘        └─────────┘        └──────────┘
//!                                          ▲      deliver ok │ │ deliver err
//!                                    timer │                 ▼ ▼
//!                                     ┌──────────┐   ┌───────────┬────────┐
//!                                     │ Retrying │◀──│ attempts  │ cap hit│
//!                                     └──────────┘   │ remaining │ Failed │
//!                                                    └───────────┴────────┘
//! ```
//!
//! Completed, Failed, and Cancelled tasks leave the registry immediately.
//! Cancellation of an in-flight task cannot abort the transport call already
//! underway; its eventual result is discarded instead.

use std::{
    collections::{HashMap, VecDeque},
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use courier_core::{
    Clock, DispatchEvent, DispatchTask, EventHandler, Priority, TaskCancelled, TaskCompleted,
    TaskFailed, TaskId, TaskRetryScheduled, TaskState, Transport, TransportError,
};
use futures::FutureExt;
use tokio::{
    sync::{mpsc::UnboundedReceiver, oneshot},
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    backoff::JitterSource,
    config::DispatcherConfig,
    error::DispatchError,
    registry::TaskRegistry,
    scheduler::{ScheduledEntry, SharedState},
    timer::{TimerId, TimerSet},
};

/// Counters describing dispatcher activity since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Tasks accepted through submit and schedule calls.
    pub submitted: u64,
    /// Tasks delivered successfully.
    pub completed: u64,
    /// Tasks that exhausted their retry attempts.
    pub failed: u64,
    /// Tasks cancelled before reaching a delivery outcome.
    pub cancelled: u64,
    /// Retry timers armed after failed attempts.
    pub retries_scheduled: u64,
    /// Deliveries currently handed to the transport.
    pub in_flight: usize,
    /// Tasks currently tracked by the registry in any state.
    pub active: usize,
}

/// Requests sent from the front-end to the engine loop.
pub(crate) enum Command {
    Submit(DispatchTask),
    SubmitBatch(Vec<DispatchTask>),
    Schedule { task: DispatchTask, delay: Duration },
    ScheduleBatch { tasks: Vec<DispatchTask>, delay: Duration },
    Cancel { id: TaskId, reply: oneshot::Sender<bool> },
    CancelScheduled { id: TaskId, reply: oneshot::Sender<bool> },
    CancelByPriority { priority: Priority, reply: oneshot::Sender<usize> },
    CancelByMarker { marker: String, reply: oneshot::Sender<usize> },
    CancelAll { reply: oneshot::Sender<usize> },
    PendingCount { reply: oneshot::Sender<usize> },
    PendingCountByPriority { priority: Priority, reply: oneshot::Sender<usize> },
    ScheduledSnapshot { reply: oneshot::Sender<HashMap<TaskId, ScheduledEntry>> },
    Stats { reply: oneshot::Sender<DispatcherStats> },
}

/// What a pending timer will do when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Move a scheduled task to pending.
    Dispatch,
    /// Move a retrying task back to pending.
    Retry,
}

#[derive(Debug, Clone, Copy)]
struct TimerBinding {
    task: TaskId,
    kind: TimerKind,
    due: Instant,
}

/// Result of one delivery attempt, joined back onto the engine loop.
struct DeliveryOutcome {
    task: TaskId,
    attempt: u32,
    result: Result<(), TransportError>,
}

/// Tasks ready for launch, grouped by tier so the engine can always pick the
/// most urgent one when an in-flight slot frees up.
#[derive(Debug, Default)]
struct ReadyQueue {
    queues: [VecDeque<TaskId>; 4],
}

impl ReadyQueue {
    fn push(&mut self, priority: Priority, id: TaskId) {
        self.queues[priority.as_level() as usize].push_back(id);
    }

    fn pop_highest(&mut self) -> Option<TaskId> {
        for tier in Priority::DESCENDING {
            if let Some(id) = self.queues[tier.as_level() as usize].pop_front() {
                return Some(id);
            }
        }
        None
    }
}

enum Wake {
    Shutdown,
    Command(Option<Command>),
    Timer(Option<TimerId>),
    Delivery(Option<Result<DeliveryOutcome, JoinError>>),
}

/// The dispatch loop. Constructed by the front-end builder and consumed by
/// [`Engine::run`] on a spawned task.
pub(crate) struct Engine {
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    events: Arc<dyn EventHandler>,
    registry: TaskRegistry,
    timers: TimerSet,
    timer_rx: UnboundedReceiver<TimerId>,
    bindings: HashMap<TimerId, TimerBinding>,
    task_timers: HashMap<TaskId, TimerId>,
    ready: ReadyQueue,
    in_flight: JoinSet<DeliveryOutcome>,
    commands: UnboundedReceiver<Command>,
    shared: Arc<SharedState>,
    shutdown: CancellationToken,
    stats: DispatcherStats,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn JitterSource>,
        events: Arc<dyn EventHandler>,
        commands: UnboundedReceiver<Command>,
        shared: Arc<SharedState>,
        shutdown: CancellationToken,
    ) -> Self {
        let (timers, timer_rx) = TimerSet::new(clock.clone());
        Self {
            transport,
            config,
            clock,
            jitter,
            events,
            registry: TaskRegistry::new(),
            timers,
            timer_rx,
            bindings: HashMap::new(),
            task_timers: HashMap::new(),
            ready: ReadyQueue::default(),
            in_flight: JoinSet::new(),
            commands,
            shared,
            shutdown,
            stats: DispatcherStats::default(),
        }
    }

    /// Runs the scheduling loop until shutdown or until the front-end drops
    /// its command channel.
    pub(crate) async fn run(mut self) {
        debug!("dispatch engine started");

        loop {
            let wake = tokio::select! {
                () = self.shutdown.cancelled() => Wake::Shutdown,
                command = self.commands.recv() => Wake::Command(command),
                fired = self.timer_rx.recv() => Wake::Timer(fired),
                outcome = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    Wake::Delivery(outcome)
                },
            };

            match wake {
                Wake::Shutdown | Wake::Command(None) => break,
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Timer(Some(fired)) => self.handle_timer(fired),
                Wake::Delivery(Some(joined)) => self.handle_outcome(joined).await,
                Wake::Timer(None) | Wake::Delivery(None) => {},
            }

            self.launch_ready();
        }

        self.drain().await;
        debug!("dispatch engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(task) => self.register_pending(task),
            Command::SubmitBatch(tasks) => {
                let count = tasks.len();
                for task in tasks {
                    self.register_pending(task);
                }
                debug!(count, "batch submitted");
            },
            Command::Schedule { task, delay } => self.register_scheduled(task, delay),
            Command::ScheduleBatch { tasks, delay } => {
                let count = tasks.len();
                for task in tasks {
                    self.register_scheduled(task, delay);
                }
                debug!(count, delay_ms = delay.as_millis(), "batch scheduled");
            },
            Command::Cancel { id, reply } => {
                let cancelled = self.cancel_one(&id, None).await;
                let _ = reply.send(cancelled);
            },
            Command::CancelScheduled { id, reply } => {
                let cancelled = self.cancel_one(&id, Some(TaskState::Scheduled)).await;
                let _ = reply.send(cancelled);
            },
            Command::CancelByPriority { priority, reply } => {
                let removed = self.registry.remove_by_priority(priority);
                let count = removed.len();
                self.retire_cancelled_batch(removed).await;
                let _ = reply.send(count);
            },
            Command::CancelByMarker { marker, reply } => {
                let removed = self.registry.remove_by_marker(&marker);
                let count = removed.len();
                self.retire_cancelled_batch(removed).await;
                let _ = reply.send(count);
            },
            Command::CancelAll { reply } => {
                let removed = self.registry.drain();
                let count = removed.len();
                self.retire_cancelled_batch(removed).await;
                let _ = reply.send(count);
            },
            Command::PendingCount { reply } => {
                let _ = reply.send(self.registry.len());
            },
            Command::PendingCountByPriority { priority, reply } => {
                let _ = reply.send(self.registry.count_by_priority(priority));
            },
            Command::ScheduledSnapshot { reply } => {
                let _ = reply.send(self.scheduled_snapshot());
            },
            Command::Stats { reply } => {
                let _ = reply.send(self.stats_snapshot());
            },
        }
    }

    fn register_pending(&mut self, task: DispatchTask) {
        self.stats.submitted += 1;
        let id = task.id;
        let priority = task.priority;
        debug!(
            task_id = %id,
            name = task.payload.label(),
            priority = %priority,
            "task submitted"
        );
        if self.registry.insert(task).is_some() {
            warn!(task_id = %id, "replaced existing task with duplicate id");
            self.shared.release(1);
        }
        self.ready.push(priority, id);
    }

    fn register_scheduled(&mut self, task: DispatchTask, delay: Duration) {
        self.stats.submitted += 1;
        let id = task.id;
        debug!(
            task_id = %id,
            name = task.payload.label(),
            delay_ms = delay.as_millis(),
            "task scheduled"
        );

        let timer = self.timers.arm(delay);
        self.bindings
            .insert(timer, TimerBinding { task: id, kind: TimerKind::Dispatch, due: self.clock.now() + delay });
        self.task_timers.insert(id, timer);

        if self.registry.insert(task).is_some() {
            warn!(task_id = %id, "replaced existing task with duplicate id");
            self.shared.release(1);
        }
    }

    fn handle_timer(&mut self, fired: TimerId) {
        // Liveness check: a cancellation that raced the firing wins.
        if !self.timers.acknowledge(fired) {
            return;
        }
        let Some(binding) = self.bindings.remove(&fired) else { return };
        self.task_timers.remove(&binding.task);

        let Some(task) = self.registry.get_mut(&binding.task) else { return };
        match binding.kind {
            TimerKind::Dispatch if task.state == TaskState::Scheduled => {
                debug!(task_id = %binding.task, "scheduled task became pending");
                task.mark_pending();
                self.ready.push(task.priority, binding.task);
            },
            TimerKind::Retry if task.state == TaskState::Retrying => {
                debug!(task_id = %binding.task, attempt = task.attempt, "retry delay elapsed");
                task.mark_pending();
                self.ready.push(task.priority, binding.task);
            },
            _ => {
                warn!(
                    task_id = %binding.task,
                    state = %task.state,
                    "timer fired for task in unexpected state"
                );
            },
        }
    }

    /// Launches ready tasks, most urgent tier first, until the in-flight cap
    /// is reached.
    fn launch_ready(&mut self) {
        while self.in_flight.len() < self.config.max_in_flight {
            let Some(id) = self.ready.pop_highest() else { break };
            // Cancelled while queued, or state changed under us: skip.
            let Some(task) = self.registry.get_mut(&id) else { continue };
            if task.state != TaskState::Pending {
                continue;
            }

            task.begin_attempt();
            let attempt = task.attempt;
            let payload = task.payload.clone();
            debug!(
                task_id = %id,
                name = payload.label(),
                attempt,
                priority = %task.priority,
                "delivery attempt started"
            );

            let transport = self.transport.clone();
            self.in_flight.spawn(async move {
                let result = AssertUnwindSafe(transport.deliver(&payload))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(TransportError::rejected("delivery task panicked")));
                DeliveryOutcome { task: id, attempt, result }
            });
        }
    }

    async fn handle_outcome(&mut self, joined: Result<DeliveryOutcome, JoinError>) {
        let Some(outcome) = Self::joined_outcome(joined) else { return };
        if self.is_stale(&outcome) {
            return;
        }

        match outcome.result {
            Ok(()) => self.complete(outcome.task).await,
            Err(error) => self.handle_failure(outcome.task, &error).await,
        }
    }

    async fn complete(&mut self, id: TaskId) {
        let Some(task) = self.registry.remove(&id) else { return };
        self.stats.completed += 1;
        info!(
            task_id = %id,
            name = task.payload.label(),
            attempts = task.attempt,
            "task delivered"
        );
        self.emit(DispatchEvent::Completed(TaskCompleted {
            task_id: id,
            display_name: task.payload.display_name,
            marker: task.marker,
            priority: task.priority,
            attempts: task.attempt,
            completed_at: self.clock.now_utc(),
        }))
        .await;
        self.shared.release(1);
    }

    async fn handle_failure(&mut self, id: TaskId, error: &TransportError) {
        let attempts_so_far = match self.registry.get(&id) {
            Some(task) => task.attempt,
            None => return,
        };

        if attempts_so_far <= self.config.max_retries {
            let mut event = None;
            if let Some(task) = self.registry.get_mut(&id) {
                task.mark_retrying();
                let retry_index = task.attempt - 1;
                let delay = self.config.backoff.delay_for(retry_index, self.jitter.as_ref());

                let timer = self.timers.arm(delay);
                self.bindings.insert(
                    timer,
                    TimerBinding { task: id, kind: TimerKind::Retry, due: self.clock.now() + delay },
                );
                self.task_timers.insert(id, timer);
                self.stats.retries_scheduled += 1;

                warn!(
                    task_id = %id,
                    attempt = task.attempt,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "delivery failed, retry scheduled"
                );
                event = Some(DispatchEvent::RetryScheduled(TaskRetryScheduled {
                    task_id: id,
                    display_name: task.payload.display_name.clone(),
                    priority: task.priority,
                    attempt: task.attempt,
                    delay,
                    next_attempt_at: wallclock_after(self.clock.as_ref(), delay),
                }));
            }
            if let Some(event) = event {
                self.emit(event).await;
            }
        } else {
            let failure = DispatchError::retries_exhausted(attempts_so_far, error.to_string());
            self.retire_failed(id, failure.to_string()).await;
        }
    }

    /// Removes a task as permanently failed and reports it.
    async fn retire_failed(&mut self, id: TaskId, error_message: String) {
        let Some(task) = self.registry.remove(&id) else { return };
        self.stats.failed += 1;
        error!(
            task_id = %id,
            name = task.payload.label(),
            attempts = task.attempt,
            error = %error_message,
            "delivery permanently failed"
        );
        self.emit(DispatchEvent::Failed(TaskFailed {
            task_id: id,
            display_name: task.payload.display_name,
            marker: task.marker,
            priority: task.priority,
            attempts: task.attempt,
            error_message,
            failed_at: self.clock.now_utc(),
        }))
        .await;
        self.shared.release(1);
    }

    async fn cancel_one(&mut self, id: &TaskId, required_state: Option<TaskState>) -> bool {
        if let Some(required) = required_state {
            if self.registry.get(id).map(|task| task.state) != Some(required) {
                return false;
            }
        }
        let Some(task) = self.registry.remove(id) else { return false };
        self.retire_cancelled(task).await;
        true
    }

    async fn retire_cancelled_batch(&mut self, removed: Vec<DispatchTask>) {
        for task in removed {
            self.retire_cancelled(task).await;
        }
    }

    /// Finishes cancellation of a task already removed from the registry.
    async fn retire_cancelled(&mut self, task: DispatchTask) {
        if let Some(timer) = self.task_timers.remove(&task.id) {
            self.timers.cancel(timer);
            self.bindings.remove(&timer);
        }
        self.stats.cancelled += 1;
        let was_in_flight = task.state == TaskState::InFlight;
        debug!(task_id = %task.id, state = %task.state, "task cancelled");
        self.emit(DispatchEvent::Cancelled(TaskCancelled {
            task_id: task.id,
            display_name: task.payload.display_name,
            marker: task.marker,
            priority: task.priority,
            was_in_flight,
            cancelled_at: self.clock.now_utc(),
        }))
        .await;
        self.shared.release(1);
    }

    fn scheduled_snapshot(&self) -> HashMap<TaskId, ScheduledEntry> {
        let now = self.clock.now();
        self.registry
            .scheduled()
            .map(|task| {
                let time_remaining = self
                    .task_timers
                    .get(&task.id)
                    .and_then(|timer| self.bindings.get(timer))
                    .map(|binding| binding.due.saturating_duration_since(now))
                    .unwrap_or_default();
                let entry = ScheduledEntry {
                    task_id: task.id,
                    display_name: task.payload.display_name.clone(),
                    marker: task.marker.clone(),
                    priority: task.priority,
                    dispatch_at: task.dispatch_at.unwrap_or(task.submitted_at),
                    time_remaining,
                };
                (task.id, entry)
            })
            .collect()
    }

    fn stats_snapshot(&self) -> DispatcherStats {
        let mut stats = self.stats.clone();
        stats.in_flight = self.in_flight.len();
        stats.active = self.registry.len();
        stats
    }

    /// Completes deliveries already handed to the transport, then drops
    /// whatever remains. Failures during shutdown are terminal: the loop is
    /// exiting and cannot arm retry timers.
    async fn drain(&mut self) {
        self.timers.clear();

        while let Some(joined) = self.in_flight.join_next().await {
            let Some(outcome) = Self::joined_outcome(joined) else { continue };
            if self.is_stale(&outcome) {
                continue;
            }
            match outcome.result {
                Ok(()) => self.complete(outcome.task).await,
                Err(error) => {
                    warn!(
                        task_id = %outcome.task,
                        error = %error,
                        "delivery failed during shutdown, not retrying"
                    );
                    self.retire_failed(outcome.task, error.to_string()).await;
                },
            }
        }

        let leftover = self.registry.drain();
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "dropping unprocessed tasks at shutdown");
            self.shared.release(leftover.len());
        }
        // Wake any waiters still parked on an already-idle dispatcher.
        self.shared.release(0);
    }

    fn joined_outcome(joined: Result<DeliveryOutcome, JoinError>) -> Option<DeliveryOutcome> {
        match joined {
            Ok(outcome) => Some(outcome),
            Err(join_error) => {
                error!(error = %join_error, "delivery task aborted unexpectedly");
                None
            },
        }
    }

    /// A result is stale when its task was cancelled, or when it does not
    /// match the attempt the registry is tracking.
    fn is_stale(&self, outcome: &DeliveryOutcome) -> bool {
        match self.registry.get(&outcome.task) {
            Some(task) => {
                if task.state != TaskState::InFlight || task.attempt != outcome.attempt {
                    debug!(task_id = %outcome.task, "stale delivery result discarded");
                    true
                } else {
                    false
                }
            },
            None => {
                debug!(task_id = %outcome.task, "delivery result for cancelled task discarded");
                true
            },
        }
    }

    async fn emit(&self, event: DispatchEvent) {
        self.events.handle_event(event).await;
    }
}

/// Wall-clock time `delay` from now, saturating instead of overflowing.
pub(crate) fn wallclock_after(clock: &dyn Clock, delay: Duration) -> chrono::DateTime<chrono::Utc> {
    let millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    clock
        .now_utc()
        .checked_add_signed(chrono::Duration::milliseconds(millis))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}
