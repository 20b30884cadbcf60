//! Public front-end for submitting, scheduling, querying, and cancelling
//! dispatch tasks.
//!
//! [`Dispatcher`] is a thin handle over the engine loop: submission methods
//! assign an id, clamp options, and enqueue a command without ever blocking
//! the caller; queries and cancellations round-trip through the loop so
//! their answers reflect a linearizable view of the registry.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use courier_core::{
    Clock, DispatchTask, EventHandler, NoOpEventHandler, Payload, Priority, TaskId, TokioClock,
    Transport,
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedSender},
        oneshot, Notify,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    backoff::{JitterSource, ThreadRngJitter},
    config::DispatcherConfig,
    engine::{wallclock_after, Command, DispatcherStats, Engine},
    error::{DispatchError, Result},
};

/// Count of tasks that have been submitted and not yet reached a terminal
/// state, shared between the front-end and the engine loop.
///
/// The front-end increments at submission time, before the engine has even
/// seen the command, so `wait` observes a task as active from the moment its
/// submit call returns. The engine decrements once per terminal task and
/// notifies waiters.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    active: AtomicUsize,
    idle: Notify,
}

impl SharedState {
    pub(crate) fn acquire(&self, count: usize) {
        self.active.fetch_add(count, Ordering::AcqRel);
    }

    pub(crate) fn release(&self, count: usize) {
        if count > 0 {
            let _ = self
                .active
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(count)));
        }
        self.idle.notify_waiters();
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Optional attributes for a single submission.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Free-form label for grouped cancellation and lookup.
    pub marker: Option<String>,
    /// Scheduling preference; defaults to [`Priority::Normal`].
    pub priority: Priority,
}

impl DispatchOptions {
    /// Creates default options: no marker, normal priority.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the marker.
    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// Sets the priority tier.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Snapshot of one scheduled task, as returned by
/// [`Dispatcher::scheduled_events`].
#[derive(Debug, Clone)]
pub struct ScheduledEntry {
    /// Id of the scheduled task.
    pub task_id: TaskId,
    /// Display name of its payload, if any.
    pub display_name: Option<String>,
    /// Marker the task was submitted with, if any.
    pub marker: Option<String>,
    /// Priority tier it will run under.
    pub priority: Priority,
    /// Wall-clock time it becomes pending.
    pub dispatch_at: DateTime<Utc>,
    /// Time left until dispatch, measured when the snapshot was taken.
    pub time_remaining: Duration,
}

/// Builder wiring a [`Dispatcher`] with its injected capabilities.
pub struct DispatcherBuilder {
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    events: Arc<dyn EventHandler>,
}

impl DispatcherBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: DispatcherConfig::default(),
            clock: Arc::new(TokioClock::new()),
            jitter: Arc::new(ThreadRngJitter),
            events: Arc::new(NoOpEventHandler::new()),
        }
    }

    /// Overrides the engine configuration.
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Injects a clock, replacing the tokio-backed default.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Injects a jitter source, replacing the thread-RNG default.
    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Injects an observer for dispatch events.
    pub fn events(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = events;
        self
    }

    /// Spawns the engine loop and returns the front-end handle.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Dispatcher {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SharedState::default());
        let shutdown = CancellationToken::new();
        let shutdown_timeout = self.config.shutdown_timeout;

        info!(
            max_retries = self.config.max_retries,
            max_in_flight = self.config.max_in_flight,
            "starting dispatcher"
        );

        let engine = Engine::new(
            self.transport,
            self.config,
            self.clock.clone(),
            self.jitter,
            self.events,
            command_rx,
            shared.clone(),
            shutdown.clone(),
        );
        let engine_task = tokio::spawn(engine.run());

        Dispatcher {
            commands,
            shared,
            clock: self.clock,
            shutdown,
            engine: Mutex::new(Some(engine_task)),
            shutdown_timeout,
        }
    }
}

/// Handle for submitting work to the dispatch engine.
///
/// Submission methods are synchronous and never block beyond assigning an
/// id; everything else about a task's fate is observed asynchronously via
/// queries, [`Dispatcher::wait`], statistics, or observer events.
pub struct Dispatcher {
    commands: UnboundedSender<Command>,
    shared: Arc<SharedState>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    engine: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl Dispatcher {
    /// Starts building a dispatcher around the given transport.
    pub fn builder(transport: Arc<dyn Transport>) -> DispatcherBuilder {
        DispatcherBuilder::new(transport)
    }

    /// Creates a dispatcher with default configuration and capabilities.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).build()
    }

    /// Registers a task and begins delivery immediately.
    pub fn dispatch(&self, payload: Payload) -> Result<TaskId> {
        self.dispatch_with(payload, DispatchOptions::default())
    }

    /// Registers a task with explicit options and begins delivery.
    pub fn dispatch_with(&self, payload: Payload, options: DispatchOptions) -> Result<TaskId> {
        let task = self.build_task(payload, options);
        let id = task.id;
        self.submit(Command::Submit(task), 1)?;
        Ok(id)
    }

    /// Registers `payloads` as independent tasks sharing one batch id.
    ///
    /// An empty input returns an empty id list without side effects. A batch
    /// carries no atomicity guarantee: each task completes or fails on its
    /// own.
    pub fn dispatch_batch(&self, payloads: Vec<Payload>, priority: Priority) -> Result<Vec<TaskId>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        let (tasks, ids) = self.build_batch(payloads, priority, None);
        self.submit(Command::SubmitBatch(tasks), ids.len())?;
        Ok(ids)
    }

    /// Registers a task to begin delivery after `delay`.
    pub fn schedule_event(&self, payload: Payload, delay: Duration) -> Result<TaskId> {
        self.schedule_event_with(payload, delay, DispatchOptions::default())
    }

    /// Registers a task with explicit options to begin delivery after
    /// `delay`.
    pub fn schedule_event_with(
        &self,
        payload: Payload,
        delay: Duration,
        options: DispatchOptions,
    ) -> Result<TaskId> {
        let dispatch_at = wallclock_after(self.clock.as_ref(), delay);
        let task = self.build_task(payload, options).scheduled_for(dispatch_at);
        let id = task.id;
        self.submit(Command::Schedule { task, delay }, 1)?;
        Ok(id)
    }

    /// Schedules `payloads` as one batch due after `delay`.
    pub fn schedule_batch(
        &self,
        payloads: Vec<Payload>,
        delay: Duration,
        priority: Priority,
    ) -> Result<Vec<TaskId>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        let dispatch_at = wallclock_after(self.clock.as_ref(), delay);
        let (tasks, ids) = self.build_batch(payloads, priority, Some(dispatch_at));
        self.submit(Command::ScheduleBatch { tasks, delay }, ids.len())?;
        Ok(ids)
    }

    /// Cancels a task in any non-terminal state.
    ///
    /// Returns false for unknown ids. A delivery already handed to the
    /// transport is not aborted, but its result will be discarded.
    pub async fn cancel_event(&self, id: TaskId) -> Result<bool> {
        self.request(|reply| Command::Cancel { id, reply }).await
    }

    /// Cancels a task only if it is still in the scheduled state.
    pub async fn cancel_scheduled_event(&self, id: TaskId) -> Result<bool> {
        self.request(|reply| Command::CancelScheduled { id, reply }).await
    }

    /// Cancels every task registered under `priority`; returns the count.
    pub async fn cancel_events_by_priority(&self, priority: Priority) -> Result<usize> {
        self.request(|reply| Command::CancelByPriority { priority, reply }).await
    }

    /// Cancels every task whose marker equals `marker`; returns the count.
    pub async fn cancel_events_by_marker(&self, marker: impl Into<String>) -> Result<usize> {
        let marker = marker.into();
        self.request(|reply| Command::CancelByMarker { marker, reply }).await
    }

    /// Cancels every active task; returns the count.
    pub async fn cancel_all_events(&self) -> Result<usize> {
        self.request(|reply| Command::CancelAll { reply }).await
    }

    /// Number of tasks still registered, in any lifecycle state.
    pub async fn pending_count(&self) -> Result<usize> {
        self.request(|reply| Command::PendingCount { reply }).await
    }

    /// Number of registered tasks under `priority`.
    pub async fn pending_count_by_priority(&self, priority: Priority) -> Result<usize> {
        self.request(|reply| Command::PendingCountByPriority { priority, reply }).await
    }

    /// Whether any task is still registered.
    pub async fn has_pending(&self) -> Result<bool> {
        Ok(self.pending_count().await? > 0)
    }

    /// Snapshot of tasks waiting in the scheduled state, keyed by id.
    pub async fn scheduled_events(&self) -> Result<HashMap<TaskId, ScheduledEntry>> {
        self.request(|reply| Command::ScheduledSnapshot { reply }).await
    }

    /// Snapshot of dispatcher activity counters.
    pub async fn stats(&self) -> Result<DispatcherStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Waits until every submitted task has reached a terminal state.
    ///
    /// `None` and `Some(Duration::ZERO)` both wait indefinitely; a positive
    /// timeout bounds the wait and returns false on expiry while tasks
    /// remain active.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(limit) if !limit.is_zero() => {
                tokio::time::timeout(limit, self.shared.wait_idle()).await.is_ok()
            },
            _ => {
                self.shared.wait_idle().await;
                true
            },
        }
    }

    /// Shuts the dispatcher down.
    ///
    /// In-flight deliveries are allowed to finish; pending, scheduled, and
    /// retrying tasks are dropped without further attempts. Fails with
    /// [`DispatchError::ShutdownTimeout`] when the engine cannot drain
    /// within the configured timeout.
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down dispatcher");
        self.shutdown.cancel();

        let engine_task =
            self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        let Some(engine_task) = engine_task else { return Ok(()) };

        match tokio::time::timeout(self.shutdown_timeout, engine_task).await {
            Ok(Ok(())) => {
                info!("dispatcher shutdown complete");
                Ok(())
            },
            Ok(Err(join_error)) => {
                error!(error = %join_error, "engine loop terminated abnormally");
                Ok(())
            },
            Err(_) => {
                error!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "dispatcher shutdown timed out"
                );
                Err(DispatchError::ShutdownTimeout { timeout: self.shutdown_timeout })
            },
        }
    }

    fn build_task(&self, payload: Payload, options: DispatchOptions) -> DispatchTask {
        let mut task = DispatchTask::new(payload, options.priority, self.clock.now_utc());
        if let Some(marker) = options.marker {
            task = task.with_marker(marker);
        }
        task
    }

    fn build_batch(
        &self,
        payloads: Vec<Payload>,
        priority: Priority,
        dispatch_at: Option<DateTime<Utc>>,
    ) -> (Vec<DispatchTask>, Vec<TaskId>) {
        let batch = courier_core::BatchId::new();
        let now = self.clock.now_utc();
        let tasks: Vec<DispatchTask> = payloads
            .into_iter()
            .map(|payload| {
                let task = DispatchTask::new(payload, priority, now).in_batch(batch);
                match dispatch_at {
                    Some(at) => task.scheduled_for(at),
                    None => task,
                }
            })
            .collect();
        let ids = tasks.iter().map(|task| task.id).collect();
        (tasks, ids)
    }

    /// Accounts for `activates` new tasks and enqueues the command.
    fn submit(&self, command: Command, activates: usize) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::Shutdown);
        }
        self.shared.acquire(activates);
        if self.commands.send(command).is_err() {
            self.shared.release(activates);
            return Err(DispatchError::Shutdown);
        }
        Ok(())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::Shutdown);
        }
        let (reply, response) = oneshot::channel();
        self.commands.send(build(reply)).map_err(|_| DispatchError::Shutdown)?;
        response.await.map_err(|_| DispatchError::Shutdown)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            if self.shared.active() > 0 {
                warn!(
                    active = self.shared.active(),
                    "dispatcher dropped with active tasks, cancelling engine loop"
                );
            }
            self.shutdown.cancel();
        }
    }
}
