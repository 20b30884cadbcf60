//! Cancellable one-shot timers for scheduled dispatch and retry backoff.
//!
//! Each armed timer sleeps on the injected clock in its own task and then
//! reports its id on the engine's timer channel. Cancellation removes the id
//! from the live set and aborts the sleep; a firing that races cancellation
//! is rejected by the [`TimerSet::acknowledge`] liveness check when the
//! engine drains the channel, so a cancelled timer never acts.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use courier_core::Clock;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

/// Opaque handle to an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(u64);

/// Set of armed timers owned by the engine loop.
#[derive(Debug)]
pub(crate) struct TimerSet {
    clock: Arc<dyn Clock>,
    tx: UnboundedSender<TimerId>,
    live: HashSet<TimerId>,
    sleeps: HashMap<TimerId, JoinHandle<()>>,
    next_id: u64,
}

impl TimerSet {
    /// Creates a timer set and the channel its firings arrive on.
    pub(crate) fn new(clock: Arc<dyn Clock>) -> (Self, UnboundedReceiver<TimerId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let set = Self { clock, tx, live: HashSet::new(), sleeps: HashMap::new(), next_id: 0 };
        (set, rx)
    }

    /// Arms a timer that fires after `delay`.
    pub(crate) fn arm(&mut self, delay: Duration) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);

        let clock = self.clock.clone();
        let tx = self.tx.clone();
        let sleep = tokio::spawn(async move {
            clock.sleep(delay).await;
            // The engine may have dropped its receiver during shutdown.
            let _ = tx.send(id);
        });

        self.live.insert(id);
        self.sleeps.insert(id, sleep);
        id
    }

    /// Cancels an armed timer.
    ///
    /// Returns whether the timer was still live. After this returns, an
    /// already-queued firing for the id will fail its `acknowledge` check.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        if let Some(sleep) = self.sleeps.remove(&id) {
            sleep.abort();
        }
        self.live.remove(&id)
    }

    /// Liveness check performed when a firing is drained from the channel.
    ///
    /// Returns false when the timer was cancelled after queueing its firing;
    /// the engine must discard such firings.
    pub(crate) fn acknowledge(&mut self, id: TimerId) -> bool {
        self.sleeps.remove(&id);
        self.live.remove(&id)
    }

    /// Number of timers still armed.
    pub(crate) fn armed_count(&self) -> usize {
        self.live.len()
    }

    /// Cancels every armed timer.
    pub(crate) fn clear(&mut self) {
        for (_, sleep) in self.sleeps.drain() {
            sleep.abort();
        }
        self.live.clear();
    }
}
