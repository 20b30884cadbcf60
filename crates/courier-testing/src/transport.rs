//! Scripted transport double with attempt recording.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use courier_core::{Payload, Transport, TransportError};
use tokio::sync::Notify;

/// Outcome script controlling what [`MockTransport`] reports per attempt.
#[derive(Debug, Clone)]
pub enum DeliveryScript {
    /// Every attempt succeeds.
    Succeed,
    /// Every attempt fails with the given error.
    Fail(TransportError),
    /// The first `failures` attempts fail, then every attempt succeeds.
    FailTimes {
        /// Number of leading attempts that fail.
        failures: u32,
        /// Error reported by the failing attempts.
        error: TransportError,
    },
    /// Attempts consume outcomes front to back; once exhausted, attempts
    /// succeed.
    Sequence(VecDeque<Result<(), TransportError>>),
}

/// One delivery attempt observed by the mock.
#[derive(Debug, Clone)]
pub struct RecordedAttempt {
    /// Display name of the delivered payload, if any.
    pub label: Option<String>,
    /// Instant the transport received the attempt, in tokio time.
    pub at: tokio::time::Instant,
}

/// In-memory transport double.
///
/// Records every attempt, reports outcomes according to its script, and can
/// hold deliveries open so tests can observe in-flight state or exercise
/// cancellation races.
#[derive(Debug)]
pub struct MockTransport {
    script: Mutex<DeliveryScript>,
    attempts: Mutex<Vec<RecordedAttempt>>,
    failures_seen: AtomicU32,
    held: AtomicBool,
    release: Notify,
}

impl MockTransport {
    /// Creates a transport following `script`.
    pub fn new(script: DeliveryScript) -> Self {
        Self {
            script: Mutex::new(script),
            attempts: Mutex::new(Vec::new()),
            failures_seen: AtomicU32::new(0),
            held: AtomicBool::new(false),
            release: Notify::new(),
        }
    }

    /// Transport where every attempt succeeds.
    pub fn succeeding() -> Self {
        Self::new(DeliveryScript::Succeed)
    }

    /// Transport where every attempt fails with `error`.
    pub fn failing(error: TransportError) -> Self {
        Self::new(DeliveryScript::Fail(error))
    }

    /// Transport failing the first `failures` attempts, then succeeding.
    pub fn fail_times(failures: u32, error: TransportError) -> Self {
        Self::new(DeliveryScript::FailTimes { failures, error })
    }

    /// Transport consuming the given outcomes in order, succeeding after.
    pub fn scripted(outcomes: impl IntoIterator<Item = Result<(), TransportError>>) -> Self {
        Self::new(DeliveryScript::Sequence(outcomes.into_iter().collect()))
    }

    /// Holds every delivery open until released.
    ///
    /// Attempts are still recorded on entry, so tests can observe launch
    /// order while tasks sit in flight.
    pub fn hold(&self) {
        self.held.store(true, Ordering::Release);
    }

    /// Releases one held delivery (or the next to arrive).
    pub fn release_one(&self) {
        self.release.notify_one();
    }

    /// Stops holding and releases every waiting delivery.
    pub fn release_all(&self) {
        self.held.store(false, Ordering::Release);
        self.release.notify_waiters();
    }

    /// Total delivery attempts observed.
    pub fn total_attempts(&self) -> usize {
        self.lock_attempts().len()
    }

    /// Attempts observed for payloads with the given display name.
    pub fn attempts_for(&self, label: &str) -> usize {
        self.lock_attempts().iter().filter(|a| a.label.as_deref() == Some(label)).count()
    }

    /// Snapshot of every recorded attempt, in arrival order.
    pub fn attempts(&self) -> Vec<RecordedAttempt> {
        self.lock_attempts().clone()
    }

    /// Delays between consecutive recorded attempts.
    pub fn gaps_between_attempts(&self) -> Vec<Duration> {
        let attempts = self.lock_attempts();
        attempts.windows(2).map(|pair| pair[1].at.duration_since(pair[0].at)).collect()
    }

    fn lock_attempts(&self) -> std::sync::MutexGuard<'_, Vec<RecordedAttempt>> {
        self.attempts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_outcome(&self) -> Result<(), TransportError> {
        let mut script = self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match &mut *script {
            DeliveryScript::Succeed => Ok(()),
            DeliveryScript::Fail(error) => Err(error.clone()),
            DeliveryScript::FailTimes { failures, error } => {
                if self.failures_seen.fetch_add(1, Ordering::AcqRel) < *failures {
                    Err(error.clone())
                } else {
                    Ok(())
                }
            },
            DeliveryScript::Sequence(outcomes) => outcomes.pop_front().unwrap_or(Ok(())),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn deliver(&self, payload: &Payload) -> Result<(), TransportError> {
        self.lock_attempts().push(RecordedAttempt {
            label: payload.display_name.clone(),
            at: tokio::time::Instant::now(),
        });

        // Each release_one permit (or a release_all) lets one held delivery
        // proceed.
        let released = self.release.notified();
        if self.held.load(Ordering::Acquire) {
            released.await;
        }

        self.next_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fail_times_script_flips_to_success() {
        let transport = MockTransport::fail_times(2, TransportError::connection("refused"));
        let payload = Payload::named("event", "{}");

        assert!(transport.deliver(&payload).await.is_err());
        assert!(transport.deliver(&payload).await.is_err());
        assert!(transport.deliver(&payload).await.is_ok());
        assert_eq!(transport.total_attempts(), 3);
        assert_eq!(transport.attempts_for("event"), 3);
    }

    #[tokio::test]
    async fn sequence_script_consumes_in_order() {
        let transport = MockTransport::scripted([
            Err(TransportError::timeout(30)),
            Ok(()),
        ]);
        let payload = Payload::new("{}");

        assert!(transport.deliver(&payload).await.is_err());
        assert!(transport.deliver(&payload).await.is_ok());
        assert!(transport.deliver(&payload).await.is_ok());
    }

    #[tokio::test]
    async fn held_delivery_waits_for_release() {
        let transport = std::sync::Arc::new(MockTransport::succeeding());
        transport.hold();

        let in_flight = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.deliver(&Payload::new("{}")).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(transport.total_attempts(), 1);
        assert!(!in_flight.is_finished());

        transport.release_all();
        assert!(in_flight.await.expect("join").is_ok());
    }
}
