//! Clock abstraction for testable timing operations.
//!
//! The dispatch engine computes due times, backoff delays, and remaining
//! time through an injected [`Clock`] so tests can control time
//! deterministically instead of depending on ambient runtime globals.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

/// Time source consumed by the dispatch engine.
///
/// Production code uses [`TokioClock`]; tests may inject [`ManualClock`] or
/// rely on tokio's paused test time, which `TokioClock` observes.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant for duration arithmetic.
    fn now(&self) -> Instant;

    /// Current wall-clock time for timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Clock backed by the tokio runtime.
///
/// Reads monotonic time through `tokio::time`, so tests running under
/// `#[tokio::test(start_paused = true)]` get deterministic, auto-advancing
/// timers with no further wiring.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl TokioClock {
    /// Creates a new tokio-backed clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually-driven clock for unit tests.
///
/// Time stands still until [`ManualClock::advance`] is called. `sleep`
/// resolves immediately after advancing the clock by the requested amount,
/// which suits tests that drive time explicitly rather than through the
/// runtime.
#[derive(Debug, Clone)]
pub struct ManualClock {
    offset_ns: Arc<AtomicU64>,
    base_instant: Instant,
    base_utc: DateTime<Utc>,
}

impl ManualClock {
    /// Creates a clock anchored at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a clock anchored at a specific wall-clock time.
    pub fn starting_at(base_utc: DateTime<Utc>) -> Self {
        Self { offset_ns: Arc::new(AtomicU64::new(0)), base_instant: Instant::now(), base_utc }
    }

    /// Advances the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.offset_ns.fetch_add(nanos, Ordering::AcqRel);
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::Acquire))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let elapsed = self.elapsed();
        let delta = chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero());
        self.base_utc.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_monotonic_time() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(10));

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(10));
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn manual_clock_advances_wall_clock_time() {
        let base = Utc::now();
        let clock = ManualClock::starting_at(base);

        clock.advance(Duration::from_secs(60));

        assert_eq!(clock.now_utc(), base + chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn manual_clock_sleep_advances_immediately() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_secs(5)).await;

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_observes_paused_time() {
        let clock = TokioClock::new();
        let start = clock.now();

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(3));
    }
}
