//! Exponential backoff with jitter for retry delays.
//!
//! The delay between consecutive retry attempts doubles from a base value up
//! to a cap, then a uniformly random jitter is added to spread retries from
//! many tasks apart. Randomness comes from an injected [`JitterSource`] so
//! tests can seed it.

use std::{
    fmt,
    sync::Mutex,
    time::Duration,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Exponent ceiling; beyond this the doubling would overflow any sane cap
/// anyway.
const MAX_EXPONENT: u32 = 20;

/// Source of uniformly random jitter offsets.
///
/// Substitutable so tests can fix the jitter sequence. `sample` returns a
/// duration in `[0, max]`.
pub trait JitterSource: Send + Sync + fmt::Debug {
    /// Draws a jitter offset in `[0, max]`.
    fn sample(&self, max: Duration) -> Duration;
}

/// Production jitter source backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self, max: Duration) -> Duration {
        if max.is_zero() {
            return Duration::ZERO;
        }
        let ceiling = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
        let nanos = rand::rng().random_range(0..=ceiling);
        Duration::from_nanos(nanos)
    }
}

/// Deterministic jitter source seeded for reproducible tests.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    /// Creates a jitter source from a fixed seed.
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl JitterSource for SeededJitter {
    fn sample(&self, max: Duration) -> Duration {
        if max.is_zero() {
            return Duration::ZERO;
        }
        let ceiling = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Duration::from_nanos(rng.random_range(0..=ceiling))
    }
}

/// Jitter source that always returns zero.
///
/// Makes backoff delays exactly reproducible in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn sample(&self, _max: Duration) -> Duration {
        Duration::ZERO
    }
}

/// Retry delay configuration.
///
/// The delay before retry number `k` (zero-based) is
/// `min(base_delay * 2^k, max_delay) + jitter` where jitter is uniform in
/// `[0, jitter_max]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry, doubled for each subsequent one.
    pub base_delay: Duration,

    /// Ceiling applied to the exponential delay before jitter.
    pub max_delay: Duration,

    /// Upper bound of the uniformly random jitter added on top.
    pub jitter_max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(crate::DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(crate::DEFAULT_MAX_DELAY_MS),
            jitter_max: Duration::from_millis(crate::DEFAULT_JITTER_MAX_MS),
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay before retry number `retry_index` (zero-based).
    pub fn delay_for(&self, retry_index: u32, jitter: &dyn JitterSource) -> Duration {
        let exponent = retry_index.min(MAX_EXPONENT);
        let multiplier = 2_u32.saturating_pow(exponent);
        let exponential = self.base_delay.saturating_mul(multiplier);
        let capped = exponential.min(self.max_delay);
        capped.saturating_add(jitter.sample(self.jitter_max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_the_cap() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_max: Duration::ZERO,
        };

        let delays: Vec<_> = (0..6).map(|k| policy.delay_for(k, &NoJitter)).collect();

        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        assert_eq!(delays[3], Duration::from_secs(8));
        assert_eq!(delays[4], Duration::from_secs(10));
        assert_eq!(delays[5], Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_the_configured_bound() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_max: Duration::from_secs(1),
        };
        let jitter = SeededJitter::new(7);

        for retry_index in 0..10 {
            let delay = policy.delay_for(retry_index, &jitter);
            let floor = policy.base_delay.saturating_mul(2_u32.pow(retry_index)).min(policy.max_delay);
            assert!(delay >= floor, "delay {delay:?} below floor {floor:?}");
            assert!(
                delay <= policy.max_delay + policy.jitter_max,
                "delay {delay:?} above ceiling"
            );
        }
    }

    #[test]
    fn seeded_jitter_is_reproducible() {
        let policy = BackoffPolicy::default();

        let first: Vec<_> =
            (0..5).map(|k| policy.delay_for(k, &SeededJitter::new(42))).collect();
        let second: Vec<_> =
            (0..5).map(|k| policy.delay_for(k, &SeededJitter::new(42))).collect();

        assert_eq!(first, second);
    }

    #[test]
    fn thread_rng_jitter_varies() {
        let jitter = ThreadRngJitter;
        let max = Duration::from_secs(10);

        let samples: std::collections::HashSet<_> =
            (0..20).map(|_| jitter.sample(max).as_nanos()).collect();

        assert!(samples.len() > 1, "jitter should produce varying offsets");
        assert!(samples.iter().all(|&nanos| nanos <= max.as_nanos()));
    }

    #[test]
    fn huge_retry_indices_do_not_overflow() {
        let policy = BackoffPolicy::default();
        let delay = policy.delay_for(u32::MAX, &NoJitter);
        assert_eq!(delay, policy.max_delay);
    }

    #[test]
    fn zero_jitter_bound_yields_zero_offset() {
        assert_eq!(ThreadRngJitter.sample(Duration::ZERO), Duration::ZERO);
        assert_eq!(SeededJitter::new(1).sample(Duration::ZERO), Duration::ZERO);
    }
}
