//! Property-based tests for priority coercion, backoff bounds, and registry
//! index consistency.

use std::time::Duration;

use chrono::Utc;
use courier_core::{DispatchTask, Payload, Priority};
use courier_dispatch::{BackoffPolicy, SeededJitter, TaskRegistry};
use proptest::prelude::*;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

proptest! {
    #[test]
    fn any_numeric_level_lands_on_a_defined_tier(level in any::<i64>()) {
        let tier = Priority::from_level(level);
        prop_assert!(Priority::DESCENDING.contains(&tier));
        if !(0..=3).contains(&level) {
            prop_assert_eq!(tier, Priority::Normal);
        }
    }

    #[test]
    fn backoff_delay_stays_between_floor_and_ceiling(
        base_ms in 1_u64..2_000,
        cap_multiplier in 1_u32..64,
        jitter_ms in 0_u64..2_000,
        retry_index in 0_u32..40,
        seed in any::<u64>(),
    ) {
        let policy = BackoffPolicy {
            base_delay: ms(base_ms),
            max_delay: ms(base_ms.saturating_mul(u64::from(cap_multiplier))),
            jitter_max: ms(jitter_ms),
        };
        let jitter = SeededJitter::new(seed);

        let delay = policy.delay_for(retry_index, &jitter);

        let exponential =
            policy.base_delay.saturating_mul(2_u32.saturating_pow(retry_index.min(20)));
        let floor = exponential.min(policy.max_delay);
        prop_assert!(delay >= floor, "delay {:?} below floor {:?}", delay, floor);
        prop_assert!(
            delay <= policy.max_delay + policy.jitter_max,
            "delay {:?} above ceiling",
            delay
        );
    }

    #[test]
    fn registry_total_always_equals_sum_of_tier_counts(
        ops in prop::collection::vec((0_i64..4, any::<bool>()), 0..64),
    ) {
        let mut registry = TaskRegistry::new();

        for (level, remove_tier) in ops {
            let tier = Priority::from_level(level);
            if remove_tier {
                let removed = registry.remove_by_priority(tier);
                prop_assert!(removed.iter().all(|task| task.priority == tier));
            } else {
                registry.insert(DispatchTask::new(Payload::new("{}"), tier, Utc::now()));
            }

            let tier_total: usize = Priority::DESCENDING
                .iter()
                .map(|tier| registry.count_by_priority(*tier))
                .sum();
            prop_assert_eq!(registry.len(), tier_total);
        }
    }

    #[test]
    fn marker_removal_takes_exactly_the_matching_tasks(
        markers in prop::collection::vec(prop::option::of("m[0-9]"), 1..32),
    ) {
        let mut registry = TaskRegistry::new();
        for marker in &markers {
            let mut task = DispatchTask::new(Payload::new("{}"), Priority::Normal, Utc::now());
            if let Some(marker) = marker {
                task = task.with_marker(marker.clone());
            }
            registry.insert(task);
        }

        let expected = markers.iter().filter(|m| m.as_deref() == Some("m0")).count();
        let removed = registry.remove_by_marker("m0");

        prop_assert_eq!(removed.len(), expected);
        prop_assert_eq!(registry.len(), markers.len() - expected);
        prop_assert!(removed.iter().all(|task| task.marker.as_deref() == Some("m0")));
    }
}
