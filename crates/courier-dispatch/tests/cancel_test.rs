//! Integration tests for cancellation semantics.

use std::time::Duration;

use anyhow::Result;
use courier_core::{Payload, Priority, TaskId, TransportError};
use courier_dispatch::{BackoffPolicy, DispatchOptions, DispatcherConfig};
use courier_testing::{settle, DeliveryScript, TestDispatcher};

#[tokio::test(start_paused = true)]
async fn cancelling_during_backoff_prevents_any_further_attempt() -> Result<()> {
    let config = DispatcherConfig {
        max_retries: 5,
        backoff: BackoffPolicy {
            base_delay: Duration::from_secs(3_600),
            max_delay: Duration::from_secs(7_200),
            jitter_max: Duration::ZERO,
        },
        ..Default::default()
    };
    let env = TestDispatcher::builder()
        .config(config)
        .script(DeliveryScript::Fail(TransportError::timeout(30)))
        .build();

    let id = env.dispatcher.dispatch(Payload::named("stuck", "{}"))?;
    settle().await;
    assert_eq!(env.transport.total_attempts(), 1);
    assert_eq!(env.events.retry_count(), 1);

    assert!(env.dispatcher.cancel_event(id).await?);
    assert_eq!(env.dispatcher.pending_count().await?, 0);

    // Long past the armed retry deadline; the cancelled timer must not act.
    tokio::time::sleep(Duration::from_secs(10_000)).await;
    assert_eq!(env.transport.total_attempts(), 1);
    assert_eq!(env.events.cancelled_count(), 1);
    assert_eq!(env.events.failed_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn marker_cancellation_crosses_priority_tiers() -> Result<()> {
    let env = TestDispatcher::succeeding();
    env.transport.hold();

    env.dispatcher.dispatch_with(
        Payload::named("a", "{}"),
        DispatchOptions::new().marker("m1").priority(Priority::Low),
    )?;
    env.dispatcher.dispatch_with(
        Payload::named("b", "{}"),
        DispatchOptions::new().marker("m1").priority(Priority::High),
    )?;
    env.dispatcher
        .dispatch_with(Payload::named("c", "{}"), DispatchOptions::new().marker("m2"))?;
    env.dispatcher.dispatch(Payload::named("d", "{}"))?;
    settle().await;

    assert_eq!(env.dispatcher.cancel_events_by_marker("m1").await?, 2);
    assert_eq!(env.dispatcher.pending_count().await?, 2);
    assert_eq!(env.dispatcher.cancel_events_by_marker("missing").await?, 0);

    assert_eq!(env.dispatcher.cancel_all_events().await?, 2);
    assert_eq!(env.dispatcher.pending_count().await?, 0);

    env.transport.release_all();
    settle().await;
    assert_eq!(env.events.cancelled_count(), 4);
    assert_eq!(env.events.completed_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancelling_unknown_ids_is_a_quiet_no_op() -> Result<()> {
    let env = TestDispatcher::succeeding();

    assert!(!env.dispatcher.cancel_event(TaskId::new()).await?);
    assert!(!env.dispatcher.cancel_scheduled_event(TaskId::new()).await?);
    assert_eq!(env.dispatcher.cancel_events_by_priority(Priority::Critical).await?, 0);
    assert_eq!(env.dispatcher.cancel_events_by_marker("nothing").await?, 0);
    assert_eq!(env.dispatcher.cancel_all_events().await?, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn in_flight_result_is_discarded_after_cancellation() -> Result<()> {
    let env = TestDispatcher::succeeding();
    env.transport.hold();

    let id = env.dispatcher.dispatch(Payload::named("doomed", "{}"))?;
    settle().await;
    assert_eq!(env.dispatcher.stats().await?.in_flight, 1);

    assert!(env.dispatcher.cancel_event(id).await?);

    // The transport still reports success for the attempt already underway;
    // the engine must throw that report away.
    env.transport.release_all();
    assert!(env.dispatcher.wait(None).await);
    settle().await;

    assert_eq!(env.events.completed_count(), 0);
    assert_eq!(env.events.cancelled_count(), 1);
    let stats = env.dispatcher.stats().await?;
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.active, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn priority_cancellation_spares_other_tiers() -> Result<()> {
    let env = TestDispatcher::succeeding();
    env.transport.hold();

    env.dispatcher.dispatch_batch(
        vec![Payload::new("a"), Payload::new("b")],
        Priority::Low,
    )?;
    env.dispatcher
        .dispatch_with(Payload::new("c"), DispatchOptions::new().priority(Priority::High))?;
    settle().await;

    assert_eq!(env.dispatcher.cancel_events_by_priority(Priority::Low).await?, 2);
    assert_eq!(env.dispatcher.pending_count_by_priority(Priority::Low).await?, 0);
    assert_eq!(env.dispatcher.pending_count_by_priority(Priority::High).await?, 1);

    env.transport.release_all();
    assert!(env.dispatcher.wait(None).await);
    assert_eq!(env.events.completed_count(), 1);
    Ok(())
}
