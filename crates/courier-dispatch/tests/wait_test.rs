//! Integration tests for wait semantics.

use std::time::Duration;

use anyhow::Result;
use courier_core::{Payload, TransportError};
use courier_dispatch::{BackoffPolicy, DispatcherConfig};
use courier_testing::{settle, DeliveryScript, TestDispatcher};

#[tokio::test(start_paused = true)]
async fn wait_returns_true_with_nothing_submitted() -> Result<()> {
    let env = TestDispatcher::succeeding();
    assert!(env.dispatcher.wait(None).await);
    assert!(env.dispatcher.wait(Some(Duration::from_millis(5))).await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_waits_indefinitely() -> Result<()> {
    let env = TestDispatcher::succeeding();

    env.dispatcher.schedule_event(Payload::named("later", "{}"), Duration::from_secs(2))?;
    settle().await;

    assert!(env.dispatcher.wait(Some(Duration::ZERO)).await);
    assert_eq!(env.transport.total_attempts(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn wait_covers_the_whole_retry_cycle() -> Result<()> {
    let config = DispatcherConfig {
        max_retries: 4,
        backoff: BackoffPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_max: Duration::ZERO,
        },
        ..Default::default()
    };
    let env = TestDispatcher::builder()
        .config(config)
        .script(DeliveryScript::FailTimes { failures: 2, error: TransportError::timeout(30) })
        .build();

    env.dispatcher.dispatch(Payload::new("{}"))?;
    assert!(env.dispatcher.wait(None).await);

    assert_eq!(env.transport.total_attempts(), 3);
    assert_eq!(env.dispatcher.pending_count().await?, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timed_wait_expires_while_a_task_is_parked() -> Result<()> {
    let config = DispatcherConfig {
        max_retries: 1,
        backoff: BackoffPolicy {
            base_delay: Duration::from_secs(600),
            max_delay: Duration::from_secs(600),
            jitter_max: Duration::ZERO,
        },
        ..Default::default()
    };
    let env = TestDispatcher::builder()
        .config(config)
        .script(DeliveryScript::Fail(TransportError::connection("refused")))
        .build();

    env.dispatcher.dispatch(Payload::new("{}"))?;
    settle().await;

    // Parked in a ten-minute backoff; a one-second wait must give up.
    assert!(!env.dispatcher.wait(Some(Duration::from_secs(1))).await);
    assert_eq!(env.dispatcher.pending_count().await?, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn wait_observes_tasks_submitted_an_instant_earlier() -> Result<()> {
    let env = TestDispatcher::succeeding();
    env.transport.hold();

    env.dispatcher.dispatch(Payload::new("{}"))?;
    // No settle: the engine may not have seen the command yet, but wait must
    // already treat the task as active.
    assert!(!env.dispatcher.wait(Some(Duration::from_millis(10))).await);

    env.transport.release_all();
    assert!(env.dispatcher.wait(None).await);
    Ok(())
}
