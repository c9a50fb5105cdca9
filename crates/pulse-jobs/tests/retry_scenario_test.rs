//! Retry and exhaustion behaviour of the lifecycle engine.
//!
//! Runs on paused tokio time so the 2s/4s/8s backoff steps are observed
//! without real waiting.

mod common;

use std::time::Duration;

use tokio::time::Instant;

use common::{Fixture, FAILED, PENDING, PROCESSING};
use pulse_jobs::testing::{sample_job, StatusCall};
use pulse_jobs::{ConversionJob, LifecycleEngine, QueueNames, Settlement, Tick};

#[tokio::test(start_paused = true)]
async fn test_convert_failures_back_off_then_fail() {
    let fixture = Fixture::new().await;
    fixture
        .converter
        .fail_always("gotenberg returned status 500: LibreOffice crashed");
    let engine = LifecycleEngine::new(fixture.services(), QueueNames::default());

    let original = sample_job(42);
    fixture.enqueue(&original).await;
    let mut entry = engine
        .claim(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("job should be claimable");

    for (retry_count, delay_secs) in [(1u32, 2u64), (2, 4), (3, 8)] {
        let tick = engine.handle_entry("worker-0", &entry).await;
        assert_eq!(
            tick,
            Tick::Settled(Settlement::Retried {
                retry_count,
                delay: Duration::from_secs(delay_secs),
            })
        );
        assert!(fixture.list(PENDING).await.is_empty(), "retry pushed early");
        assert!(fixture.list(PROCESSING).await.is_empty());

        let waiting_since = Instant::now();
        entry = engine
            .claim(Duration::from_secs(60))
            .await
            .unwrap()
            .expect("retry should reach pending");
        assert!(waiting_since.elapsed() >= Duration::from_secs(delay_secs));

        let job = ConversionJob::decode(&entry).unwrap();
        let mut expected = original.clone();
        expected.retry_count = retry_count;
        assert_eq!(job, expected, "only retryCount may change between attempts");
    }

    let tick = engine.handle_entry("worker-0", &entry).await;
    assert_eq!(tick, Tick::Settled(Settlement::Failed));

    assert_eq!(fixture.list(FAILED).await, vec![entry.clone()]);
    assert!(fixture.list(PENDING).await.is_empty());
    assert!(fixture.list(PROCESSING).await.is_empty());

    let calls = fixture.status.calls_for(42);
    let increments = calls
        .iter()
        .filter(|c| **c == StatusCall::RetryIncremented)
        .count();
    assert_eq!(increments, 4);
    assert!(calls.contains(&StatusCall::Failed));
    assert!(calls.iter().any(|c| matches!(
        c,
        StatusCall::Error(msg) if msg.starts_with("conversion failed:") && msg.contains("500")
    )));
    assert_eq!(fixture.converter.calls(), 4);

    // Nothing else shows up later.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(fixture.list(PENDING).await.is_empty());
    assert_eq!(fixture.list(FAILED).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_transient_convert_failure() {
    let fixture = Fixture::new().await;
    fixture.converter.fail_times(1, "gotenberg request failed");
    let engine = LifecycleEngine::new(fixture.services(), QueueNames::default());
    fixture.enqueue(&sample_job(7)).await;

    let first = engine
        .run_once("worker-0", Duration::from_secs(1))
        .await
        .unwrap();
    assert!(matches!(
        first,
        Tick::Settled(Settlement::Retried { retry_count: 1, .. })
    ));

    let second = engine
        .run_once("worker-0", Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(second, Tick::Settled(Settlement::Completed));

    assert!(fixture.list(PENDING).await.is_empty());
    assert!(fixture.list(PROCESSING).await.is_empty());
    assert!(fixture.list(FAILED).await.is_empty());
    assert!(matches!(
        fixture.status.calls_for(7).last(),
        Some(StatusCall::Completed { .. })
    ));
}

#[tokio::test]
async fn test_zero_max_retries_fails_on_first_error() {
    let fixture = Fixture::new().await;
    fixture.converter.fail_always("unsupported format");
    let engine = LifecycleEngine::new(fixture.services(), QueueNames::default());

    let mut job = sample_job(11);
    job.max_retries = 0;
    let entry = fixture.enqueue(&job).await;

    let tick = engine
        .run_once("worker-0", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(tick, Tick::Settled(Settlement::Failed));
    assert_eq!(fixture.list(FAILED).await, vec![entry]);
    assert_eq!(engine.scheduler().outstanding(), 0);
}

#[tokio::test]
async fn test_concurrent_claims_take_one_entry_once() {
    let fixture = Fixture::new().await;
    let first = LifecycleEngine::new(fixture.services(), QueueNames::default());
    let second = LifecycleEngine::new(fixture.services(), QueueNames::default());
    fixture.enqueue(&sample_job(1)).await;

    let wait = Duration::from_millis(200);
    let (a, b) = tokio::join!(first.claim(wait), second.claim(wait));
    let claimed: Vec<String> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();

    assert_eq!(claimed.len(), 1);
    assert_eq!(fixture.list(PROCESSING).await, claimed);
    assert!(fixture.list(PENDING).await.is_empty());
}
