//! Generation cache integration tests.
//!
//! Tests verify:
//! - Concurrent identical requests collapse into one generator call
//! - TTL expiry and regeneration over simulated days
//! - Failures are never cached and reach every waiter
//! - Unrelated fingerprints do not wait on each other

use std::time::{Duration, Instant};

use scene_cache::{Error, GenerationParams, Variant};

use super::test_utils::{is_valid_jpeg, scene, Harness, MockGenerator};

// =============================================================================
// Single-flight
// =============================================================================

#[tokio::test]
async fn test_many_concurrent_misses_call_generator_once() {
    let harness =
        Harness::with_generator(MockGenerator::new().with_delay(Duration::from_millis(200))).await;
    let params = scene("the burning bridge");

    let mut handles = Vec::new();
    for _ in 0..50 {
        let cache = harness.cache.clone();
        let params = params.clone();
        handles.push(tokio::spawn(async move {
            cache.get_or_generate(&params).await.unwrap()
        }));
    }

    let mut lookups = Vec::new();
    for handle in handles {
        lookups.push(handle.await.unwrap());
    }

    assert_eq!(harness.generator.calls(), 1);
    assert!(lookups.iter().all(|l| l.artifact == lookups[0].artifact));
    assert_eq!(harness.cache.stats().await.generator_calls, 1);
}

#[tokio::test]
async fn test_two_simultaneous_requests_take_one_generation() {
    let harness =
        Harness::with_generator(MockGenerator::new().with_delay(Duration::from_secs(3))).await;
    let params = scene("fog over the moor");

    let started = Instant::now();
    let (a, b) = tokio::join!(
        harness.cache.get_or_generate(&params),
        harness.cache.get_or_generate(&params)
    );
    let elapsed = started.elapsed();

    assert_eq!(a.unwrap().artifact, b.unwrap().artifact);
    assert_eq!(harness.generator.calls(), 1);
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_different_fingerprints_generate_in_parallel() {
    let harness =
        Harness::with_generator(MockGenerator::new().with_delay(Duration::from_millis(500))).await;

    let (north, south, east) = (scene("north gate"), scene("south gate"), scene("east gate"));

    let started = Instant::now();
    let (a, b, c) = tokio::join!(
        harness.cache.get_or_generate(&north),
        harness.cache.get_or_generate(&south),
        harness.cache.get_or_generate(&east)
    );
    let elapsed = started.elapsed();

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(harness.generator.calls(), 3);
    assert!(elapsed < Duration::from_millis(1400), "took {:?}", elapsed);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failure_reaches_all_waiters_and_is_retried() {
    let generator = MockGenerator::new().with_delay(Duration::from_millis(100));
    generator.set_failing(true);
    let harness = Harness::with_generator(generator).await;
    let params = scene("a quiet shrine");

    let results: Vec<_> = spawn_requests(&harness, &params, 5).await;
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(Error::GenerationFailed(_)))));
    assert!(results.iter().all(|r| r.as_ref().unwrap_err().is_retryable()));
    assert_eq!(harness.generator.calls(), 1);
    assert!(harness.cache.entries().await.is_empty());

    harness.generator.set_failing(false);
    let lookup = harness.cache.get_or_generate(&params).await.unwrap();
    assert!(!lookup.was_hit);
    assert_eq!(harness.generator.calls(), 2);
}

async fn spawn_requests(
    harness: &Harness,
    params: &GenerationParams,
    n: usize,
) -> Vec<Result<scene_cache::CacheLookup, Error>> {
    let mut handles = Vec::new();
    for _ in 0..n {
        let cache = harness.cache.clone();
        let params = params.clone();
        handles.push(tokio::spawn(
            async move { cache.get_or_generate(&params).await },
        ));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

// =============================================================================
// Expiry
// =============================================================================

#[tokio::test]
async fn test_ttl_scenario_over_days() {
    let harness = Harness::new().await;
    let params = scene("lighthouse keeper");

    let day0 = harness.cache.get_or_generate(&params).await.unwrap();
    assert!(!day0.was_hit);

    harness.clock.advance(chrono::Duration::days(6));
    let day6 = harness.cache.get_or_generate(&params).await.unwrap();
    assert!(day6.was_hit);
    assert_eq!(day6.artifact, day0.artifact);

    harness.clock.advance(chrono::Duration::days(2));
    let day8 = harness.cache.get_or_generate(&params).await.unwrap();
    assert!(!day8.was_hit);
    assert_ne!(day8.artifact, day0.artifact);

    assert_eq!(harness.generator.calls(), 2);
    assert_eq!(harness.cache.entries().await.len(), 1);
}

// =============================================================================
// Stored output
// =============================================================================

#[tokio::test]
async fn test_cached_artifact_is_readable() {
    let harness = Harness::new().await;
    let lookup = harness
        .cache
        .get_or_generate(&scene("tavern interior"))
        .await
        .unwrap();

    let full = harness
        .store
        .retrieve(&lookup.artifact, Variant::Full)
        .await
        .unwrap();
    let thumb = harness
        .store
        .retrieve(&lookup.artifact, Variant::Thumbnail)
        .await
        .unwrap();

    assert!(is_valid_jpeg(&full));
    assert!(is_valid_jpeg(&thumb));
    assert_eq!(image::load_from_memory(&thumb).unwrap().width(), 256);
    assert!(harness.store.verify(&lookup.artifact).await.unwrap());
}

#[tokio::test]
async fn test_stats_track_hits_and_bytes() {
    let harness = Harness::new().await;
    let params = scene("market day");

    harness.cache.get_or_generate(&params).await.unwrap();
    harness.cache.get_or_generate(&params).await.unwrap();
    harness.cache.get_or_generate(&params).await.unwrap();

    let stats = harness.cache.stats().await;
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert!(stats.total_artifact_bytes > 0);

    let entry = harness.cache.peek(&params.fingerprint()).await.unwrap();
    assert_eq!(entry.hit_count, 2);
}

#[tokio::test]
async fn test_unusable_output_is_not_cached() {
    let generator =
        MockGenerator::new().with_output(bytes::Bytes::from_static(b"{\"error\":\"quota\"}"));
    let harness = Harness::with_generator(generator).await;

    let err = harness
        .cache
        .get_or_generate(&scene("empty canvas"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::GenerationFailed(_)));
    assert!(harness.cache.entries().await.is_empty());
    assert_eq!(harness.store.disk_usage().await.unwrap().full_files, 0);
}
