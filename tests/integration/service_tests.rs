//! Scene service integration tests.
//!
//! Tests verify:
//! - Rate limiting per client and endpoint class
//! - Rate-limited requests never reach the generator
//! - Saved images flow through the repository and search

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use scene_cache::{
    EndpointClass, Error, LimitPolicy, RateLimiter, RateLimits, SceneService, SearchFilters,
};

use super::test_utils::{jpeg_image, scene, Harness, MockGenerator};

fn service(harness: &Harness, limits: RateLimits) -> SceneService<MockGenerator> {
    SceneService::new(
        Arc::new(RateLimiter::new(limits)),
        harness.cache.clone(),
        harness.repository.clone(),
    )
}

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test]
async fn test_scene_requests_limited_per_client() {
    let harness = Harness::new().await;
    let service = service(&harness, RateLimits::default());
    let params = scene("crossroads");

    for _ in 0..5 {
        service.request_scene("client-a", &params).await.unwrap();
    }

    let denied = service.request_scene("client-a", &params).await.unwrap_err();
    assert!(matches!(
        denied,
        Error::RateLimited {
            class: EndpointClass::Scenes,
            ..
        }
    ));
    assert!(denied.is_retryable());

    // Another client has its own bucket
    assert!(service.request_scene("client-b", &params).await.is_ok());
    assert_eq!(harness.generator.calls(), 1);

    let stats = service.limiter().stats();
    assert_eq!(stats.allowed, 6);
    assert_eq!(stats.denied, 1);
}

#[tokio::test]
async fn test_denied_request_does_not_call_generator() {
    let harness = Harness::new().await;
    let limits = RateLimits {
        images: LimitPolicy::new(1, Duration::from_secs(60)),
        scenes: LimitPolicy::new(1, Duration::from_secs(60)),
    };
    let service = service(&harness, limits);

    service
        .request_scene("c", &scene("first"))
        .await
        .unwrap();
    let err = service
        .request_scene("c", &scene("second"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RateLimited { .. }));
    assert_eq!(harness.generator.calls(), 1);
}

#[tokio::test]
async fn test_classes_do_not_share_buckets() {
    let harness = Harness::new().await;
    let limits = RateLimits {
        images: LimitPolicy::new(2, Duration::from_secs(60)),
        scenes: LimitPolicy::new(1, Duration::from_secs(60)),
    };
    let service = service(&harness, limits);

    service.request_scene("c", &scene("x")).await.unwrap();
    assert!(service.request_scene("c", &scene("x")).await.is_err());

    service
        .save_image("c", "character:1", jpeg_image(40, 30))
        .await
        .unwrap();
    service
        .save_image("c", "character:1", jpeg_image(40, 30))
        .await
        .unwrap();
    let err = service
        .save_image("c", "character:1", jpeg_image(40, 30))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::RateLimited {
            class: EndpointClass::Images,
            ..
        }
    ));
}

#[tokio::test]
async fn test_limiter_refills_after_window() {
    let limiter = RateLimiter::new(RateLimits::default());
    let t0 = Instant::now();

    for _ in 0..10 {
        assert!(limiter.admit_at("c", EndpointClass::Images, t0).is_allowed());
    }
    assert!(!limiter.admit_at("c", EndpointClass::Images, t0).is_allowed());

    let later = t0 + Duration::from_secs(60);
    for _ in 0..10 {
        assert!(limiter
            .admit_at("c", EndpointClass::Images, later)
            .is_allowed());
    }
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test]
async fn test_timed_out_request_is_still_cached() {
    let harness =
        Harness::with_generator(MockGenerator::new().with_delay(Duration::from_millis(300))).await;
    let service = service(&harness, RateLimits::default());
    let params = scene("slow render");

    let err = service
        .request_scene_with_timeout("c", &params, Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WaitTimedOut { .. }));
    assert!(err.is_retryable());

    tokio::time::sleep(Duration::from_millis(600)).await;

    let lookup = service.request_scene("c", &params).await.unwrap();
    assert!(lookup.was_hit);
    assert_eq!(harness.generator.calls(), 1);
}

// =============================================================================
// Saved images
// =============================================================================

#[tokio::test]
async fn test_save_image_creates_searchable_record() {
    let harness = Harness::new().await;
    let service = service(&harness, RateLimits::default());

    let record = service
        .save_image("c", "item:sword", jpeg_image(120, 80))
        .await
        .unwrap();
    assert!(harness.store.exists(&record.artifact).await);

    let page = service
        .repository()
        .search(&SearchFilters::owner("item:sword"), None)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, record.id);

    service.repository().soft_delete(record.id).await.unwrap();
    let page = service
        .repository()
        .search(&SearchFilters::owner("item:sword"), None)
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert!(service.repository().get_by_id(record.id).await.is_ok());
}

#[tokio::test]
async fn test_save_undecodable_image_fails_cleanly() {
    let harness = Harness::new().await;
    let service = service(&harness, RateLimits::default());

    let err = service
        .save_image("c", "o", Bytes::from_static(b"definitely not an image"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StorageFailure(_)));

    let usage = harness.store.disk_usage().await.unwrap();
    assert_eq!(usage.full_files, 0);
    assert_eq!(usage.thumbnail_files, 0);
    assert_eq!(harness.repository.stats().await.active, 0);
}

#[tokio::test]
async fn test_service_stats_aggregate() {
    let harness = Harness::new().await;
    let service = service(&harness, RateLimits::default());

    service.request_scene("c", &scene("a")).await.unwrap();
    service.request_scene("c", &scene("a")).await.unwrap();
    service
        .save_image("c", "o", jpeg_image(20, 20))
        .await
        .unwrap();

    let stats = service.stats().await.unwrap();
    assert_eq!(stats.cache.entries, 1);
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.repository.active, 1);
    assert_eq!(stats.limiter.allowed, 3);
    assert_eq!(stats.disk.full_files, 2);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["cache"]["entries"], 1);
}
