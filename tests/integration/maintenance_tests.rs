//! Maintenance sweep integration tests.
//!
//! Tests verify:
//! - Expire sweep removes exactly the expired rows and their files
//! - Artifacts owned by image records survive the expire sweep
//! - Orphan sweep honours retention, owners and restores
//! - Per-item failures are counted and retried, never fatal
//! - Only the process owning the root can sweep it

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use scene_cache::{
    ArtifactStore, BackupRotation, NoOwners, OwnerDirectory, StorageError, StoreSettings,
    SweepJob, Sweeper, Variant,
};
use tokio::sync::watch;

use super::test_utils::{png_image, scene, Harness, MockGenerator};

fn sweeper(harness: &Harness, owners: Arc<dyn OwnerDirectory>) -> Sweeper<MockGenerator> {
    Sweeper::new(
        harness.cache.clone(),
        harness.repository.clone(),
        owners,
        harness.clock.clone(),
    )
}

// =============================================================================
// Expire cache
// =============================================================================

#[tokio::test]
async fn test_expire_removes_exactly_the_expired_entries() {
    let harness = Harness::new().await;

    let mut expired = Vec::new();
    for i in 0..5 {
        expired.push(
            harness
                .cache
                .get_or_generate(&scene(&format!("old scene {}", i)))
                .await
                .unwrap(),
        );
    }

    harness.clock.advance(Duration::days(5));
    let mut live = Vec::new();
    for i in 0..3 {
        live.push(
            harness
                .cache
                .get_or_generate(&scene(&format!("new scene {}", i)))
                .await
                .unwrap(),
        );
    }

    // First five are now 8 days old, the other three 3 days old
    harness.clock.advance(Duration::days(3));

    let report = sweeper(&harness, Arc::new(NoOwners))
        .expire_cache()
        .await
        .unwrap();

    assert_eq!(report.job, SweepJob::ExpireCache);
    assert_eq!(report.removed, 5);
    assert_eq!(report.artifacts_deleted, 5);
    assert_eq!(report.failed, 0);
    assert!(report.bytes_reclaimed > 0);

    assert_eq!(harness.cache.entries().await.len(), 3);
    for lookup in &expired {
        assert!(!harness.path(&lookup.artifact.full_path).exists());
        assert!(!harness.path(&lookup.artifact.thumbnail_path).exists());
    }
    for lookup in &live {
        assert!(harness.store.exists(&lookup.artifact).await);
    }
}

#[tokio::test]
async fn test_expire_keeps_artifacts_owned_by_records() {
    let harness = Harness::new().await;
    let lookup = harness
        .cache
        .get_or_generate(&scene("portrait of the baron"))
        .await
        .unwrap();
    harness
        .repository
        .create("character:baron", lookup.artifact.clone())
        .await
        .unwrap();

    harness.clock.advance(Duration::days(8));
    let report = sweeper(&harness, Arc::new(NoOwners))
        .expire_cache()
        .await
        .unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.artifacts_deleted, 0);
    assert!(harness.store.exists(&lookup.artifact).await);
}

#[tokio::test]
async fn test_expire_reclaims_replaced_artifacts() {
    let harness = Harness::new().await;
    let params = scene("ruined tower");

    let first = harness.cache.get_or_generate(&params).await.unwrap();
    harness.clock.advance(Duration::days(8));
    let second = harness.cache.get_or_generate(&params).await.unwrap();

    let report = sweeper(&harness, Arc::new(NoOwners))
        .expire_cache()
        .await
        .unwrap();

    assert_eq!(report.removed, 0);
    assert_eq!(report.artifacts_deleted, 1);
    assert!(!harness.store.exists(&first.artifact).await);
    assert!(harness.store.exists(&second.artifact).await);
}

#[tokio::test]
async fn test_expire_failure_is_counted_and_retried() {
    let harness = Harness::new().await;
    let lookup = harness
        .cache
        .get_or_generate(&scene("sealed vault"))
        .await
        .unwrap();

    // A directory where the file should be makes the delete fail
    let full = harness.path(&lookup.artifact.full_path);
    std::fs::remove_file(&full).unwrap();
    std::fs::create_dir_all(full.join("blocker")).unwrap();

    harness.clock.advance(Duration::days(8));
    let sweeper = sweeper(&harness, Arc::new(NoOwners));
    let report = sweeper.expire_cache().await.unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.failed, 1);
    assert!(!report.is_clean());
    assert_eq!(harness.cache.stats().await.retired_artifacts, 1);

    std::fs::remove_dir_all(&full).unwrap();
    let retry = sweeper.expire_cache().await.unwrap();
    assert_eq!(retry.failed, 0);
    assert_eq!(retry.artifacts_deleted, 1);
    assert!(!harness.path(&lookup.artifact.thumbnail_path).exists());
}

#[tokio::test]
async fn test_sweep_does_not_touch_entries_created_meanwhile() {
    let harness = Harness::new().await;
    harness
        .cache
        .get_or_generate(&scene("stale"))
        .await
        .unwrap();
    harness.clock.advance(Duration::days(8));

    let fresh = harness
        .cache
        .get_or_generate(&scene("fresh"))
        .await
        .unwrap();
    sweeper(&harness, Arc::new(NoOwners))
        .expire_cache()
        .await
        .unwrap();

    let hit = harness.cache.get_or_generate(&scene("fresh")).await.unwrap();
    assert!(hit.was_hit);
    assert_eq!(hit.artifact, fresh.artifact);
    assert!(harness.store.exists(&fresh.artifact).await);
}

// =============================================================================
// Reclaim orphans
// =============================================================================

#[tokio::test]
async fn test_orphans_purged_after_retention() {
    let harness = Harness::new().await;
    let artifact = harness.store.store(png_image(32, 32)).await.unwrap();
    let record = harness
        .repository
        .create("item:lantern", artifact.clone())
        .await
        .unwrap();
    harness.repository.soft_delete(record.id).await.unwrap();

    // Inside the retention window nothing happens
    harness.clock.advance(Duration::days(10));
    let sweeper = sweeper(&harness, Arc::new(NoOwners));
    let early = sweeper.reclaim_orphans().await.unwrap();
    assert_eq!(early.considered, 0);
    assert!(harness.store.exists(&artifact).await);

    harness.clock.advance(Duration::days(21));
    let report = sweeper.reclaim_orphans().await.unwrap();
    assert_eq!(report.job, SweepJob::ReclaimOrphans);
    assert_eq!(report.considered, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(report.artifacts_deleted, 1);

    assert!(!harness.store.exists(&artifact).await);
    assert!(harness.repository.get_by_id(record.id).await.is_err());
    assert_eq!(harness.repository.stats().await.purged, 1);
}

#[tokio::test]
async fn test_orphans_with_living_owner_are_kept() {
    let harness = Harness::new().await;
    let kept = harness
        .repository
        .create(
            "character:alive",
            harness.store.store(png_image(16, 16)).await.unwrap(),
        )
        .await
        .unwrap();
    let gone = harness
        .repository
        .create(
            "character:gone",
            harness.store.store(png_image(16, 16)).await.unwrap(),
        )
        .await
        .unwrap();
    harness.repository.soft_delete(kept.id).await.unwrap();
    harness.repository.soft_delete(gone.id).await.unwrap();
    harness.clock.advance(Duration::days(31));

    let owners: HashSet<String> = ["character:alive".to_string()].into_iter().collect();
    let report = sweeper(&harness, Arc::new(owners))
        .reclaim_orphans()
        .await
        .unwrap();

    assert_eq!(report.considered, 2);
    assert_eq!(report.removed, 1);
    assert_eq!(report.skipped, 1);
    assert!(harness.repository.get_by_id(kept.id).await.is_ok());
    assert!(harness.store.exists(&kept.artifact).await);
    assert!(!harness.store.exists(&gone.artifact).await);
}

#[tokio::test]
async fn test_restored_record_is_not_purged() {
    let harness = Harness::new().await;
    let record = harness
        .repository
        .create("o", harness.store.store(png_image(16, 16)).await.unwrap())
        .await
        .unwrap();
    harness.repository.soft_delete(record.id).await.unwrap();
    harness.clock.advance(Duration::days(40));
    harness.repository.restore(record.id).await.unwrap();

    let report = sweeper(&harness, Arc::new(NoOwners))
        .reclaim_orphans()
        .await
        .unwrap();

    assert_eq!(report.removed, 0);
    assert!(harness.store.exists(&record.artifact).await);
}

#[tokio::test]
async fn test_failed_purge_is_retried_on_next_sweep() {
    let harness = Harness::new().await;
    let artifact = harness.store.store(png_image(16, 16)).await.unwrap();
    let record = harness
        .repository
        .create("item:key", artifact.clone())
        .await
        .unwrap();
    harness.repository.soft_delete(record.id).await.unwrap();
    harness.clock.advance(Duration::days(31));

    // A directory in place of the table makes the purge save fail
    let table = harness.dir.path().join("state/images.json");
    std::fs::remove_file(&table).unwrap();
    std::fs::create_dir_all(table.join("blocker")).unwrap();

    let sweeper = sweeper(&harness, Arc::new(NoOwners));
    let first = sweeper.reclaim_orphans().await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.removed, 0);
    assert!(harness.repository.get_by_id(record.id).await.is_ok());
    assert!(harness.store.exists(&artifact).await);

    std::fs::remove_dir_all(&table).unwrap();
    let second = sweeper.reclaim_orphans().await.unwrap();
    assert_eq!(second.considered, 1);
    assert_eq!(second.removed, 1);
    assert_eq!(second.artifacts_deleted, 1);
    assert!(!harness.store.exists(&artifact).await);
}

#[tokio::test]
async fn test_run_all_reports_both_jobs() {
    let harness = Harness::new().await;
    harness
        .cache
        .get_or_generate(&scene("anything"))
        .await
        .unwrap();
    harness.clock.advance(Duration::days(8));

    let reports = sweeper(&harness, Arc::new(NoOwners))
        .with_orphan_retention(Duration::days(1))
        .run_all()
        .await
        .unwrap();

    let jobs: Vec<SweepJob> = reports.iter().map(|r| r.job).collect();
    assert_eq!(jobs, vec![SweepJob::ExpireCache, SweepJob::ReclaimOrphans]);
    assert_eq!(reports[0].removed, 1);
}

#[tokio::test]
async fn test_periodic_sweeps_run_until_shutdown() {
    let harness = Harness::new().await;
    let lookup = harness
        .cache
        .get_or_generate(&scene("dusty road"))
        .await
        .unwrap();
    harness.clock.advance(Duration::days(8));

    let sweeper = Arc::new(sweeper(&harness, Arc::new(NoOwners)));
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn({
        let sweeper = sweeper.clone();
        async move {
            sweeper
                .run_periodically(StdDuration::from_millis(20), shutdown)
                .await
        }
    });

    tokio::time::sleep(StdDuration::from_millis(100)).await;
    stop.send(true).unwrap();
    let passes = task.await.unwrap();

    assert!(passes >= 1);
    assert!(harness.cache.entries().await.is_empty());
    assert!(!harness.store.exists(&lookup.artifact).await);
}

// =============================================================================
// Root ownership
// =============================================================================

#[tokio::test]
async fn test_second_owner_cannot_sweep_a_held_root() {
    let harness = Harness::new().await;
    let artifact = harness.store.store(png_image(16, 16)).await.unwrap();
    let record = harness
        .repository
        .create("item:map", artifact.clone())
        .await
        .unwrap();
    harness.repository.soft_delete(record.id).await.unwrap();
    harness.clock.advance(Duration::days(31));

    // A maintenance run against the same root is refused
    let other = ArtifactStore::open(StoreSettings::new(harness.dir.path())).await;
    assert!(matches!(other, Err(StorageError::Locked { .. })));

    harness.repository.restore(record.id).await.unwrap();
    let report = sweeper(&harness, Arc::new(NoOwners))
        .reclaim_orphans()
        .await
        .unwrap();
    assert_eq!(report.considered, 0);
    assert!(harness.store.exists(&artifact).await);

    // Once released, the next owner sees the restored record
    let (dir, clock) = harness.close();
    let reopened = Harness::open_at(dir, MockGenerator::new(), clock).await;
    let report = sweeper(&reopened, Arc::new(NoOwners))
        .reclaim_orphans()
        .await
        .unwrap();

    assert_eq!(report.removed, 0);
    assert!(reopened
        .repository
        .get_by_id(record.id)
        .await
        .unwrap()
        .is_active());
    assert!(reopened.store.exists(&artifact).await);
}

// =============================================================================
// Backups
// =============================================================================

#[tokio::test]
async fn test_backup_contains_both_tables() {
    let harness = Harness::new().await;
    let lookup = harness
        .cache
        .get_or_generate(&scene("harbour"))
        .await
        .unwrap();
    harness
        .repository
        .create("o", harness.store.store(png_image(16, 16)).await.unwrap())
        .await
        .unwrap();

    let rotation = BackupRotation::new(harness.dir.path(), harness.clock.clone());
    let report = rotation.run().await.unwrap();
    assert_eq!(report.job, SweepJob::BackupRotation);

    let bundle = rotation.read(&report.latest.unwrap()).await.unwrap();
    let cache = bundle.cache.unwrap();
    assert_eq!(cache["entries"].as_array().unwrap().len(), 1);
    assert_eq!(
        cache["entries"][0]["fingerprint"],
        lookup.fingerprint.to_hex()
    );
    assert_eq!(bundle.images.unwrap()["records"].as_array().unwrap().len(), 1);

    // Artifacts themselves are not part of the snapshot
    assert!(harness
        .store
        .retrieve(&lookup.artifact, Variant::Full)
        .await
        .is_ok());
}
