use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::page::{Page, PageToken, SearchFilters};
use super::record::{ImageId, ImageRecord, ImageState, RecordState};
use crate::clock::{self, Clock};
use crate::error::RepositoryError;
use crate::persist::{StateFile, IMAGE_STATE_FILE};
use crate::store::{ArtifactRef, ArtifactStore, RootLock};

/// Record counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryStats {
    pub active: usize,
    pub deleted: usize,
    pub purged: usize,
    pub featured: usize,
}

/// Durable image records with soft delete and cursor search.
///
/// Every mutation writes a snapshot of the table before returning; a
/// mutation whose snapshot cannot be written is undone in memory. Purged
/// records stay in the table as tombstones so a late lookup can tell a purged
/// image from one that never existed, but they are invisible to every read.
pub struct ImageRepository {
    records: RwLock<HashMap<ImageId, ImageRecord>>,
    state: Option<StateFile<ImageState>>,
    clock: Arc<dyn Clock>,
    _lock: Option<Arc<RootLock>>,
}

impl ImageRepository {
    /// In-memory repository (nothing persisted).
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            state: None,
            clock,
            _lock: None,
        }
    }

    /// Open the repository persisted under `<store root>/state/images.json`.
    ///
    /// The repository shares the store's root lock, so the table is only
    /// ever written by the process that owns the root.
    pub async fn open(
        store: &ArtifactStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RepositoryError> {
        let state_file = StateFile::<ImageState>::in_root(store.root(), IMAGE_STATE_FILE);
        let state = state_file.load().await?;
        info!(
            records = state.records.len(),
            path = %state_file.path().display(),
            "loaded image table"
        );

        let records = state
            .records
            .into_iter()
            .map(|record| (record.id, record))
            .collect();

        Ok(Self {
            records: RwLock::new(records),
            state: Some(state_file),
            clock,
            _lock: Some(store.root_lock()),
        })
    }

    /// Open with the system clock.
    pub async fn open_default(store: &ArtifactStore) -> Result<Self, RepositoryError> {
        Self::open(store, clock::system()).await
    }

    /// Create an active, unfeatured record owning `artifact`.
    ///
    /// If the table cannot be saved the record is not kept.
    pub async fn create(
        &self,
        owner_ref: impl Into<String>,
        artifact: ArtifactRef,
    ) -> Result<ImageRecord, RepositoryError> {
        let record = ImageRecord::new(owner_ref, artifact, self.clock.now());
        self.records.write().await.insert(record.id, record.clone());

        if let Err(e) = self.persist().await {
            self.records.write().await.remove(&record.id);
            return Err(e);
        }

        debug!(id = %record.id, owner = %record.owner_ref, "created image record");
        Ok(record)
    }

    /// Look up a record. Soft-deleted records are returned; purged ones are
    /// `NotFound`.
    pub async fn get_by_id(&self, id: ImageId) -> Result<ImageRecord, RepositoryError> {
        let records = self.records.read().await;
        match records.get(&id) {
            Some(record) if !record.is_purged() => Ok(record.clone()),
            _ => Err(RepositoryError::NotFound(id.to_string())),
        }
    }

    /// Records matching `filters`, newest first, starting after `page_token`.
    pub async fn search(
        &self,
        filters: &SearchFilters,
        page_token: Option<&str>,
    ) -> Result<Page, RepositoryError> {
        let after = page_token.map(PageToken::decode).transpose()?;
        let page_size = filters.page_size();

        let mut matching: Vec<ImageRecord> = {
            let records = self.records.read().await;
            records
                .values()
                .filter(|record| filters.matches(record))
                .filter(|record| after.map_or(true, |token| token.precedes(record)))
                .cloned()
                .collect()
        };
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let has_more = matching.len() > page_size;
        matching.truncate(page_size);

        let next_token = if has_more {
            matching.last().map(|last| PageToken::after(last).encode())
        } else {
            None
        };

        Ok(Page {
            items: matching,
            next_token,
        })
    }

    /// Set the featured flag. Setting the current value is a no-op.
    pub async fn set_featured(
        &self,
        id: ImageId,
        featured: bool,
    ) -> Result<ImageRecord, RepositoryError> {
        let (record, _) = self
            .update(id, |record| {
                let changed = record.featured != featured;
                record.featured = featured;
                Ok(changed)
            })
            .await?;
        Ok(record)
    }

    /// Mark a record deleted. Deleting an already deleted record keeps its
    /// original deletion time.
    pub async fn soft_delete(&self, id: ImageId) -> Result<ImageRecord, RepositoryError> {
        let now = self.clock.now();
        let (record, changed) = self
            .update(id, |record| match record.state {
                RecordState::Active => {
                    record.state = RecordState::Deleted { at: now };
                    Ok(true)
                }
                _ => Ok(false),
            })
            .await?;

        if changed {
            info!(id = %id, "soft-deleted image");
        }
        Ok(record)
    }

    /// Reverse a soft delete.
    pub async fn restore(&self, id: ImageId) -> Result<ImageRecord, RepositoryError> {
        let (record, changed) = self
            .update(id, |record| match record.state {
                RecordState::Deleted { .. } => {
                    record.state = RecordState::Active;
                    Ok(true)
                }
                _ => Ok(false),
            })
            .await?;

        if changed {
            info!(id = %id, "restored image");
        }
        Ok(record)
    }

    /// Whether any non-purged record owns an artifact with this id.
    pub async fn references(&self, artifact: &ArtifactRef) -> bool {
        self.records
            .read()
            .await
            .values()
            .any(|record| !record.is_purged() && record.artifact.id == artifact.id)
    }

    /// Soft-deleted records whose deletion time is at or before `cutoff`.
    pub async fn purge_candidates(&self, cutoff: DateTime<Utc>) -> Vec<ImageRecord> {
        let mut candidates: Vec<ImageRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.deleted_at().is_some_and(|at| at <= cutoff))
            .cloned()
            .collect();
        candidates.sort_by_key(|record| record.deleted_at());
        candidates
    }

    /// Transition a deleted record to purged and save the table.
    ///
    /// Fails with `InvalidState` if the record was restored in the meantime;
    /// its artifact must then be left alone.
    pub async fn mark_purged(&self, id: ImageId) -> Result<ImageRecord, RepositoryError> {
        let now = self.clock.now();
        let (record, _) = self
            .update(id, |record| match record.state {
                RecordState::Deleted { .. } => {
                    record.state = RecordState::Purged { at: now };
                    Ok(true)
                }
                state => Err(RepositoryError::InvalidState {
                    id: id.to_string(),
                    state: state.name(),
                }),
            })
            .await?;
        Ok(record)
    }

    /// Snapshot of every row, tombstones included.
    pub async fn records(&self) -> Vec<ImageRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn stats(&self) -> RepositoryStats {
        let records = self.records.read().await;
        let mut stats = RepositoryStats::default();
        for record in records.values() {
            match record.state {
                RecordState::Active => stats.active += 1,
                RecordState::Deleted { .. } => stats.deleted += 1,
                RecordState::Purged { .. } => stats.purged += 1,
            }
            if record.featured && !record.is_purged() {
                stats.featured += 1;
            }
        }
        stats
    }

    /// Apply `f` to a non-purged record and save the table if it changed.
    ///
    /// If the save fails the record is put back as it was, unless another
    /// mutation has replaced it since.
    async fn update<F>(&self, id: ImageId, f: F) -> Result<(ImageRecord, bool), RepositoryError>
    where
        F: FnOnce(&mut ImageRecord) -> Result<bool, RepositoryError>,
    {
        let (previous, updated, changed) = {
            let mut records = self.records.write().await;
            let record = records
                .get_mut(&id)
                .filter(|record| !record.is_purged())
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

            let previous = record.clone();
            let changed = f(record)?;
            (previous, record.clone(), changed)
        };

        if !changed {
            return Ok((updated, false));
        }

        if let Err(e) = self.persist().await {
            let mut records = self.records.write().await;
            if let Some(current) = records.get_mut(&id) {
                if *current == updated {
                    *current = previous;
                }
            }
            warn!(id = %id, error = %e, "failed to save image table, change reverted");
            return Err(e);
        }
        Ok((updated, true))
    }

    async fn persist(&self) -> Result<(), RepositoryError> {
        let Some(state_file) = &self.state else {
            return Ok(());
        };

        state_file
            .save_with_async(|| async {
                let mut records: Vec<ImageRecord> =
                    self.records.read().await.values().cloned().collect();
                records.sort_by_key(|record| (record.created_at, record.id));
                ImageState { records }
            })
            .await?;
        Ok(())
    }
}
