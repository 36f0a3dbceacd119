//! Generation cache with single-flight coordination.
//!
//! ```text
//! get_or_generate(params)
//!   │
//!   ├─ 1. fingerprint(params)
//!   ├─ 2. fresh entry?  ──────────────────────────────▶ (artifact, hit)
//!   ├─ 3. in-flight for fingerprint? ── subscribe ──┐
//!   └─ 4. lead: spawn generate → store → insert row │
//!                    │                              │
//!                    └──── publish result ──────────┴─▶ (artifact, miss)
//! ```
//!
//! The generation runs in its own task. A caller that stops waiting (timeout,
//! dropped request) never cancels it; the result is still cached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::Duration;
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clock::{self, Clock};
use crate::error::{Error, GeneratorError, StorageError};
use crate::fingerprint::{Fingerprint, GenerationParams};
use crate::persist::{StateFile, CACHE_STATE_FILE};
use crate::store::{ArtifactRef, ArtifactStore};

use super::entry::{CacheEntry, CacheState};
use super::generator::Generator;

/// Default time-to-live of a cache entry: 7 days.
pub const DEFAULT_CACHE_TTL_DAYS: i64 = 7;

type FlightResult = Result<ArtifactRef, Error>;
type FlightReceiver = watch::Receiver<Option<FlightResult>>;

// =============================================================================
// Settings, results and statistics
// =============================================================================

/// Cache configuration.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// How long an entry is served after its generation completed
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::days(DEFAULT_CACHE_TTL_DAYS),
        }
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup {
    pub fingerprint: Fingerprint,
    pub artifact: ArtifactRef,

    /// Whether the result came from an existing entry
    pub was_hit: bool,
}

/// Cache counters and totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub expired_entries: usize,
    pub retired_artifacts: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub generator_calls: u64,
    pub generator_failures: u64,

    /// Bytes held by entry and retired artifacts
    pub total_artifact_bytes: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    generator_calls: AtomicU64,
    generator_failures: AtomicU64,
}

// =============================================================================
// Generation Cache
// =============================================================================

/// Maps fingerprints to stored artifacts and collapses concurrent misses for
/// the same fingerprint into one generator call.
///
/// Cloning is cheap; clones share the same table.
pub struct GenerationCache<G: Generator> {
    inner: Arc<Inner<G>>,
}

impl<G: Generator> Clone for GenerationCache<G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<G> {
    generator: G,
    store: Arc<ArtifactStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,

    /// At most one entry per fingerprint
    entries: RwLock<HashMap<Fingerprint, Row>>,

    /// Artifacts whose rows are gone, waiting for the expire sweep
    retired: Mutex<Vec<ArtifactRef>>,

    /// One slot per fingerprint being generated. The map lock is only held
    /// to look up or insert a slot, never across the generator call.
    in_flight: Mutex<HashMap<Fingerprint, FlightReceiver>>,

    state: Option<StateFile<CacheState>>,
    counters: Counters,
}

enum Slot {
    Hit(ArtifactRef),
    Wait(FlightReceiver),
}

/// A table row. Hits are counted atomically so lookups only need the table's
/// read lock.
struct Row {
    entry: CacheEntry,
    hits: AtomicU64,
}

impl Row {
    fn new(entry: CacheEntry) -> Self {
        Self {
            hits: AtomicU64::new(entry.hit_count),
            entry,
        }
    }

    fn snapshot(&self) -> CacheEntry {
        CacheEntry {
            hit_count: self.hits.load(Ordering::Relaxed),
            ..self.entry.clone()
        }
    }
}

impl<G: Generator> GenerationCache<G> {
    /// Create an in-memory cache (nothing persisted) using the system clock.
    pub fn new(generator: G, store: Arc<ArtifactStore>, settings: CacheSettings) -> Self {
        Self::build(
            generator,
            store,
            settings,
            clock::system(),
            None,
            CacheState::default(),
        )
    }

    /// Create an in-memory cache driven by `clock`.
    pub fn with_clock(
        generator: G,
        store: Arc<ArtifactStore>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::build(
            generator,
            store,
            settings,
            clock,
            None,
            CacheState::default(),
        )
    }

    /// Open a cache persisted under `<store root>/state/cache.json`.
    pub async fn open(
        generator: G,
        store: Arc<ArtifactStore>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let state_file = StateFile::<CacheState>::in_root(store.root(), CACHE_STATE_FILE);
        let state = state_file.load().await?;
        info!(
            entries = state.entries.len(),
            retired = state.retired.len(),
            path = %state_file.path().display(),
            "loaded cache table"
        );
        Ok(Self::build(
            generator,
            store,
            settings,
            clock,
            Some(state_file),
            state,
        ))
    }

    fn build(
        generator: G,
        store: Arc<ArtifactStore>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
        state_file: Option<StateFile<CacheState>>,
        state: CacheState,
    ) -> Self {
        let entries = state
            .entries
            .into_iter()
            .map(|entry| (entry.fingerprint, Row::new(entry)))
            .collect();

        Self {
            inner: Arc::new(Inner {
                generator,
                store,
                clock,
                ttl: settings.ttl,
                entries: RwLock::new(entries),
                retired: Mutex::new(state.retired),
                in_flight: Mutex::new(HashMap::new()),
                state: state_file,
                counters: Counters::default(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.inner.store
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Return the cached artifact for `params`, generating it on a miss.
    ///
    /// Concurrent callers with the same fingerprint share a single generator
    /// call and all receive the same artifact.
    ///
    /// # Errors
    ///
    /// - `GenerationFailed` if the generator failed; nothing is cached and
    ///   the next call retries
    /// - `StorageFailure` if the generated image could not be written
    pub async fn get_or_generate(&self, params: &GenerationParams) -> Result<CacheLookup, Error> {
        let fingerprint = params.fingerprint();

        if let Some(artifact) = self.lookup_fresh(&fingerprint).await {
            return Ok(self.hit(fingerprint, artifact));
        }

        let rx = match self.join_or_lead(fingerprint, params).await {
            Slot::Hit(artifact) => return Ok(self.hit(fingerprint, artifact)),
            Slot::Wait(rx) => rx,
        };

        let artifact = wait_for_flight(rx).await?;
        Ok(CacheLookup {
            fingerprint,
            artifact,
            was_hit: false,
        })
    }

    /// Like [`get_or_generate`](Self::get_or_generate), giving up after `wait`.
    ///
    /// On timeout the generation keeps running and its result is cached.
    pub async fn get_or_generate_with_timeout(
        &self,
        params: &GenerationParams,
        wait: StdDuration,
    ) -> Result<CacheLookup, Error> {
        match tokio::time::timeout(wait, self.get_or_generate(params)).await {
            Ok(result) => result,
            Err(_) => {
                let fingerprint = params.fingerprint();
                debug!(fingerprint = %fingerprint.short(), "caller timed out waiting for generation");
                Err(Error::WaitTimedOut {
                    fingerprint: fingerprint.to_hex(),
                })
            }
        }
    }

    /// Fetch an entry without counting a hit (expired entries included).
    pub async fn peek(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.inner
            .entries
            .read()
            .await
            .get(fingerprint)
            .map(Row::snapshot)
    }

    /// Snapshot of all entries.
    pub async fn entries(&self) -> Vec<CacheEntry> {
        self.inner
            .entries
            .read()
            .await
            .values()
            .map(Row::snapshot)
            .collect()
    }

    /// Remove every entry. In-flight generations are not cancelled and
    /// insert their entry when they complete.
    ///
    /// Returns the number of entries removed.
    pub async fn clear(&self) -> Result<usize, StorageError> {
        let removed: Vec<ArtifactRef> = {
            let mut entries = self.inner.entries.write().await;
            entries.drain().map(|(_, row)| row.entry.artifact).collect()
        };
        let count = removed.len();

        self.inner.retired.lock().await.extend(removed);
        self.inner.persist().await?;

        info!(removed = count, "cleared generation cache");
        Ok(count)
    }

    /// Remove rows whose `expires_at` has passed and return them.
    ///
    /// The caller owns the returned artifacts and is responsible for deleting
    /// them (after this call, never before).
    pub async fn evict_expired(&self) -> Result<Vec<CacheEntry>, StorageError> {
        let now = self.inner.clock.now();
        let expired: Vec<CacheEntry> = {
            let mut entries = self.inner.entries.write().await;
            let keys: Vec<Fingerprint> = entries
                .values()
                .filter(|row| row.entry.is_expired(now))
                .map(|row| row.entry.fingerprint)
                .collect();
            keys.iter()
                .filter_map(|key| entries.remove(key))
                .map(|row| row.snapshot())
                .collect()
        };

        if !expired.is_empty() {
            self.inner.persist().await?;
        }
        Ok(expired)
    }

    /// Take ownership of all retired artifacts.
    pub async fn take_retired(&self) -> Result<Vec<ArtifactRef>, StorageError> {
        let retired = std::mem::take(&mut *self.inner.retired.lock().await);
        if !retired.is_empty() {
            self.inner.persist().await?;
        }
        Ok(retired)
    }

    /// Hand artifacts back for a later sweep (e.g. after a failed delete).
    pub async fn retire(&self, artifacts: Vec<ArtifactRef>) -> Result<(), StorageError> {
        if artifacts.is_empty() {
            return Ok(());
        }
        self.inner.retired.lock().await.extend(artifacts);
        self.inner.persist().await
    }

    /// Persist the table (including hit counts).
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.inner.persist().await
    }

    pub async fn stats(&self) -> CacheStats {
        let now = self.inner.clock.now();
        let (entries, expired_entries, entry_bytes) = {
            let entries = self.inner.entries.read().await;
            let expired = entries.values().filter(|r| r.entry.is_expired(now)).count();
            let bytes: u64 = entries.values().map(|r| r.entry.artifact.size_bytes).sum();
            (entries.len(), expired, bytes)
        };
        let (retired_artifacts, retired_bytes) = {
            let retired = self.inner.retired.lock().await;
            (retired.len(), retired.iter().map(|a| a.size_bytes).sum::<u64>())
        };
        let in_flight = self.inner.in_flight.lock().await.len();

        let counters = &self.inner.counters;
        CacheStats {
            entries,
            expired_entries,
            retired_artifacts,
            in_flight,
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            generator_calls: counters.generator_calls.load(Ordering::Relaxed),
            generator_failures: counters.generator_failures.load(Ordering::Relaxed),
            total_artifact_bytes: entry_bytes + retired_bytes,
        }
    }

    fn hit(&self, fingerprint: Fingerprint, artifact: ArtifactRef) -> CacheLookup {
        self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
        debug!(fingerprint = %fingerprint.short(), "cache hit");
        CacheLookup {
            fingerprint,
            artifact,
            was_hit: true,
        }
    }

    /// Return the artifact of a live entry, counting the hit on the row.
    ///
    /// An entry whose files have vanished from disk is dropped and treated as
    /// a miss.
    async fn lookup_fresh(&self, fingerprint: &Fingerprint) -> Option<ArtifactRef> {
        let artifact = self.inner.fresh_hit(fingerprint).await?;

        if self.inner.store.exists(&artifact).await {
            return Some(artifact);
        }

        warn!(
            fingerprint = %fingerprint.short(),
            artifact = %artifact.id,
            "cached artifact missing on disk, regenerating"
        );
        {
            let mut entries = self.inner.entries.write().await;
            if entries
                .get(fingerprint)
                .is_some_and(|row| row.entry.artifact.id == artifact.id)
            {
                entries.remove(fingerprint);
            }
        }
        // Remaining half of the pair, if any
        self.inner.retired.lock().await.push(artifact);
        None
    }

    async fn join_or_lead(&self, fingerprint: Fingerprint, params: &GenerationParams) -> Slot {
        let mut in_flight = self.inner.in_flight.lock().await;

        if let Some(rx) = in_flight.get(&fingerprint) {
            debug!(fingerprint = %fingerprint.short(), "joining in-flight generation");
            return Slot::Wait(rx.clone());
        }

        // A flight may have finished between the first lookup and taking the
        // map lock; the leader inserts its row before leaving the map.
        if let Some(artifact) = self.inner.fresh_hit(&fingerprint).await {
            return Slot::Hit(artifact);
        }

        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        in_flight.insert(fingerprint, rx.clone());
        drop(in_flight);

        let inner = self.inner.clone();
        let params = params.clone();
        tokio::spawn(async move {
            let work = tokio::spawn({
                let inner = inner.clone();
                async move { inner.generate_and_store(fingerprint, params).await }
            });

            let result = match work.await {
                Ok(result) => result,
                Err(join_err) => Err(Error::GenerationFailed(GeneratorError::Upstream(
                    format!("generation task failed: {}", join_err),
                ))),
            };

            inner.in_flight.lock().await.remove(&fingerprint);
            let _ = tx.send(Some(result));
        });

        Slot::Wait(rx)
    }
}

impl<G: Generator> Inner<G> {
    async fn fresh_hit(&self, fingerprint: &Fingerprint) -> Option<ArtifactRef> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        let row = entries.get(fingerprint)?;
        if row.entry.is_expired(now) {
            // Left in place for the expire sweep
            return None;
        }
        row.hits.fetch_add(1, Ordering::Relaxed);
        Some(row.entry.artifact.clone())
    }

    async fn generate_and_store(
        &self,
        fingerprint: Fingerprint,
        params: GenerationParams,
    ) -> FlightResult {
        self.counters.generator_calls.fetch_add(1, Ordering::Relaxed);
        info!(fingerprint = %fingerprint.short(), "cache miss, calling generator");
        let started = Instant::now();

        let generated = self.generator.generate(&params).await.and_then(|bytes| {
            if bytes.is_empty() {
                Err(GeneratorError::EmptyOutput)
            } else {
                Ok(bytes)
            }
        });
        let bytes = match generated {
            Ok(bytes) => bytes,
            Err(e) => {
                self.counters.generator_failures.fetch_add(1, Ordering::Relaxed);
                warn!(fingerprint = %fingerprint.short(), error = %e, "generation failed");
                return Err(Error::GenerationFailed(e));
            }
        };

        let artifact = match self.store.store(bytes).await {
            Ok(artifact) => artifact,
            Err(StorageError::Decode { message }) => {
                self.counters.generator_failures.fetch_add(1, Ordering::Relaxed);
                warn!(fingerprint = %fingerprint.short(), error = %message, "generator output unusable");
                return Err(Error::GenerationFailed(GeneratorError::Unusable(message)));
            }
            Err(e) => return Err(Error::StorageFailure(e)),
        };

        let now = self.clock.now();
        let entry = CacheEntry::new(fingerprint, artifact.clone(), now, now + self.ttl);
        let replaced = self.entries.write().await.insert(fingerprint, Row::new(entry));
        if let Some(old) = replaced {
            self.retired.lock().await.push(old.entry.artifact);
        }

        // The in-memory table is authoritative; a failed save is retried by
        // the next mutation or flush.
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist cache table");
        }

        info!(
            fingerprint = %fingerprint.short(),
            artifact = %artifact.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated and cached"
        );
        Ok(artifact)
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let Some(state_file) = &self.state else {
            return Ok(());
        };

        state_file
            .save_with_async(|| async {
                let entries = self
                    .entries
                    .read()
                    .await
                    .values()
                    .map(Row::snapshot)
                    .collect();
                let retired = self.retired.lock().await.clone();
                CacheState { entries, retired }
            })
            .await
    }
}

async fn wait_for_flight(mut rx: FlightReceiver) -> FlightResult {
    match rx.wait_for(Option::is_some).await {
        Ok(result) => match &*result {
            Some(result) => result.clone(),
            None => unreachable_flight(),
        },
        Err(_) => unreachable_flight(),
    }
}

// The sender always publishes before it is dropped; reaching this means the
// runtime shut down mid-flight.
fn unreachable_flight() -> FlightResult {
    Err(Error::GenerationFailed(GeneratorError::Upstream(
        "generation was abandoned".to_string(),
    )))
}

// =============================================================================
// Tests
// =============================================================================
