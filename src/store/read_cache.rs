//! In-memory cache of recently read artifact bytes.
//!
//! Thumbnails in particular are read far more often than they are written.
//! This LRU sits in front of the filesystem and evicts by total byte size.
//! Entries are invalidated when the artifact is deleted; artifacts are never
//! rewritten in place, so no other invalidation is needed.
//!
//! Every invalidation bumps an epoch. A reader records the epoch before it
//! touches the disk and inserts with [`ReadCache::put_if_current`], so bytes
//! read before a concurrent delete never land in the cache after it.

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::artifact::Variant;

/// Default read cache capacity: 64MB
pub const DEFAULT_READ_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// Maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 10_000;

type ReadKey = (Uuid, Variant);

struct Inner {
    entries: LruCache<ReadKey, Bytes>,
    current_size: usize,
    epoch: u64,
}

/// LRU cache for artifact bytes with size-based capacity.
pub struct ReadCache {
    inner: Mutex<Inner>,
    max_size: usize,
}

impl ReadCache {
    /// Create a new read cache with the specified capacity in bytes.
    ///
    /// A capacity of zero disables caching.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                current_size: 0,
                epoch: 0,
            }),
            max_size,
        }
    }

    /// Get cached bytes, marking the entry as recently used.
    pub async fn get(&self, id: Uuid, variant: Variant) -> Option<Bytes> {
        let mut inner = self.inner.lock().await;
        inner.entries.get(&(id, variant)).cloned()
    }

    /// Store bytes, evicting least-recently-used entries while over capacity.
    ///
    /// Items larger than the whole cache are not stored.
    pub async fn put(&self, id: Uuid, variant: Variant, data: Bytes) {
        if data.len() > self.max_size {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.insert(self.max_size, (id, variant), data);
    }

    /// Like [`put`](Self::put), unless an invalidation happened since `epoch`
    /// was read. Returns whether the bytes were cached.
    pub async fn put_if_current(
        &self,
        id: Uuid,
        variant: Variant,
        data: Bytes,
        epoch: u64,
    ) -> bool {
        if data.len() > self.max_size {
            return false;
        }
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            return false;
        }
        inner.insert(self.max_size, (id, variant), data);
        true
    }

    /// Current invalidation epoch.
    pub async fn epoch(&self) -> u64 {
        self.inner.lock().await.epoch
    }

    /// Drop both variants of an artifact.
    pub async fn invalidate(&self, id: Uuid) {
        let mut inner = self.inner.lock().await;
        inner.epoch += 1;
        for variant in [Variant::Full, Variant::Thumbnail] {
            if let Some(data) = inner.entries.pop(&(id, variant)) {
                inner.current_size = inner.current_size.saturating_sub(data.len());
            }
        }
    }

    /// Current total size of cached bytes.
    pub async fn size(&self) -> usize {
        self.inner.lock().await.current_size
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Inner {
    fn insert(&mut self, max_size: usize, key: ReadKey, data: Bytes) {
        let data_size = data.len();
        if let Some(old) = self.entries.put(key, data) {
            self.current_size = self.current_size.saturating_sub(old.len());
        }
        self.current_size += data_size;

        while self.current_size > max_size || self.entries.len() > DEFAULT_MAX_ENTRIES {
            match self.entries.pop_lru() {
                Some((_, evicted)) => {
                    self.current_size = self.current_size.saturating_sub(evicted.len());
                }
                None => break,
            }
        }
    }
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_READ_CACHE_CAPACITY)
    }
}
