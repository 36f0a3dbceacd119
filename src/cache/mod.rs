//! Generation cache.
//!
//! Sits between cheap, repeatable scene requests and the slow, paid
//! external [`Generator`]. Results are keyed by
//! [`Fingerprint`](crate::fingerprint::Fingerprint), stored through the
//! [`ArtifactStore`](crate::store::ArtifactStore), and served until their
//! TTL lapses.
//!
//! # Components
//!
//! - [`GenerationCache`]: lookup, single-flight generation, eviction
//! - [`CacheEntry`]: one fingerprint → artifact row
//! - [`Generator`]: the external collaborator producing image bytes

mod entry;
mod generation;
mod generator;

pub use entry::{CacheEntry, CacheState};
pub use generation::{
    CacheLookup, CacheSettings, CacheStats, GenerationCache, DEFAULT_CACHE_TTL_DAYS,
};
pub use generator::{Generator, Offline};
