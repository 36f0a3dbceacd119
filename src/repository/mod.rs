//! Image repository.
//!
//! Durable image records independent of the scene cache. Each record owns
//! one [`ArtifactRef`](crate::store::ArtifactRef) and moves through
//! `Active → Deleted → Purged`; only the maintenance sweeper purges.

mod images;
mod owners;
mod page;
mod record;

pub use images::{ImageRepository, RepositoryStats};
pub use owners::{NoOwners, OwnerDirectory};
pub use page::{Page, PageToken, SearchFilters, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use record::{ImageId, ImageRecord, ImageState, RecordState};
