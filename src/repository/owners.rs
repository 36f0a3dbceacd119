use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

/// Answers whether the entity an image belongs to still exists.
///
/// The orphan sweep only purges soft-deleted records whose owner is gone.
#[async_trait]
pub trait OwnerDirectory: Send + Sync {
    async fn owner_exists(&self, owner_ref: &str) -> bool;
}

/// Directory with no owners: every soft-deleted record is orphaned.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOwners;

#[async_trait]
impl OwnerDirectory for NoOwners {
    async fn owner_exists(&self, _owner_ref: &str) -> bool {
        false
    }
}

/// Fixed set of live owners.
#[async_trait]
impl OwnerDirectory for HashSet<String> {
    async fn owner_exists(&self, owner_ref: &str) -> bool {
        self.contains(owner_ref)
    }
}

#[async_trait]
impl<D: OwnerDirectory + ?Sized> OwnerDirectory for Arc<D> {
    async fn owner_exists(&self, owner_ref: &str) -> bool {
        (**self).owner_exists(owner_ref).await
    }
}
