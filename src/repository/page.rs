//! Search filters and cursor pagination.
//!
//! Results are ordered by `(created_at, id)` descending. A page token encodes
//! the sort key of the last item returned; the next page starts strictly
//! after it, so records inserted between calls never shift or repeat items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{ImageId, ImageRecord};
use crate::error::RepositoryError;

/// Default number of records per page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Upper bound on the page size.
pub const MAX_PAGE_SIZE: usize = 100;

/// Criteria for [`ImageRepository::search`](super::ImageRepository::search).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// Only records belonging to this owner
    pub owner: Option<String>,

    /// Only featured records
    pub featured_only: bool,

    /// Include soft-deleted (not purged) records
    pub include_deleted: bool,

    /// Page size; defaults to [`DEFAULT_PAGE_SIZE`], capped at [`MAX_PAGE_SIZE`]
    pub limit: Option<usize>,
}

impl SearchFilters {
    pub fn owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Self::default()
        }
    }

    pub fn page_size(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub(crate) fn matches(&self, record: &ImageRecord) -> bool {
        if record.is_purged() {
            return false;
        }
        if !self.include_deleted && !record.is_active() {
            return false;
        }
        if self.featured_only && !record.featured {
            return false;
        }
        self.owner
            .as_deref()
            .map_or(true, |owner| record.owner_ref == owner)
    }
}

/// Position after which the next page starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageToken {
    pub created_at: DateTime<Utc>,
    pub id: ImageId,
}

impl PageToken {
    pub fn after(record: &ImageRecord) -> Self {
        Self {
            created_at: record.created_at,
            id: record.id,
        }
    }

    /// Opaque string form handed to clients.
    pub fn encode(&self) -> String {
        // Serializing two plain fields cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, RepositoryError> {
        let raw = hex::decode(token).map_err(|_| RepositoryError::InvalidPageToken)?;
        serde_json::from_slice(&raw).map_err(|_| RepositoryError::InvalidPageToken)
    }

    /// Whether `record` sorts strictly after this position (descending order).
    pub(crate) fn precedes(&self, record: &ImageRecord) -> bool {
        (record.created_at, record.id) < (self.created_at, self.id)
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<ImageRecord>,

    /// Token for the following page, `None` on the last page
    pub next_token: Option<String>,
}
