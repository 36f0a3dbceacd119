use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::ArtifactRef;

/// Identifier of an [`ImageRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ImageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ImageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle of a record.
///
/// ```text
/// Active ──soft_delete──▶ Deleted ──sweep──▶ Purged
///    ▲                       │
///    └───────restore─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RecordState {
    Active,
    Deleted { at: DateTime<Utc> },
    Purged { at: DateTime<Utc> },
}

impl RecordState {
    pub fn name(&self) -> &'static str {
        match self {
            RecordState::Active => "active",
            RecordState::Deleted { .. } => "deleted",
            RecordState::Purged { .. } => "purged",
        }
    }
}

/// A durable image, independent of the scene cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: ImageId,

    /// Character, item or other owning entity
    pub owner_ref: String,

    pub artifact: ArtifactRef,
    pub featured: bool,
    pub state: RecordState,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn new(owner_ref: impl Into<String>, artifact: ArtifactRef, now: DateTime<Utc>) -> Self {
        Self {
            id: ImageId::new(),
            owner_ref: owner_ref.into(),
            artifact,
            featured: false,
            state: RecordState::Active,
            created_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == RecordState::Active
    }

    pub fn is_purged(&self) -> bool {
        matches!(self.state, RecordState::Purged { .. })
    }

    /// When the record was soft-deleted, if it currently is.
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            RecordState::Deleted { at } => Some(at),
            _ => None,
        }
    }
}

/// On-disk form of the record table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageState {
    pub records: Vec<ImageRecord>,
}
