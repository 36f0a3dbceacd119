use thiserror::Error;

use crate::limit::EndpointClass;

/// Errors raised by the artifact store and the on-disk state files.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Filesystem error (disk full, permissions, missing directory)
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    /// Source bytes could not be decoded as an image
    #[error("Failed to decode image: {message}")]
    Decode { message: String },

    /// Image could not be encoded to the storage format
    #[error("Failed to encode image: {message}")]
    Encode { message: String },

    /// Referenced artifact file does not exist
    #[error("Artifact not found: {0}")]
    Missing(String),

    /// A state file exists but cannot be parsed
    #[error("Corrupt state file {path}: {message}")]
    Corrupt { path: String, message: String },

    /// Another process holds the storage root
    #[error("Storage root {path} is in use by another process")]
    Locked { path: String },
}

impl StorageError {
    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            return StorageError::Missing(path.display().to_string());
        }
        StorageError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors returned by an external generator.
#[derive(Debug, Clone, Error)]
pub enum GeneratorError {
    /// The upstream call failed (network, quota, provider error)
    #[error("Upstream generation failed: {0}")]
    Upstream(String),

    /// The upstream call succeeded but returned nothing
    #[error("Generator returned empty output")]
    EmptyOutput,

    /// The upstream call returned bytes that are not a readable image
    #[error("Generator returned unusable output: {0}")]
    Unusable(String),
}

/// Errors raised by the image repository.
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    /// No record with this id
    #[error("Image not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the record's current state
    #[error("Image {id} is {state}")]
    InvalidState { id: String, state: &'static str },

    /// Page token could not be decoded
    #[error("Invalid page token")]
    InvalidPageToken,

    /// Persisting the record table failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Outcome taxonomy surfaced to callers of the cache and repository.
///
/// `RateLimited` is a normal admission outcome rather than a fault; it is
/// carried here so request handlers can use `?` across the whole pipeline.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Admission denied by the rate limiter; back off and retry later
    #[error("Rate limited: client {client} exceeded {class} limit")]
    RateLimited { client: String, class: EndpointClass },

    /// Upstream generation failed; nothing was cached
    #[error("Generation failed: {0}")]
    GenerationFailed(#[from] GeneratorError),

    /// Disk I/O failed; the operation was aborted without partial artifacts
    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StorageError),

    /// Lookup by id or fingerprint found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation conflicts with the current state of the target
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller stopped waiting on an in-flight generation
    #[error("Timed out waiting for generation of {fingerprint}")]
    WaitTimedOut { fingerprint: String },
}

impl Error {
    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. } | Error::GenerationFailed(_) | Error::WaitTimedOut { .. }
        )
    }
}

impl From<RepositoryError> for Error {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Error::NotFound(id),
            RepositoryError::InvalidState { .. } | RepositoryError::InvalidPageToken => {
                Error::Conflict(err.to_string())
            }
            RepositoryError::Storage(e) => Error::StorageFailure(e),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
