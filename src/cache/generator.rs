use async_trait::async_trait;
use bytes::Bytes;

use crate::error::GeneratorError;
use crate::fingerprint::GenerationParams;

/// External image generator.
///
/// Called at most once per fingerprint at a time; the cache never retries a
/// failed call on its own.
#[async_trait]
pub trait Generator: Send + Sync + 'static {
    /// Produce encoded image bytes (any format the store can decode).
    async fn generate(&self, params: &GenerationParams) -> Result<Bytes, GeneratorError>;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for std::sync::Arc<G> {
    async fn generate(&self, params: &GenerationParams) -> Result<Bytes, GeneratorError> {
        (**self).generate(params).await
    }
}

/// Generator for processes that only maintain the cache (sweeps, stats).
/// Every call fails, so a miss is reported rather than filled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Offline;

#[async_trait]
impl Generator for Offline {
    async fn generate(&self, _params: &GenerationParams) -> Result<Bytes, GeneratorError> {
        Err(GeneratorError::Upstream(
            "no generator configured in this process".to_string(),
        ))
    }
}
