use std::future::Future;

use crate::error::AppError;
use crate::models::{ExtractionResult, FetchedImage};
use crate::url_guard::ValidatedUrl;

/// One strategy for turning a URL into structured article content.
///
/// The pipeline depends only on this port; adapters shell out to an
/// automation process, drive an in-process browser, or fetch directly.
pub trait ExtractorPort: Send + Sync + Clone {
    fn extract(
        &self,
        url: &ValidatedUrl,
    ) -> impl Future<Output = Result<ExtractionResult, AppError>> + Send;
}

/// Key/value cache with no enforced expiry. Last write wins.
pub trait CacheStore<V>: Send + Sync + Clone {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<V>, AppError>> + Send;

    fn set(&self, key: &str, value: &V) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Downloads an image from its origin.
pub trait ImageFetcher: Send + Sync + Clone {
    fn fetch_image(
        &self,
        url: &ValidatedUrl,
    ) -> impl Future<Output = Result<FetchedImage, AppError>> + Send;
}

/// Shared counter backend for fixed-window rate limiting.
pub trait CounterBackend: Send + Sync + Clone {
    /// Atomically increment `key`, making it expire after `ttl_secs`, and
    /// return the new count.
    fn increment(&self, key: &str, ttl_secs: u64)
    -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// A counter backend that is never available, leaving the in-process
/// counter authoritative.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCounter;

impl CounterBackend for NullCounter {
    async fn increment(&self, _key: &str, _ttl_secs: u64) -> Result<u64, AppError> {
        Err(AppError::Generic("no distributed counter configured".to_string()))
    }
}
