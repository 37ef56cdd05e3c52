//! Caching proxy for hot-linked remote images.
//!
//! Callers are expected to gate requests through the
//! [`RateLimiter`](crate::rate_limit::RateLimiter) first; the proxy itself
//! does not limit.

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::error::AppError;
use crate::models::{CachedImage, FetchedImage, ImageFailure, ProxiedImage};
use crate::traits::{CacheStore, ImageFetcher};
use crate::url_guard::{UrlValidator, ValidatedUrl};

/// `cache-control` applied when the origin sends none.
pub const DEFAULT_IMAGE_CACHE_CONTROL: &str = "public, max-age=86400, stale-while-revalidate=604800";

pub struct ImageProxy<F, C>
where
    F: ImageFetcher,
    C: CacheStore<CachedImage>,
{
    fetcher: F,
    cache: C,
    validator: UrlValidator,
    max_bytes: usize,
    breaker: Option<(CircuitBreakerRegistry, CircuitBreakerConfig)>,
}

impl<F, C> ImageProxy<F, C>
where
    F: ImageFetcher,
    C: CacheStore<CachedImage>,
{
    pub fn new(fetcher: F, cache: C, validator: UrlValidator, max_bytes: usize) -> Self {
        Self {
            fetcher,
            cache,
            validator,
            max_bytes,
            breaker: None,
        }
    }

    /// Track failures per origin host and stop calling hosts whose circuit is open.
    pub fn with_breaker(
        mut self,
        registry: CircuitBreakerRegistry,
        config: CircuitBreakerConfig,
    ) -> Self {
        self.breaker = Some((registry, config));
        self
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Serve `raw_url` from cache, or fetch, check and cache it.
    ///
    /// Every failure, including validation, comes back as an [`ImageFailure`]
    /// carrying the HTTP status the caller should answer with.
    pub async fn fetch_image(&self, raw_url: &str) -> Result<ProxiedImage, ImageFailure> {
        let url = self
            .validator
            .validate(raw_url)
            .await
            .map_err(|e| failure(&e))?;
        let key = url.as_str();

        match self.cache.get(key).await {
            Ok(Some(hit)) => {
                tracing::debug!(%url, bytes = hit.bytes.len(), "Image cache hit");
                return Ok(ProxiedImage {
                    body: hit.bytes,
                    content_type: hit.content_type,
                    cache_control: hit.cache_control,
                    cache_hit: true,
                });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(%url, error = %e, "Image cache read failed, treating as miss"),
        }

        let fetched = self.fetch_origin(&url).await.map_err(|e| {
            tracing::warn!(%url, error = %e, kind = e.kind(), "Image fetch failed");
            failure(&e)
        })?;

        let entry = CachedImage {
            bytes: fetched.bytes,
            content_type: fetched.content_type,
            cache_control: fetched
                .cache_control
                .filter(|cc| is_cacheable(cc))
                .unwrap_or_else(|| DEFAULT_IMAGE_CACHE_CONTROL.to_string()),
        };

        if let Err(e) = self.cache.set(key, &entry).await {
            tracing::warn!(%url, error = %e, "Image cache write failed");
        }

        tracing::info!(%url, bytes = entry.bytes.len(), content_type = %entry.content_type, "Image fetched from origin");
        Ok(ProxiedImage {
            body: entry.bytes,
            content_type: entry.content_type,
            cache_control: entry.cache_control,
            cache_hit: false,
        })
    }

    async fn fetch_origin(&self, url: &ValidatedUrl) -> Result<FetchedImage, AppError> {
        let fetched = match &self.breaker {
            Some((registry, config)) => registry
                .call(url.host(), config, || self.fetcher.fetch_image(url))
                .await
                .map_err(AppError::from)?,
            None => self.fetcher.fetch_image(url).await?,
        };

        let content_type = essence(&fetched.content_type);
        if !is_allowed_image_type(&content_type) {
            return Err(AppError::UnsupportedContentType(content_type));
        }
        if fetched.bytes.len() > self.max_bytes {
            return Err(AppError::PayloadTooLarge(fetched.bytes.len()));
        }

        Ok(FetchedImage {
            content_type,
            ..fetched
        })
    }
}

/// `image/png; charset=binary` → `image/png`.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Raster images only: SVG can carry script and is refused.
fn is_allowed_image_type(essence: &str) -> bool {
    essence.starts_with("image/") && essence != "image/svg+xml"
}

/// Origin directives that forbid shared caching are replaced by the default.
fn is_cacheable(cache_control: &str) -> bool {
    let cc = cache_control.to_ascii_lowercase();
    !(cc.contains("no-store") || cc.contains("private") || cc.trim().is_empty())
}

fn failure(error: &AppError) -> ImageFailure {
    let status = match error {
        AppError::ValidationError(_) => 400,
        AppError::PayloadTooLarge(_) => 413,
        AppError::UnsupportedContentType(_) => 415,
        AppError::CircuitOpen(_) => 503,
        AppError::Timeout(_) => 504,
        _ => 502,
    };
    ImageFailure {
        status,
        error: error.to_string(),
    }
}
