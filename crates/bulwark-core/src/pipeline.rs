use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::error::AppError;
use crate::models::ExtractionResult;
use crate::traits::{CacheStore, ExtractorPort};
use crate::url_guard::ValidatedUrl;

/// Circuit name guarding the primary extractor.
pub const PRIMARY_CIRCUIT: &str = "primary-extractor";

/// Orchestrates reader-mode extraction: cache → primary → fallback → cache.
///
/// Generic over both strategies and the cache via traits, so tests run
/// without processes or network.
pub struct ReaderPipeline<P, F, C>
where
    P: ExtractorPort,
    F: ExtractorPort,
    C: CacheStore<ExtractionResult>,
{
    primary: P,
    fallback: F,
    cache: C,
    breaker: Option<(CircuitBreakerRegistry, CircuitBreakerConfig)>,
}

impl<P, F, C> ReaderPipeline<P, F, C>
where
    P: ExtractorPort,
    F: ExtractorPort,
    C: CacheStore<ExtractionResult>,
{
    pub fn new(primary: P, fallback: F, cache: C) -> Self {
        Self {
            primary,
            fallback,
            cache,
            breaker: None,
        }
    }

    /// Skip the primary strategy while its circuit is open.
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

    /// Read `url`, serving from cache unless `force` is set.
    ///
    /// Never fails: every failure ends in an entry with `status = error`.
    /// Whatever is produced is cached, error entries included, and served
    /// until a forced refresh replaces it.
    pub async fn read_content(&self, url: &ValidatedUrl, force: bool) -> ExtractionResult {
        let key = url.as_str();

        if !force {
            match self.cache.get(key).await {
                Ok(Some(entry)) => {
                    tracing::debug!(%url, status = %entry.status, "Reader cache hit");
                    return entry;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(%url, error = %e, "Reader cache read failed, treating as miss"),
            }
        }

        let entry = match self.run_primary(url).await {
            Some(entry) if !entry.status.needs_fallback() => entry,
            Some(entry) => {
                tracing::info!(%url, status = %entry.status, "Primary extractor could not resolve page, falling back");
                self.run_fallback(url).await
            }
            None => self.run_fallback(url).await,
        };

        if let Err(e) = self.cache.set(key, &entry).await {
            tracing::warn!(%url, error = %e, "Reader cache write failed");
        }

        tracing::info!(%url, status = %entry.status, paragraphs = entry.paragraphs.len(), "Read complete");
        entry
    }

    /// `None` when the primary crashed, timed out, emitted garbage or was skipped.
    async fn run_primary(&self, url: &ValidatedUrl) -> Option<ExtractionResult> {
        if let Some((registry, config)) = &self.breaker
            && !registry.can_execute(PRIMARY_CIRCUIT, config.failure_threshold, config.cooldown)
        {
            tracing::warn!(%url, "Primary extractor circuit open, going straight to fallback");
            return None;
        }

        tracing::info!(%url, "Running primary extractor");
        match self.primary.extract(url).await {
            Ok(entry) => {
                if let Some((registry, _)) = &self.breaker {
                    registry.record_success(PRIMARY_CIRCUIT);
                }
                Some(entry.normalized(url.as_str()))
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, kind = e.kind(), "Primary extractor failed");
                if let Some((registry, _)) = &self.breaker
                    && e.should_trip_circuit()
                {
                    registry.record_failure(PRIMARY_CIRCUIT);
                }
                None
            }
        }
    }

    async fn run_fallback(&self, url: &ValidatedUrl) -> ExtractionResult {
        tracing::info!(%url, "Running fallback extractor");
        match self.fallback.extract(url).await {
            Ok(entry) => entry.normalized(url.as_str()),
            Err(e) => {
                tracing::warn!(%url, error = %e, kind = e.kind(), "Fallback extractor failed");
                ExtractionResult::error(url.as_str(), fallback_error_note(&e))
            }
        }
    }
}

fn fallback_error_note(error: &AppError) -> String {
    match error {
        AppError::Timeout(secs) => {
            format!("The page did not respond within {secs} seconds.")
        }
        AppError::UnsupportedContentType(ct) => {
            format!("The link does not point to an HTML page (content type: {ct}).")
        }
        AppError::HttpError(msg) => format!("The page could not be fetched: {msg}."),
        other => format!("The page could not be read: {other}."),
    }
}
