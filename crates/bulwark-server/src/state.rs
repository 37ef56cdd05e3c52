use std::net::IpAddr;

use bulwark_client::{DirectExtractor, PrimaryExtractor, ReqwestFetcher, RestCounter};
use bulwark_core::cache::{FileCache, MemoryCache};
use bulwark_core::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use bulwark_core::error::AppError;
use bulwark_core::image_proxy::ImageProxy;
use bulwark_core::models::{CachedImage, ExtractionResult};
use bulwark_core::pipeline::ReaderPipeline;
use bulwark_core::rate_limit::RateLimiter;
use bulwark_core::url_guard::UrlValidator;
use bulwark_db::{Database, ImageCacheRepository, ReaderCacheRepository};

use crate::backends::CacheBackend;
use crate::config::{CacheBackendKind, RateLimits, ServerConfig};

pub type ReaderCache = CacheBackend<ExtractionResult, ReaderCacheRepository>;
pub type ImageCache = CacheBackend<CachedImage, ImageCacheRepository>;
pub type Pipeline = ReaderPipeline<PrimaryExtractor, DirectExtractor, ReaderCache>;
pub type Images = ImageProxy<ReqwestFetcher, ImageCache>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub pipeline: Pipeline,
    pub images: Images,
    pub limiter: RateLimiter<RestCounter>,
    pub limits: RateLimits,
    pub validator: UrlValidator,
    pub breakers: CircuitBreakerRegistry,
    pub breaker_config: CircuitBreakerConfig,
    pub cache_backend: CacheBackendKind,
    /// Peers allowed to name the client through forwarding headers.
    pub trusted_proxies: Vec<IpAddr>,
    /// Present only with the postgres cache backend.
    pub db: Option<Database>,
}

impl AppState {
    /// Wire every component from `config`: caches, extractors, fetcher,
    /// limiter and the shared circuit breaker registry.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, AppError> {
        let validator = UrlValidator::new();
        let fetcher = ReqwestFetcher::new(config.fetch.clone(), validator)?;

        let (reader_cache, image_cache, db) = match config.cache.backend {
            CacheBackendKind::Memory => (
                CacheBackend::Memory(MemoryCache::new(config.cache.capacity)),
                CacheBackend::Memory(MemoryCache::new(config.cache.capacity)),
                None,
            ),
            CacheBackendKind::File => (
                CacheBackend::File(FileCache::open(config.cache.dir.join("reader"))?),
                CacheBackend::File(FileCache::open(config.cache.dir.join("images"))?),
                None,
            ),
            CacheBackendKind::Postgres => {
                let settings = config.cache.database.as_ref().ok_or_else(|| {
                    AppError::ConfigError("postgres cache backend has no database settings".into())
                })?;
                let db = Database::connect(&settings.url, settings.max_connections).await?;
                db.migrate().await?;
                (
                    CacheBackend::Postgres(db.reader_cache()),
                    CacheBackend::Postgres(db.image_cache()),
                    Some(db),
                )
            }
        };
        tracing::info!(backend = config.cache.backend.as_str(), "Cache backend ready");

        let primary = PrimaryExtractor::from_config(&config.extractor).await?;
        tracing::info!(primary = primary.name(), "Primary extractor ready");

        let counter = RestCounter::from_env()?;
        let counter_timeout = counter
            .as_ref()
            .map(RestCounter::timeout)
            .unwrap_or(std::time::Duration::from_millis(500));
        if counter.is_none() {
            tracing::warn!("No distributed rate counter configured, limits are per instance");
        }

        let breakers = CircuitBreakerRegistry::new();
        let pipeline = ReaderPipeline::new(primary, DirectExtractor::new(fetcher.clone()), reader_cache)
            .with_breaker(breakers.clone(), config.breaker);
        let images = ImageProxy::new(
            fetcher,
            image_cache,
            validator,
            config.fetch.max_image_bytes,
        )
        .with_breaker(breakers.clone(), config.breaker);

        Ok(Self {
            pipeline,
            images,
            limiter: RateLimiter::new(counter, counter_timeout),
            limits: config.limits,
            validator,
            breakers,
            breaker_config: config.breaker,
            cache_backend: config.cache.backend,
            trusted_proxies: config.trusted_proxies.clone(),
            db,
        })
    }
}
