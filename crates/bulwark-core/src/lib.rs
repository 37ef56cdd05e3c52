pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod image_proxy;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod testutil;
pub mod traits;
pub mod url_guard;

pub use cache::{FileCache, MemoryCache};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
pub use error::AppError;
pub use image_proxy::ImageProxy;
pub use models::{
    CachedImage, ExtractionResult, ExtractionStatus, ImageFailure, ProxiedImage,
    RateLimitDecision, compute_hash,
};
pub use pipeline::ReaderPipeline;
pub use rate_limit::{RateLimitRule, RateLimiter};
pub use traits::{CacheStore, CounterBackend, ExtractorPort, ImageFetcher};
pub use url_guard::{UrlValidator, ValidatedUrl};
