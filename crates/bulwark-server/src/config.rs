use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use bulwark_core::AppError;
use bulwark_core::circuit_breaker::CircuitBreakerConfig;
use bulwark_core::config::{ExtractorConfig, FetchConfig, env_or, env_positive};
use bulwark_core::rate_limit::RateLimitRule;

/// Which store backs the reader and image caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    File,
    Postgres,
}

impl CacheBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheBackendKind::Memory => "memory",
            CacheBackendKind::File => "file",
            CacheBackendKind::Postgres => "postgres",
        }
    }
}

impl FromStr for CacheBackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(AppError::ConfigError(format!(
                "Invalid BULWARK_CACHE_BACKEND '{other}': expected memory, file or postgres"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// Root directory for the file backend; readers and images get subdirectories.
    pub dir: PathBuf,
    /// Maximum entries per in-memory cache.
    pub capacity: u64,
    /// Set exactly when `backend` is [`CacheBackendKind::Postgres`].
    pub database: Option<DatabaseSettings>,
}

/// Connection settings for the postgres cache backend.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseSettings {
    /// `DATABASE_URL` is required; `DATABASE_MAX_CONNECTIONS` defaults to 5.
    pub fn from_env() -> Result<Self, AppError> {
        Self::new(
            std::env::var("DATABASE_URL").ok(),
            env_positive("DATABASE_MAX_CONNECTIONS", 5)?,
        )
    }

    fn new(url: Option<String>, max_connections: u64) -> Result<Self, AppError> {
        let url = url.filter(|u| !u.trim().is_empty()).ok_or_else(|| {
            AppError::ConfigError(
                "DATABASE_URL must be set when BULWARK_CACHE_BACKEND=postgres".into(),
            )
        })?;
        let max_connections = u32::try_from(max_connections).map_err(|_| {
            AppError::ConfigError(format!(
                "DATABASE_MAX_CONNECTIONS {max_connections} is out of range"
            ))
        })?;
        Ok(Self {
            url,
            max_connections,
        })
    }
}

/// Requests allowed per client per window, per endpoint.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub read: RateLimitRule,
    pub image: RateLimitRule,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            read: RateLimitRule::new(20, 60),
            image: RateLimitRule::new(120, 60),
        }
    }
}

/// Everything the server reads from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub limits: RateLimits,
    pub breaker: CircuitBreakerConfig,
    pub extractor: ExtractorConfig,
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    /// Peers whose `x-forwarded-for` / `x-real-ip` headers are believed.
    pub trusted_proxies: Vec<IpAddr>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = RateLimits::default();
        let backend = match std::env::var("BULWARK_CACHE_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => CacheBackendKind::Memory,
        };
        let dir = std::env::var("BULWARK_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".bulwark-cache"));

        Ok(Self {
            port: env_or("BULWARK_SERVER_PORT", 3000)?,
            limits: RateLimits {
                read: RateLimitRule::from_env("BULWARK_READ", defaults.read)?,
                image: RateLimitRule::from_env("BULWARK_IMAGE", defaults.image)?,
            },
            breaker: CircuitBreakerConfig::from_env()?,
            extractor: ExtractorConfig::from_env()?,
            fetch: FetchConfig::from_env()?,
            cache: CacheConfig {
                backend,
                dir,
                capacity: env_positive("BULWARK_CACHE_CAPACITY", 10_000)?,
                database: match backend {
                    CacheBackendKind::Postgres => Some(DatabaseSettings::from_env()?),
                    _ => None,
                },
            },
            trusted_proxies: match std::env::var("BULWARK_TRUSTED_PROXIES") {
                Ok(raw) => parse_trusted_proxies(&raw)?,
                Err(_) => Vec::new(),
            },
        })
    }
}

/// Comma-separated IP addresses, e.g. `10.0.0.1, 10.0.0.2`.
pub fn parse_trusted_proxies(raw: &str) -> Result<Vec<IpAddr>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid BULWARK_TRUSTED_PROXIES entry '{s}': expected an IP address"
                ))
            })
        })
        .collect()
}
