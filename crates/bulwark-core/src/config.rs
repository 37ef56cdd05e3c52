//! Environment-driven configuration for the resilience components.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::AppError;
use crate::rate_limit::RateLimitRule;

/// Identifying `User-Agent` sent on every direct fetch.
pub const USER_AGENT: &str = "Bulwark/0.1 (+reader-mode; direct fetch)";

/// Read `name` and parse it, or return `default` when unset.
pub fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {name} '{raw}': expected a number"))
        }),
    }
}

/// Like [`env_or`], but zero is rejected.
pub fn env_positive(name: &str, default: u64) -> Result<u64, AppError> {
    let value = env_or(name, default)?;
    if value == 0 {
        return Err(AppError::ConfigError(format!("{name} must be at least 1")));
    }
    Ok(value)
}

impl RateLimitRule {
    /// Reads `{prefix}_RATE_LIMIT` and `{prefix}_RATE_WINDOW_SECS`.
    pub fn from_env(prefix: &str, default: RateLimitRule) -> Result<Self, AppError> {
        Ok(Self {
            limit: env_positive(&format!("{prefix}_RATE_LIMIT"), default.limit)?,
            window_secs: env_positive(&format!("{prefix}_RATE_WINDOW_SECS"), default.window_secs)?,
        })
    }
}

impl CircuitBreakerConfig {
    /// Reads `BULWARK_BREAKER_FAILURE_THRESHOLD` and `BULWARK_BREAKER_COOLDOWN_MS`.
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        let threshold = env_positive(
            "BULWARK_BREAKER_FAILURE_THRESHOLD",
            u64::from(defaults.failure_threshold),
        )?;
        let failure_threshold = u32::try_from(threshold).map_err(|_| {
            AppError::ConfigError("BULWARK_BREAKER_FAILURE_THRESHOLD is too large".into())
        })?;
        let cooldown_ms = env_or(
            "BULWARK_BREAKER_COOLDOWN_MS",
            defaults.cooldown.as_millis() as u64,
        )?;

        Ok(Self {
            failure_threshold,
            cooldown: Duration::from_millis(cooldown_ms),
        })
    }
}

/// Settings for the subprocess-driven primary extractor.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Program to run. `None` disables the primary strategy.
    pub command: Option<String>,
    /// Arguments placed before `<url> <output-path>`.
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Maximum bytes read from the process's stdout.
    pub max_output_bytes: usize,
    /// Directory for per-URL output files.
    pub work_dir: PathBuf,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout: Duration::from_secs(180),
            max_output_bytes: 4 * 1024 * 1024,
            work_dir: std::env::temp_dir().join("bulwark-extractor"),
        }
    }
}

impl ExtractorConfig {
    /// Reads the `BULWARK_EXTRACTOR_*` variables.
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        let command = std::env::var("BULWARK_EXTRACTOR_COMMAND")
            .ok()
            .filter(|c| !c.trim().is_empty());
        let args = std::env::var("BULWARK_EXTRACTOR_ARGS")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let timeout_secs = env_positive(
            "BULWARK_EXTRACTOR_TIMEOUT_SECS",
            defaults.timeout.as_secs(),
        )?;
        let max_output_bytes = env_positive(
            "BULWARK_EXTRACTOR_MAX_OUTPUT_BYTES",
            defaults.max_output_bytes as u64,
        )? as usize;
        let work_dir = std::env::var("BULWARK_EXTRACTOR_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_dir);

        Ok(Self {
            command,
            args,
            timeout: Duration::from_secs(timeout_secs),
            max_output_bytes,
            work_dir,
        })
    }
}

/// Settings for direct HTTP fetches (fallback extraction and image origin).
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub page_timeout: Duration,
    pub image_timeout: Duration,
    pub max_image_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(15),
            image_timeout: Duration::from_secs(10),
            max_image_bytes: 8 * 1024 * 1024,
        }
    }
}

impl FetchConfig {
    /// Reads `BULWARK_FALLBACK_TIMEOUT_SECS`, `BULWARK_IMAGE_TIMEOUT_SECS`
    /// and `BULWARK_IMAGE_MAX_BYTES`.
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        Ok(Self {
            page_timeout: Duration::from_secs(env_positive(
                "BULWARK_FALLBACK_TIMEOUT_SECS",
                defaults.page_timeout.as_secs(),
            )?),
            image_timeout: Duration::from_secs(env_positive(
                "BULWARK_IMAGE_TIMEOUT_SECS",
                defaults.image_timeout.as_secs(),
            )?),
            max_image_bytes: env_positive(
                "BULWARK_IMAGE_MAX_BYTES",
                defaults.max_image_bytes as u64,
            )? as usize,
        })
    }
}
