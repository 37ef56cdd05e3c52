use thiserror::Error;

/// Application-wide error types for Bulwark.
#[derive(Error, Debug)]
pub enum AppError {
    /// Upstream answered with a non-success HTTP status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Fetch or subprocess exceeded its time bound.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Disallowed or malformed URL, rejected before any network activity.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Primary extractor emitted output that could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Upstream responded with a content type this caller cannot use.
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// Upstream body exceeded the configured size bound.
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Primary extractor process failed to start or exited non-zero.
    #[error("Extractor process error: {0}")]
    ProcessError(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// A circuit breaker refused the call.
    #[error("Circuit '{0}' is open")]
    CircuitOpen(String),

    /// Cache backend read/write failed.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Required configuration missing or malformed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error should count as a failure against a circuit breaker.
    ///
    /// Errors caused by the caller's input (validation, unsupported content)
    /// say nothing about the health of the dependency and never trip.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::ProcessError(_)
            | AppError::ParseError(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("HTTP 5") || msg.contains("HTTP 429") || msg.contains("connect")
            }
            _ => false,
        }
    }

    /// Short machine-readable label, used in logs and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::HttpError(_) => "http_error",
            AppError::NetworkError(_) => "network_error",
            AppError::Timeout(_) => "timeout",
            AppError::ValidationError(_) => "validation_error",
            AppError::ParseError(_) => "parse_error",
            AppError::UnsupportedContentType(_) => "unsupported_content_type",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::ProcessError(_) => "process_error",
            AppError::RateLimitExceeded => "rate_limit_exceeded",
            AppError::CircuitOpen(_) => "circuit_open",
            AppError::CacheError(_) => "cache_error",
            AppError::DatabaseError(_) => "database_error",
            AppError::ConfigError(_) => "config_error",
            AppError::SerializationError(_) => "serialization_error",
            AppError::Generic(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_tripping() {
        assert!(AppError::NetworkError("reset".into()).should_trip_circuit());
        assert!(AppError::Timeout(180).should_trip_circuit());
        assert!(AppError::ProcessError("exit status 1".into()).should_trip_circuit());
        assert!(AppError::HttpError("HTTP 503 for https://a.example".into()).should_trip_circuit());
        assert!(!AppError::HttpError("HTTP 404 for https://a.example".into()).should_trip_circuit());
        assert!(!AppError::ValidationError("bad".into()).should_trip_circuit());
        assert!(!AppError::UnsupportedContentType("text/html".into()).should_trip_circuit());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(AppError::RateLimitExceeded.kind(), "rate_limit_exceeded");
        assert_eq!(AppError::ValidationError("x".into()).kind(), "validation_error");
        assert_eq!(AppError::Generic("x".into()).kind(), "internal_error");
    }
}
