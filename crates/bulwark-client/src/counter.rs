use std::time::Duration;

use bulwark_core::config::env_positive;
use bulwark_core::error::AppError;
use bulwark_core::traits::CounterBackend;
use reqwest::Client;
use serde::Deserialize;

const DEFAULT_COUNTER_TIMEOUT_MS: u64 = 500;

/// Distributed rate-limit counter over a Redis-compatible REST API
/// (Upstash-style `POST /pipeline` with bearer auth).
///
/// Each increment sends `INCR key` and `EXPIRE key ttl` in one pipeline, so
/// the counter disappears once its window is over.
#[derive(Clone)]
pub struct RestCounter {
    client: Client,
    base_url: String,
    token: String,
    timeout_ms: u64,
}

impl RestCounter {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    /// Reads `BULWARK_COUNTER_REST_URL`, `BULWARK_COUNTER_REST_TOKEN` and
    /// `BULWARK_COUNTER_TIMEOUT_MS`.
    ///
    /// Returns `Ok(None)` when no URL is configured. A URL without a token
    /// is a configuration error.
    pub fn from_env() -> Result<Option<Self>, AppError> {
        let Some(url) = non_empty_var("BULWARK_COUNTER_REST_URL") else {
            return Ok(None);
        };
        let token = non_empty_var("BULWARK_COUNTER_REST_TOKEN").ok_or_else(|| {
            AppError::ConfigError(
                "BULWARK_COUNTER_REST_URL is set but BULWARK_COUNTER_REST_TOKEN is not".to_string(),
            )
        })?;
        let timeout_ms = env_positive("BULWARK_COUNTER_TIMEOUT_MS", DEFAULT_COUNTER_TIMEOUT_MS)?;

        Self::new(&url, &token, Duration::from_millis(timeout_ms)).map(Some)
    }

    /// Per-call timeout, also the bound the rate limiter should wait for.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[derive(Deserialize)]
struct PipelineReply {
    result: Option<serde_json::Value>,
    error: Option<String>,
}

impl CounterBackend for RestCounter {
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<u64, AppError> {
        let body = serde_json::json!([
            ["INCR", key],
            ["EXPIRE", key, ttl_secs.to_string()],
        ]);

        let response = self
            .client
            .post(format!("{}/pipeline", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_ms / 1000)
                } else {
                    AppError::NetworkError(format!("Counter request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} from counter backend",
                status.as_u16()
            )));
        }

        let replies: Vec<PipelineReply> = response
            .json()
            .await
            .map_err(|e| AppError::ParseError(format!("Counter reply: {e}")))?;

        let incr = replies
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ParseError("Counter reply was empty".to_string()))?;
        if let Some(error) = incr.error {
            return Err(AppError::CacheError(format!("Counter INCR failed: {error}")));
        }

        match incr.result {
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| AppError::ParseError("Counter INCR returned a non-integer".to_string()))
    }
}
