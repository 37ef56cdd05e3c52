//! Fixed-window request rate limiting.
//!
//! Time is bucketed into windows of `window_secs`; each `(namespace,
//! identifier)` pair gets one counter per window. Counters are kept in two
//! places at once: an optional distributed backend (best-effort, bounded by a
//! short timeout) and an in-process map that is always incremented. A
//! successful distributed increment is authoritative; otherwise the local
//! count decides.
//!
//! In a multi-instance deployment the local count alone undercounts the true
//! aggregate traffic, so a healthy distributed backend matters there.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::{RateLimitDecision, compute_hash};
use crate::traits::{CounterBackend, NullCounter};

/// Per-endpoint limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u64,
    pub window_secs: u64,
}

impl RateLimitRule {
    pub fn new(limit: u64, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }
}

#[derive(Debug, Clone, Copy)]
struct LocalCount {
    /// Epoch seconds at which this counter's window ends.
    expires_at: u64,
    count: u64,
}

#[derive(Debug, Default)]
struct LocalCounters {
    counts: HashMap<String, LocalCount>,
    last_sweep: u64,
}

/// Fixed-window limiter. Construct once at startup and share by cloning.
#[derive(Clone)]
pub struct RateLimiter<B = NullCounter> {
    backend: Option<B>,
    backend_timeout: Duration,
    local: Arc<Mutex<LocalCounters>>,
}

impl RateLimiter<NullCounter> {
    /// A limiter that only counts in-process.
    pub fn local_only() -> Self {
        Self::new(None, Duration::from_millis(500))
    }
}

impl<B: CounterBackend> RateLimiter<B> {
    pub fn new(backend: Option<B>, backend_timeout: Duration) -> Self {
        Self {
            backend,
            backend_timeout,
            local: Arc::new(Mutex::new(LocalCounters::default())),
        }
    }

    /// Count one request against `rule` for `namespace:identifier` at the current time.
    pub async fn check(
        &self,
        namespace: &str,
        identifier: &str,
        rule: RateLimitRule,
    ) -> RateLimitDecision {
        self.check_at(namespace, identifier, rule, now_secs()).await
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    pub async fn check_at(
        &self,
        namespace: &str,
        identifier: &str,
        rule: RateLimitRule,
        now_secs: u64,
    ) -> RateLimitDecision {
        let window_secs = rule.window_secs.max(1);
        let window = now_secs / window_secs;
        let key = counter_key(namespace, identifier, window);

        let reset_at = (window + 1) * window_secs;

        let local_count = self.increment_local(&key, reset_at, now_secs);

        let count = match self.increment_remote(&key, window_secs).await {
            Some(remote) => remote,
            None => local_count,
        };

        let decision = RateLimitDecision {
            ok: count <= rule.limit,
            remaining: rule.limit.saturating_sub(count),
            reset_at,
            limit: rule.limit,
        };

        if !decision.ok {
            tracing::debug!(%namespace, count, limit = rule.limit, "Rate limit exceeded");
        }

        decision
    }

    /// Always runs, whether or not the distributed backend is healthy.
    fn increment_local(&self, key: &str, expires_at: u64, now_secs: u64) -> u64 {
        let mut local = self.local.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned rate limiter mutex");
            poisoned.into_inner()
        });

        // Counters from finished windows can never be read again.
        if now_secs > local.last_sweep {
            local.counts.retain(|_, c| c.expires_at > now_secs);
            local.last_sweep = now_secs;
        }

        let entry = local
            .counts
            .entry(key.to_string())
            .or_insert(LocalCount {
                expires_at,
                count: 0,
            });
        entry.count += 1;
        entry.count
    }

    async fn increment_remote(&self, key: &str, window_secs: u64) -> Option<u64> {
        let backend = self.backend.as_ref()?;
        match tokio::time::timeout(self.backend_timeout, backend.increment(key, window_secs)).await
        {
            Ok(Ok(count)) => Some(count),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Distributed rate counter failed, using local count");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.backend_timeout.as_millis() as u64,
                    "Distributed rate counter timed out, using local count"
                );
                None
            }
        }
    }

    /// Number of live local counters (for tests and diagnostics).
    pub fn local_len(&self) -> usize {
        self.local.lock().map(|l| l.counts.len()).unwrap_or_default()
    }
}

/// `rl:<sha256(namespace:identifier)>:<window>`. Raw identifiers (client IPs)
/// never reach storage.
fn counter_key(namespace: &str, identifier: &str, window: u64) -> String {
    let digest = compute_hash(&format!("{namespace}:{identifier}"));
    format!("rl:{}:{window}", &digest[..32])
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
