//! Circuit breaking for flaky external dependencies.
//!
//! One [`CircuitBreakerRegistry`] tracks any number of named resources
//! (`"primary-extractor"`, an image origin host, an email provider...).
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (no state / failures < threshold)
//!    |                                   ^
//!    | [threshold failures]              | [success]  or  [cooldown elapsed,
//!    v                                   |               state cleared on check]
//! OPEN (failures >= threshold) ----------+
//! ```
//!
//! There is no half-open probing: once the cooldown has elapsed the next
//! [`can_execute`](CircuitBreakerRegistry::can_execute) clears the state, and
//! the failure count starts again from zero.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::AppError;
use crate::models::compute_hash;

/// Current state of one named circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls should be skipped until the cooldown elapses.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

/// Trip threshold and cooldown for one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures since the last success (or cooldown reset) that open the circuit.
    pub failure_threshold: u32,

    /// How long an open circuit rejects calls, measured from the latest failure.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CircuitEntry {
    failures: u32,
    /// Time of the failure that most recently updated `failures`.
    opened_at: Instant,
}

/// Statistics about one circuit for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub time_until_closed: Option<Duration>,
}

/// Error type for [`CircuitBreakerRegistry::call`].
#[derive(Debug)]
pub enum CircuitBreakerError {
    /// Circuit is open - the operation was not attempted.
    Open { name: String, retry_after: Duration },
    /// The inner operation failed.
    Inner(AppError),
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::Open { name, retry_after } => {
                write!(
                    f,
                    "Circuit breaker '{}' is open. Retry after {} seconds.",
                    name,
                    retry_after.as_secs()
                )
            }
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

impl From<CircuitBreakerError> for AppError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::Open { name, .. } => AppError::CircuitOpen(name),
            CircuitBreakerError::Inner(e) => e,
        }
    }
}

/// Thread-safe failure tracker for any number of named resources.
///
/// State is keyed by a hash of the resource name. Clones share state.
#[derive(Clone, Default)]
pub struct CircuitBreakerRegistry {
    inner: Arc<Mutex<HashMap<String, CircuitEntry>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the map lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, HashMap<String, CircuitEntry>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned circuit breaker mutex");
            poisoned.into_inner()
        })
    }

    fn key(name: &str) -> String {
        compute_hash(name)
    }

    /// Returns true if a call to `name` may proceed.
    ///
    /// An open circuit whose cooldown has elapsed is cleared here.
    pub fn can_execute(&self, name: &str, failure_threshold: u32, cooldown: Duration) -> bool {
        let key = Self::key(name);
        let mut map = self.lock_inner();

        let Some(entry) = map.get(&key).copied() else {
            return true;
        };
        if entry.failures < failure_threshold {
            return true;
        }
        if entry.opened_at.elapsed() >= cooldown {
            tracing::info!(circuit = %name, "Circuit breaker cooldown elapsed, resetting");
            map.remove(&key);
            return true;
        }
        false
    }

    /// Clears all state for `name`.
    pub fn record_success(&self, name: &str) {
        let removed = self.lock_inner().remove(&Self::key(name));
        if removed.is_some_and(|e| e.failures > 0) {
            tracing::debug!(circuit = %name, "Circuit breaker cleared after success");
        }
    }

    /// Counts one failure for `name` and refreshes its timestamp.
    pub fn record_failure(&self, name: &str) {
        let mut map = self.lock_inner();
        let entry = map.entry(Self::key(name)).or_insert(CircuitEntry {
            failures: 0,
            opened_at: Instant::now(),
        });
        entry.failures += 1;
        entry.opened_at = Instant::now();
        tracing::debug!(circuit = %name, failures = entry.failures, "Circuit breaker failure recorded");
    }

    /// Snapshot of `name` as seen by a call site using `config`.
    pub fn stats(&self, name: &str, config: &CircuitBreakerConfig) -> CircuitBreakerStats {
        let entry = self.lock_inner().get(&Self::key(name)).copied();

        let (state, failures, time_until_closed) = match entry {
            Some(e) if e.failures >= config.failure_threshold => {
                let elapsed = e.opened_at.elapsed();
                if elapsed < config.cooldown {
                    (CircuitState::Open, e.failures, Some(config.cooldown - elapsed))
                } else {
                    (CircuitState::Closed, e.failures, None)
                }
            }
            Some(e) => (CircuitState::Closed, e.failures, None),
            None => (CircuitState::Closed, 0, None),
        };

        CircuitBreakerStats {
            name: name.to_string(),
            state,
            failures,
            time_until_closed,
        }
    }

    /// Executes `operation` through the circuit for `name`.
    ///
    /// - Open: returns `CircuitBreakerError::Open` without calling `operation`
    /// - Otherwise: runs it, recording success, or failure when the error
    ///   [should trip the circuit](AppError::should_trip_circuit)
    pub async fn call<F, T, Fut>(
        &self,
        name: &str,
        config: &CircuitBreakerConfig,
        operation: F,
    ) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        if !self.can_execute(name, config.failure_threshold, config.cooldown) {
            let retry_after = self
                .stats(name, config)
                .time_until_closed
                .unwrap_or(Duration::ZERO);
            tracing::warn!(circuit = %name, "Circuit breaker open, skipping call");
            return Err(CircuitBreakerError::Open {
                name: name.to_string(),
                retry_after,
            });
        }

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success(name),
            Err(e) => {
                if e.should_trip_circuit() {
                    self.record_failure(name);
                }
            }
        }

        result.map_err(CircuitBreakerError::Inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_millis(1000);

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreakerRegistry::new();
        assert!(cb.can_execute("api", 3, COOLDOWN));
        let stats = cb.stats("api", &CircuitBreakerConfig::default());
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn test_circuit_opens_after_threshold_failures() {
        let cb = CircuitBreakerRegistry::new();

        for _ in 0..2 {
            cb.record_failure("api");
        }
        assert!(cb.can_execute("api", 3, COOLDOWN));

        cb.record_failure("api");
        assert!(!cb.can_execute("api", 3, COOLDOWN));
    }

    #[test]
    fn test_success_clears_state() {
        let cb = CircuitBreakerRegistry::new();

        for _ in 0..3 {
            cb.record_failure("api");
        }
        cb.record_success("api");

        assert!(cb.can_execute("api", 3, COOLDOWN));
        cb.record_failure("api");
        cb.record_failure("api");
        assert!(cb.can_execute("api", 3, COOLDOWN));
    }

    #[test]
    fn test_circuits_are_independent() {
        let cb = CircuitBreakerRegistry::new();
        for _ in 0..3 {
            cb.record_failure("smtp");
        }
        assert!(!cb.can_execute("smtp", 3, COOLDOWN));
        assert!(cb.can_execute("push", 3, COOLDOWN));
    }

    #[test]
    fn test_cooldown_resets_and_restarts_count() {
        let cb = CircuitBreakerRegistry::new();

        for _ in 0..3 {
            cb.record_failure("api");
        }
        assert!(!cb.can_execute("api", 3, COOLDOWN));

        std::thread::sleep(COOLDOWN + Duration::from_millis(50));

        assert!(cb.can_execute("api", 3, COOLDOWN));
        // Count starts over: one failure does not re-open.
        cb.record_failure("api");
        assert!(cb.can_execute("api", 3, COOLDOWN));
        assert_eq!(cb.stats("api", &CircuitBreakerConfig::default()).failures, 1);
    }

    #[test]
    fn test_failure_refreshes_cooldown() {
        let cb = CircuitBreakerRegistry::new();
        let cooldown = Duration::from_millis(40);

        cb.record_failure("api");
        std::thread::sleep(Duration::from_millis(30));
        cb.record_failure("api");
        std::thread::sleep(Duration::from_millis(20));

        // 50ms since the first failure, only 20ms since the latest.
        assert!(!cb.can_execute("api", 2, cooldown));
    }

    #[test]
    fn test_stats_reports_time_until_closed() {
        let cb = CircuitBreakerRegistry::new();
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(60),
        };
        cb.record_failure("api");

        let stats = cb.stats("api", &config);
        assert_eq!(stats.state, CircuitState::Open);
        assert!(stats.time_until_closed.unwrap() > Duration::from_secs(55));
    }

    #[tokio::test]
    async fn test_call_returns_open_error_when_circuit_open() {
        let cb = CircuitBreakerRegistry::new();
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(60),
        };
        cb.record_failure("api");

        let result = cb
            .call("api", &config, || async {
                Ok::<_, AppError>("should not execute".to_string())
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        let app_error: AppError = result.unwrap_err().into();
        assert!(matches!(app_error, AppError::CircuitOpen(name) if name == "api"));
    }

    #[tokio::test]
    async fn test_call_records_only_tripping_failures() {
        let cb = CircuitBreakerRegistry::new();
        let config = CircuitBreakerConfig::default();

        let _ = cb
            .call("api", &config, || async {
                Err::<String, _>(AppError::NetworkError("fail".into()))
            })
            .await;
        let _ = cb
            .call("api", &config, || async {
                Err::<String, _>(AppError::ValidationError("caller bug".into()))
            })
            .await;

        assert_eq!(cb.stats("api", &config).failures, 1);

        let ok = cb
            .call("api", &config, || async { Ok::<_, AppError>(7) })
            .await
            .unwrap();
        assert_eq!(ok, 7);
        assert_eq!(cb.stats("api", &config).failures, 0);
    }
}
