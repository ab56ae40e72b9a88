//! Timeout and circuit breaker around backend calls.

use crate::error::{CacheError, CacheResult};
use crate::metrics::CacheMetrics;
use caseflow_config::BreakerConfig;
use caseflow_resilience::{with_timeout, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
use std::future::Future;
use std::time::{Duration, Instant};

/// Runs every backend call under a deadline and a shared circuit breaker.
///
/// While the breaker is open calls fail immediately with
/// [`CacheError::CircuitOpen`], so fail-open reads skip the store without
/// waiting on it.
pub(crate) struct StoreGuard {
    backend: &'static str,
    timeout: Duration,
    breaker: CircuitBreaker,
}

impl StoreGuard {
    pub(crate) fn new(backend: &'static str, timeout: Duration, breaker: &BreakerConfig) -> Self {
        let config = CircuitBreakerConfig {
            failure_threshold: breaker.failure_threshold,
            success_threshold: breaker.success_threshold,
            open_duration: Duration::from_secs(breaker.open_secs),
            half_open_requests: breaker.success_threshold.max(1),
        };

        Self {
            backend,
            timeout,
            breaker: CircuitBreaker::new(format!("cache-store-{backend}"), config),
        }
    }

    pub(crate) fn backend(&self) -> &'static str {
        self.backend
    }

    pub(crate) fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub(crate) async fn run<T, Fut>(&self, operation: &'static str, call: Fut) -> CacheResult<T>
    where
        Fut: Future<Output = CacheResult<T>>,
    {
        let started = Instant::now();

        let result = match self
            .breaker
            .call(|| with_timeout(self.timeout, || call))
            .await
        {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Open(name)) => Err(CacheError::CircuitOpen(name)),
            Err(CircuitBreakerError::Failure(e)) => Err(e),
        };

        CacheMetrics::store_operation(self.backend, operation, started.elapsed(), result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(failure_threshold: u64) -> StoreGuard {
        StoreGuard::new(
            "memory",
            Duration::from_millis(50),
            &BreakerConfig {
                failure_threshold,
                success_threshold: 1,
                open_secs: 30,
            },
        )
    }

    #[tokio::test]
    async fn test_passes_through_success() {
        let guard = guard(3);
        let value = guard.run("get", async { Ok::<_, CacheError>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(guard.backend(), "memory");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let guard = guard(3);
        let result = guard
            .run("get", async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, CacheError>(())
            })
            .await;
        assert!(matches!(result, Err(CacheError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_breaker_opens_and_short_circuits() {
        let guard = guard(2);
        for _ in 0..2 {
            let _ = guard
                .run("get", async { Err::<(), _>(CacheError::StoreUnavailable("refused".into())) })
                .await;
        }
        assert_eq!(guard.breaker_state(), CircuitState::Open);

        let result = guard.run("get", async { Ok::<_, CacheError>(1) }).await;
        assert!(matches!(result, Err(CacheError::CircuitOpen(_))));
    }
}
