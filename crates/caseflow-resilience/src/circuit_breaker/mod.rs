//! Circuit breaker implementation.

use caseflow_core::CaseflowError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed - requests are allowed.
    Closed = 0,
    /// Circuit is open - requests are rejected.
    Open = 1,
    /// Circuit is half-open - limited requests are allowed.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u64,
    /// Number of successes needed to close the circuit from half-open.
    pub success_threshold: u64,
    /// Duration to wait before transitioning from open to half-open.
    pub open_duration: Duration,
    /// Number of probe requests allowed in half-open state.
    pub half_open_requests: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(10),
            half_open_requests: 2,
        }
    }
}

/// Circuit breaker for protecting against cascading failures.
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    half_open_requests: AtomicU64,
    opened_at: Mutex<Option<Instant>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            half_open_requests: AtomicU64::new(0),
            opened_at: Mutex::new(None),
            config,
        }
    }

    /// Creates a new circuit breaker with default configuration.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Returns the current state of the circuit breaker.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    /// Returns the name of the circuit breaker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Executes a function with circuit breaker protection.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.allow_request() {
            return Err(CircuitBreakerError::Open(self.name.clone()));
        }

        match f().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Failure(e))
            }
        }
    }

    /// Checks if a request should be allowed, moving open → half-open once
    /// the open duration has elapsed.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = *self.opened_at.lock();
                match opened_at {
                    Some(time) if time.elapsed() >= self.config.open_duration => {
                        self.state.store(CircuitState::HalfOpen as u8, Ordering::SeqCst);
                        self.success_count.store(0, Ordering::SeqCst);
                        self.half_open_requests.store(1, Ordering::SeqCst);
                        debug!(breaker = %self.name, "Circuit breaker transitioning to half-open");
                        true
                    }
                    _ => false,
                }
            }
            CircuitState::HalfOpen => {
                let requests = self.half_open_requests.fetch_add(1, Ordering::SeqCst);
                requests < self.config.half_open_requests
            }
        }
    }

    fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    self.state.store(CircuitState::Closed as u8, Ordering::SeqCst);
                    self.failure_count.store(0, Ordering::SeqCst);
                    debug!(breaker = %self.name, "Circuit breaker closed after successful recovery");
                } else {
                    // Free a probe slot for the next request.
                    self.half_open_requests.fetch_sub(1, Ordering::SeqCst);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.open();
                    warn!(breaker = %self.name, failures, "Circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                self.open();
                warn!(breaker = %self.name, "Circuit breaker reopened after failure in half-open state");
            }
            CircuitState::Open => {
                *self.opened_at.lock() = Some(Instant::now());
            }
        }
    }

    fn open(&self) {
        *self.opened_at.lock() = Some(Instant::now());
        self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
    }

    /// Manually resets the circuit breaker to closed state.
    pub fn reset(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        *self.opened_at.lock() = None;
        debug!(breaker = %self.name, "Circuit breaker manually reset");
    }
}

/// Error type for circuit breaker operations.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, request was rejected.
    Open(String),
    /// The underlying operation failed.
    Failure(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(name) => write!(f, "Circuit breaker '{}' is open", name),
            Self::Failure(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(_) => None,
            Self::Failure(e) => Some(e),
        }
    }
}

impl<E> From<CircuitBreakerError<E>> for CaseflowError
where
    E: std::fmt::Display,
{
    fn from(err: CircuitBreakerError<E>) -> Self {
        match err {
            CircuitBreakerError::Open(name) => CaseflowError::CircuitBreakerOpen(name),
            CircuitBreakerError::Failure(e) => CaseflowError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "cache-store",
            CircuitBreakerConfig {
                failure_threshold,
                success_threshold: 1,
                open_duration: Duration::from_secs(5),
                half_open_requests: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_closed_breaker_passes_value() {
        let cb = CircuitBreaker::with_defaults("test");
        let result = cb.call(|| async { Ok::<i32, &str>(99) }).await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.name(), "test");
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let cb = breaker(2);

        let _ = cb.call(|| async { Err::<i32, &str>("refused") }).await;
        assert_eq!(cb.state(), CircuitState::Closed);

        let _ = cb.call(|| async { Err::<i32, &str>("refused") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb.call(|| async { Ok::<i32, &str>(1) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(2);

        let _ = cb.call(|| async { Err::<i32, &str>("refused") }).await;
        let _ = cb.call(|| async { Ok::<i32, &str>(1) }).await;
        let _ = cb.call(|| async { Err::<i32, &str>("refused") }).await;

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovery() {
        let cb = breaker(1);
        let _ = cb.call(|| async { Err::<i32, &str>("refused") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(6)).await;

        let result = cb.call(|| async { Ok::<i32, &str>(5) }).await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1);
        let _ = cb.call(|| async { Err::<i32, &str>("refused") }).await;

        tokio::time::advance(Duration::from_secs(6)).await;

        let _ = cb.call(|| async { Err::<i32, &str>("still refused") }).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[tokio::test]
    async fn test_reset() {
        let cb = breaker(1);
        let _ = cb.call(|| async { Err::<i32, &str>("refused") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_circuit_state_from_u8() {
        assert_eq!(CircuitState::from(0), CircuitState::Closed);
        assert_eq!(CircuitState::from(1), CircuitState::Open);
        assert_eq!(CircuitState::from(2), CircuitState::HalfOpen);
        assert_eq!(CircuitState::from(255), CircuitState::Closed);
    }

    #[test]
    fn test_open_error_converts() {
        let err: CaseflowError = CircuitBreakerError::<&str>::Open("cache-store".to_string()).into();
        assert!(matches!(err, CaseflowError::CircuitBreakerOpen(_)));
    }
}
