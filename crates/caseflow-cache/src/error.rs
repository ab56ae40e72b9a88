//! Cache error types.

use caseflow_core::CaseflowError;
use caseflow_resilience::TimedOut;
use std::time::Duration;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-layer errors.
///
/// Compute failures never appear here: `remember` hands them back to the
/// caller in the caller's own error type.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing medium could not be reached.
    #[error("Cache store unavailable: {0}")]
    StoreUnavailable(String),

    /// A backend call exceeded its deadline.
    #[error("Cache store call timed out after {0:?}")]
    Timeout(Duration),

    /// The circuit breaker in front of the backend is open.
    #[error("Cache circuit breaker open: {0}")]
    CircuitOpen(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A raw key failed validation.
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// An invalidation could not be completed after retries.
    #[error("Invalidation of {target} failed: {source}")]
    InvalidationFailed {
        target: String,
        #[source]
        source: Box<CacheError>,
    },
}

impl CacheError {
    /// Returns true if the error means the backend could not serve the call.
    pub fn is_unavailable(&self) -> bool {
        match self {
            CacheError::StoreUnavailable(_)
            | CacheError::Timeout(_)
            | CacheError::CircuitOpen(_)
            | CacheError::Redis(_)
            | CacheError::Pool(_) => true,
            CacheError::InvalidationFailed { source, .. } => source.is_unavailable(),
            _ => false,
        }
    }

    /// Returns true if repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::StoreUnavailable(_) | CacheError::Timeout(_) | CacheError::Redis(_) | CacheError::Pool(_)
        )
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::StoreUnavailable(_) => "unavailable",
            CacheError::Timeout(_) => "timeout",
            CacheError::CircuitOpen(_) => "circuit_open",
            CacheError::Serialization(_) => "serialization",
            CacheError::Redis(_) => "redis",
            CacheError::Pool(_) => "pool",
            CacheError::Configuration(_) => "configuration",
            CacheError::InvalidKey(_) => "invalid_key",
            CacheError::InvalidationFailed { .. } => "invalidation_failed",
        }
    }

    pub(crate) fn invalidation(target: impl Into<String>, source: CacheError) -> Self {
        CacheError::InvalidationFailed {
            target: target.into(),
            source: Box::new(source),
        }
    }
}

impl From<TimedOut> for CacheError {
    fn from(err: TimedOut) -> Self {
        CacheError::Timeout(err.0)
    }
}

impl From<CacheError> for CaseflowError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Configuration(msg) => CaseflowError::Configuration(msg),
            other => CaseflowError::Cache(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        assert!(CacheError::StoreUnavailable("refused".into()).is_unavailable());
        assert!(CacheError::Timeout(Duration::from_millis(5)).is_unavailable());
        assert!(CacheError::CircuitOpen("cache-store".into()).is_unavailable());
        assert!(!CacheError::InvalidKey("".into()).is_unavailable());
    }

    #[test]
    fn test_circuit_open_is_not_retryable() {
        assert!(!CacheError::CircuitOpen("cache-store".into()).is_retryable());
        assert!(CacheError::StoreUnavailable("refused".into()).is_retryable());
    }

    #[test]
    fn test_invalidation_failed_wraps_source() {
        let err = CacheError::invalidation("tag beneficiaries_list", CacheError::StoreUnavailable("down".into()));
        assert!(err.is_unavailable());
        assert!(!err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("beneficiaries_list") && msg.contains("down"));
    }

    #[test]
    fn test_from_timed_out() {
        let err = CacheError::from(TimedOut(Duration::from_millis(250)));
        assert!(matches!(err, CacheError::Timeout(d) if d == Duration::from_millis(250)));
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_into_caseflow_error() {
        let err: CaseflowError = CacheError::StoreUnavailable("down".into()).into();
        assert!(matches!(err, CaseflowError::Cache(_)));

        let err: CaseflowError = CacheError::Configuration("bad".into()).into();
        assert!(matches!(err, CaseflowError::Configuration(_)));
    }
}
