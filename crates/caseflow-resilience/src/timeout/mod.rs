//! Timeout wrapper for async operations.

use caseflow_core::CaseflowError;
use std::time::Duration;
use thiserror::Error;

/// Marker error produced when an operation exceeds its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation timed out after {0:?}")]
pub struct TimedOut(pub Duration);

impl From<TimedOut> for CaseflowError {
    fn from(err: TimedOut) -> Self {
        CaseflowError::Timeout(err.to_string())
    }
}

/// Wraps an async operation with a timeout.
///
/// The caller's error type absorbs the timeout through `From<TimedOut>`.
pub async fn with_timeout<F, Fut, T, E>(duration: Duration, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: From<TimedOut>,
{
    tokio::time::timeout(duration, f())
        .await
        .map_err(|_| E::from(TimedOut(duration)))?
}
