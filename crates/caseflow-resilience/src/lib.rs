//! # Caseflow Resilience
//!
//! Resilience patterns used around backing-store calls.
//! Provides retry with backoff, timeouts, and a circuit breaker.

pub mod circuit_breaker;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::*;
pub use retry::*;
pub use timeout::*;
