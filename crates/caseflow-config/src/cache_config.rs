//! Query cache configuration.

use caseflow_core::CaseflowError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backing medium for cache entries and the tag index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local maps.
    #[default]
    Memory,
    /// Shared Redis instance.
    Redis,
}

/// Configuration for the tag-indexed query cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch. A disabled cache always computes.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Backing medium.
    #[serde(default)]
    pub backend: CacheBackend,

    /// TTL used when a caller does not supply one.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Coalesce concurrent misses on the same key into one computation.
    #[serde(default)]
    pub single_flight: bool,

    /// Interval of the expired-entry sweeper in seconds (0 disables it).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Prefix for every key written to a shared backend.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound for a single backend call in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Retry policy for `forget` and `flush_tags`.
    #[serde(default)]
    pub invalidation_retry: InvalidationRetryConfig,

    /// Circuit breaker guarding the backend.
    #[serde(default)]
    pub breaker: BreakerConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_key_prefix() -> String {
    "caseflow:cache".to_string()
}

fn default_store_timeout_ms() -> u64 {
    250
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            backend: CacheBackend::default(),
            default_ttl_secs: default_ttl_secs(),
            single_flight: false,
            sweep_interval_secs: default_sweep_interval(),
            key_prefix: default_key_prefix(),
            store_timeout_ms: default_store_timeout_ms(),
            invalidation_retry: InvalidationRetryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Returns the default TTL as a Duration.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Returns the sweep interval, or `None` when the sweeper is disabled.
    #[must_use]
    pub const fn sweep_interval(&self) -> Option<Duration> {
        if self.sweep_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.sweep_interval_secs))
        }
    }

    /// Returns the per-call backend timeout.
    #[must_use]
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Checks the values that would make the cache misbehave silently.
    pub fn validate(&self) -> Result<(), CaseflowError> {
        if self.default_ttl_secs == 0 {
            return Err(CaseflowError::configuration("cache.default_ttl_secs must be greater than zero"));
        }
        if self.store_timeout_ms == 0 {
            return Err(CaseflowError::configuration("cache.store_timeout_ms must be greater than zero"));
        }
        if self.key_prefix.trim().is_empty() {
            return Err(CaseflowError::configuration("cache.key_prefix must not be empty"));
        }
        if self.invalidation_retry.max_attempts == 0 {
            return Err(CaseflowError::configuration(
                "cache.invalidation_retry.max_attempts must be at least 1",
            ));
        }
        if self.invalidation_retry.multiplier < 1.0 {
            return Err(CaseflowError::configuration(
                "cache.invalidation_retry.multiplier must be at least 1.0",
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(CaseflowError::configuration("cache.breaker.failure_threshold must be at least 1"));
        }
        Ok(())
    }
}

/// Retry configuration for invalidations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationRetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    50
}

fn default_max_delay() -> u64 {
    2000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for InvalidationRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

/// Circuit breaker configuration for the cache backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,

    /// Successes in half-open state needed to close again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u64,

    /// Seconds the breaker stays open before probing.
    #[serde(default = "default_open_secs")]
    pub open_secs: u64,
}

fn default_failure_threshold() -> u64 {
    5
}

fn default_success_threshold() -> u64 {
    2
}

fn default_open_secs() -> u64 {
    10
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_secs: default_open_secs(),
        }
    }
}
