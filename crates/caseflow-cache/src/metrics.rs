//! Prometheus metrics for the query cache.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric names for the query cache.
pub mod names {
    /// Lookups answered from the cache.
    pub const CACHE_HITS_TOTAL: &str = "caseflow_cache_hits_total";
    /// Lookups that found nothing usable.
    pub const CACHE_MISSES_TOTAL: &str = "caseflow_cache_misses_total";
    /// Compute thunks invoked.
    pub const CACHE_COMPUTES_TOTAL: &str = "caseflow_cache_computes_total";
    /// Compute thunks that returned an error.
    pub const CACHE_COMPUTE_FAILURES_TOTAL: &str = "caseflow_cache_compute_failures_total";
    /// Calls that bypassed the cache because the store failed.
    pub const CACHE_FAIL_OPEN_TOTAL: &str = "caseflow_cache_fail_open_total";
    /// Entries removed by `forget`, `flush_tags` or expiry.
    pub const CACHE_INVALIDATED_TOTAL: &str = "caseflow_cache_invalidated_total";
    /// Invalidations that failed after retries.
    pub const CACHE_INVALIDATION_FAILURES_TOTAL: &str = "caseflow_cache_invalidation_failures_total";
    /// Backend call duration in seconds.
    pub const CACHE_STORE_OPERATION_DURATION: &str = "caseflow_cache_store_operation_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::CACHE_HITS_TOTAL, "Total number of cache hits");
    describe_counter!(names::CACHE_MISSES_TOTAL, "Total number of cache misses");
    describe_counter!(names::CACHE_COMPUTES_TOTAL, "Total number of compute thunks invoked");
    describe_counter!(
        names::CACHE_COMPUTE_FAILURES_TOTAL,
        "Total number of compute thunks that failed"
    );
    describe_counter!(
        names::CACHE_FAIL_OPEN_TOTAL,
        "Total number of calls that bypassed an unavailable cache store"
    );
    describe_counter!(
        names::CACHE_INVALIDATED_TOTAL,
        "Total number of cache entries removed"
    );
    describe_counter!(
        names::CACHE_INVALIDATION_FAILURES_TOTAL,
        "Total number of invalidations that failed after retries"
    );
    describe_histogram!(
        names::CACHE_STORE_OPERATION_DURATION,
        "Cache backend operation duration in seconds"
    );
}

/// Namespace label of a key: everything before the last `_`.
pub(crate) fn namespace_of(key: &str) -> &str {
    key.rsplit_once('_').map_or(key, |(ns, _)| ns)
}

/// Cache metrics recorder.
#[derive(Clone)]
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn hit(namespace: &str) {
        counter!(names::CACHE_HITS_TOTAL, "namespace" => namespace.to_string()).increment(1);
    }

    pub fn miss(namespace: &str) {
        counter!(names::CACHE_MISSES_TOTAL, "namespace" => namespace.to_string()).increment(1);
    }

    pub fn compute(namespace: &str) {
        counter!(names::CACHE_COMPUTES_TOTAL, "namespace" => namespace.to_string()).increment(1);
    }

    pub fn compute_failed(namespace: &str) {
        counter!(names::CACHE_COMPUTE_FAILURES_TOTAL, "namespace" => namespace.to_string()).increment(1);
    }

    /// Record a store failure that was absorbed.
    pub fn fail_open(operation: &str, kind: &str) {
        counter!(
            names::CACHE_FAIL_OPEN_TOTAL,
            "operation" => operation.to_string(),
            "error" => kind.to_string()
        )
        .increment(1);
    }

    /// Record removed entries. `reason` is `forget`, `flush` or `expired`.
    pub fn invalidated(reason: &str, count: u64) {
        if count > 0 {
            counter!(names::CACHE_INVALIDATED_TOTAL, "reason" => reason.to_string()).increment(count);
        }
    }

    pub fn invalidation_failed(operation: &str) {
        counter!(
            names::CACHE_INVALIDATION_FAILURES_TOTAL,
            "operation" => operation.to_string()
        )
        .increment(1);
    }

    /// Record a backend call.
    pub fn store_operation(backend: &str, operation: &str, duration: Duration, success: bool) {
        histogram!(
            names::CACHE_STORE_OPERATION_DURATION,
            "backend" => backend.to_string(),
            "operation" => operation.to_string(),
            "status" => if success { "success" } else { "error" }
        )
        .record(duration.as_secs_f64());
    }
}
