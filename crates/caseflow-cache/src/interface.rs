//! Cache interface trait and the typed `remember` operations built on it.

use crate::error::CacheResult;
use crate::flight::FlightPermit;
use crate::key::{CacheKey, QueryKey};
use crate::metrics::{namespace_of, CacheMetrics};
use crate::tags::TagSet;
use async_trait::async_trait;
use caseflow_core::Interface;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Type-erased cache operations.
///
/// Values cross this trait as JSON strings so it stays dyn-compatible;
/// [`CacheExt`] adds the typed layer on top.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheInterface: Interface + Send + Sync {
    /// Returns the payload stored under `key`, or `None` on a miss.
    ///
    /// An `Err` means the store could not answer; callers fail open.
    async fn lookup(&self, key: &CacheKey) -> CacheResult<Option<String>>;

    /// Stores a payload and attaches it to every tag. The entry is written
    /// before any tag references it.
    async fn store(&self, key: &CacheKey, payload: String, ttl: Duration, tags: &TagSet) -> CacheResult<()>;

    /// Removes an entry and detaches it from all of its tags.
    ///
    /// Returns `true` if an entry was removed.
    async fn forget(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Removes every entry carrying any of `tags`.
    ///
    /// Returns the number of entries removed; flushing the same tags again
    /// right away returns 0.
    async fn flush_tags(&self, tags: &TagSet) -> CacheResult<u64>;

    /// Serializes computation of `key` when single-flight is on.
    async fn acquire_flight(&self, key: &CacheKey) -> Option<FlightPermit>;

    /// TTL used when the caller has no preference.
    fn default_ttl(&self) -> Duration;

    /// Check if caching is enabled.
    fn is_enabled(&self) -> bool;
}

/// Typed read-through operations.
#[async_trait]
pub trait CacheExt: CacheInterface {
    /// Returns the cached value for `key`, computing and caching it on a miss.
    ///
    /// A compute error is returned unchanged and nothing is cached. Store
    /// failures never reach the caller: the value is computed directly.
    async fn remember_key<T, E, F, Fut>(&self, key: &CacheKey, ttl: Duration, tags: &TagSet, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        E: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let namespace = namespace_of(key.as_str());

        if !self.is_enabled() {
            return run_compute(namespace, compute).await;
        }

        match self.lookup(key).await {
            Ok(Some(payload)) => {
                if let Some(value) = decode(key, &payload) {
                    return Ok(value);
                }
                if let Err(e) = self.forget(key).await {
                    warn!(key = %key, error = %e, "Failed to forget undecodable cache entry");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed, computing without cache");
                return run_compute(namespace, compute).await;
            }
        }

        let permit = self.acquire_flight(key).await;
        if permit.as_ref().is_some_and(FlightPermit::waited) {
            if let Ok(Some(payload)) = self.lookup(key).await {
                if let Some(value) = decode(key, &payload) {
                    return Ok(value);
                }
            }
        }

        let value = run_compute(namespace, compute).await?;

        match serde_json::to_string(&value) {
            Ok(payload) => {
                if let Err(e) = self.store(key, payload, ttl, tags).await {
                    warn!(key = %key, error = %e, "Failed to cache computed value");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Computed value is not serializable, not caching"),
        }

        drop(permit);
        Ok(value)
    }

    /// [`remember_key`](Self::remember_key) for a derived query key.
    async fn remember<T, E, F, Fut>(&self, query: &QueryKey, ttl: Duration, tags: &TagSet, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        E: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let key = query.derive();
        self.remember_key(&key, ttl, tags, compute).await
    }
}

// Blanket implementation for all CacheInterface implementations
impl<C: CacheInterface + ?Sized> CacheExt for C {}

fn decode<T: DeserializeOwned>(key: &CacheKey, payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key = %key, error = %e, "Discarding undecodable cache payload");
            None
        }
    }
}

async fn run_compute<T, E, F, Fut>(namespace: &str, compute: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    debug!(namespace, "Computing value");
    CacheMetrics::compute(namespace);
    let result = compute().await;
    if result.is_err() {
        CacheMetrics::compute_failed(namespace);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use mockall::predicate::eq;

    fn key() -> CacheKey {
        QueryKey::new("cases").filter("status", "open").derive()
    }

    #[tokio::test]
    async fn test_hit_skips_compute() {
        let mut cache = MockCacheInterface::new();
        cache.expect_is_enabled().return_const(true);
        cache
            .expect_lookup()
            .with(eq(key()))
            .times(1)
            .returning(|_| Ok(Some("[1,2,3]".to_string())));
        cache.expect_store().never();

        let value: Result<Vec<u32>, String> = cache
            .remember_key(&key(), Duration::from_secs(60), &TagSet::new(), || async {
                Err("compute ran on a hit".to_string())
            })
            .await;

        assert_eq!(value.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_miss_computes_and_stores() {
        let mut cache = MockCacheInterface::new();
        cache.expect_is_enabled().return_const(true);
        cache.expect_lookup().returning(|_| Ok(None));
        cache.expect_acquire_flight().returning(|_| None);
        cache
            .expect_store()
            .withf(|k, payload, ttl, tags| {
                *k == key() && payload == "\"fresh\"" && *ttl == Duration::from_secs(60) && tags.contains("cases_list")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let value: Result<String, String> = cache
            .remember_key(&key(), Duration::from_secs(60), &TagSet::from(["cases_list"]), || async {
                Ok("fresh".to_string())
            })
            .await;

        assert_eq!(value.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_compute_error_is_not_stored() {
        let mut cache = MockCacheInterface::new();
        cache.expect_is_enabled().return_const(true);
        cache.expect_lookup().returning(|_| Ok(None));
        cache.expect_acquire_flight().returning(|_| None);
        cache.expect_store().never();

        let value: Result<String, String> = cache
            .remember_key(&key(), Duration::from_secs(60), &TagSet::new(), || async {
                Err("database down".to_string())
            })
            .await;

        assert_eq!(value.unwrap_err(), "database down");
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_open() {
        let mut cache = MockCacheInterface::new();
        cache.expect_is_enabled().return_const(true);
        cache
            .expect_lookup()
            .returning(|_| Err(CacheError::StoreUnavailable("refused".into())));
        cache.expect_store().never();

        let value: Result<u32, String> = cache
            .remember_key(&key(), Duration::from_secs(60), &TagSet::new(), || async { Ok(5) })
            .await;

        assert_eq!(value.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_store_failure_still_returns_value() {
        let mut cache = MockCacheInterface::new();
        cache.expect_is_enabled().return_const(true);
        cache.expect_lookup().returning(|_| Ok(None));
        cache.expect_acquire_flight().returning(|_| None);
        cache
            .expect_store()
            .returning(|_, _, _, _| Err(CacheError::Timeout(Duration::from_millis(250))));

        let value: Result<u32, String> = cache
            .remember_key(&key(), Duration::from_secs(60), &TagSet::new(), || async { Ok(9) })
            .await;

        assert_eq!(value.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_forgotten_and_recomputed() {
        let mut cache = MockCacheInterface::new();
        cache.expect_is_enabled().return_const(true);
        cache
            .expect_lookup()
            .returning(|_| Ok(Some("{\"legacy\":true}".to_string())));
        cache.expect_forget().times(1).returning(|_| Ok(true));
        cache.expect_acquire_flight().returning(|_| None);
        cache.expect_store().times(1).returning(|_, _, _, _| Ok(()));

        let value: Result<Vec<u32>, String> = cache
            .remember_key(&key(), Duration::from_secs(60), &TagSet::new(), || async { Ok(vec![4]) })
            .await;

        assert_eq!(value.unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_computes() {
        let mut cache = MockCacheInterface::new();
        cache.expect_is_enabled().return_const(false);
        cache.expect_lookup().never();
        cache.expect_store().never();

        let query = QueryKey::new("cases");
        let value: Result<u32, String> = cache
            .remember(&query, Duration::from_secs(60), &TagSet::new(), || async { Ok(1) })
            .await;

        assert_eq!(value.unwrap(), 1);
    }
}
