//! The cache orchestrator: entry store + tag index behind one interface.

use crate::error::{CacheError, CacheResult};
use crate::flight::{FlightPermit, SingleFlight};
use crate::guard::StoreGuard;
use crate::interface::CacheInterface;
use crate::key::CacheKey;
use crate::metrics::{namespace_of, CacheMetrics};
use crate::store::{EntryStore, Fetched, MemoryEntryStore, MemoryTagIndex, StoredEntry, TagIndex};
use crate::tags::TagSet;
use async_trait::async_trait;
use caseflow_config::CacheConfig;
use caseflow_resilience::{CircuitState, RetryPolicy};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Store failures absorbed by a read or write.
    pub fail_open: u64,
    /// Entries written.
    pub stored: u64,
    /// Entries removed by `forget`, `flush_tags` or expiry.
    pub invalidated: u64,
}

#[derive(Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    fail_open: AtomicU64,
    stored: AtomicU64,
    invalidated: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fail_open: self.fail_open.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }
}

/// Coordinates the entry store and the tag index.
///
/// Writes put the entry before attaching it to any tag; flushes drop a tag's
/// key set before deleting the entries in it, and an entry's remaining links
/// are removed before the entry itself. A live entry is therefore always
/// reachable from every tag it carries. A link can outlive its entry, which
/// only costs a delete that finds nothing.
pub struct CacheOrchestrator {
    entries: Arc<dyn EntryStore>,
    tags: Arc<dyn TagIndex>,
    guard: StoreGuard,
    flights: Option<SingleFlight>,
    retry: RetryPolicy,
    default_ttl: Duration,
    enabled: bool,
    stats: StatsCounters,
}

impl CacheOrchestrator {
    /// Creates an orchestrator over the given stores.
    pub fn new(entries: Arc<dyn EntryStore>, tags: Arc<dyn TagIndex>, config: &CacheConfig) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.invalidation_retry.max_attempts,
            initial_delay: Duration::from_millis(config.invalidation_retry.initial_delay_ms),
            max_delay: Duration::from_millis(config.invalidation_retry.max_delay_ms),
            multiplier: config.invalidation_retry.multiplier,
            jitter: true,
        };

        Self {
            guard: StoreGuard::new(entries.backend(), config.store_timeout(), &config.breaker),
            entries,
            tags,
            flights: config.single_flight.then(SingleFlight::new),
            retry,
            default_ttl: config.default_ttl(),
            enabled: config.enabled,
            stats: StatsCounters::default(),
        }
    }

    /// Creates an orchestrator over fresh in-memory stores.
    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(Arc::new(MemoryEntryStore::new()), Arc::new(MemoryTagIndex::new()), config)
    }

    /// Creates an orchestrator that stores nothing and always computes.
    pub fn disabled() -> Self {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        Self::in_memory(&config)
    }

    /// Replaces the invalidation retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Backend name.
    pub fn backend(&self) -> &'static str {
        self.guard.backend()
    }

    /// State of the breaker guarding the backend.
    pub fn breaker_state(&self) -> CircuitState {
        self.guard.breaker_state()
    }

    /// Removes expired entries and detaches them from their tags.
    ///
    /// Returns the number of entries removed.
    pub async fn sweep_expired(&self) -> CacheResult<u64> {
        if !self.enabled {
            return Ok(0);
        }

        let purged = self.guard.run("purge_expired", self.entries.purge_expired()).await?;
        for (key, tags) in &purged {
            self.detach_stale(key, tags).await;
        }

        let count = u64::try_from(purged.len()).unwrap_or(u64::MAX);
        if count > 0 {
            self.stats.invalidated.fetch_add(count, Ordering::Relaxed);
            CacheMetrics::invalidated("expired", count);
            debug!(count, "Swept expired cache entries");
        }
        Ok(count)
    }

    /// Runs a guarded backend call under the invalidation retry policy.
    async fn retrying<T, F, Fut>(&self, operation: &'static str, mut call: F) -> CacheResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        self.retry
            .execute_if(|| self.guard.run(operation, call()), CacheError::is_retryable)
            .await
    }

    /// Best-effort detach of `tags` from `key`.
    ///
    /// Tags carried by a live entry under `key` are kept: a concurrent write
    /// may have stored and attached it since the caller looked.
    async fn detach_stale(&self, key: &CacheKey, tags: &TagSet) {
        let live = match self.guard.run("get", self.entries.get(key)).await {
            Ok(Fetched::Fresh(entry)) => entry.tags,
            Ok(_) => TagSet::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "Entry state unknown, leaving its tag links in place");
                return;
            }
        };

        for tag in tags.iter().filter(|t| !live.contains(t)) {
            if let Err(e) = self.guard.run("detach", self.tags.detach(tag, key)).await {
                warn!(key = %key, tag, error = %e, "Failed to detach removed cache entry");
            }
        }
    }

    fn note_fail_open(&self, operation: &'static str, err: &CacheError) {
        self.stats.fail_open.fetch_add(1, Ordering::Relaxed);
        CacheMetrics::fail_open(operation, err.kind());
    }

    fn note_expired(&self) {
        self.stats.invalidated.fetch_add(1, Ordering::Relaxed);
        CacheMetrics::invalidated("expired", 1);
    }

    async fn put_and_attach(&self, key: &CacheKey, payload: String, ttl: Duration, tags: &TagSet) -> CacheResult<()> {
        let replaced = self
            .guard
            .run("put", self.entries.put(key, StoredEntry::new(payload, tags.clone()), ttl))
            .await?;

        for tag in tags.iter() {
            if let Err(e) = self.guard.run("attach", self.tags.attach(tag, key, ttl)).await {
                // The entry must not stay behind without its full set of tags.
                if let Err(rollback) = self.guard.run("delete", self.entries.delete(key)).await {
                    warn!(key = %key, error = %rollback, "Failed to roll back partially tagged cache entry");
                }
                let mut stale = tags.clone();
                if let Some(old) = &replaced {
                    stale.extend(old);
                }
                self.detach_stale(key, &stale).await;
                return Err(e);
            }
        }

        if let Some(old) = replaced {
            let dropped: TagSet = old.iter().filter(|t| !tags.contains(t)).collect();
            if !dropped.is_empty() {
                self.detach_stale(key, &dropped).await;
            }
        }

        Ok(())
    }

    /// Detaches an entry from its tags, then deletes it. `flushed` names a
    /// tag whose key set is already gone.
    ///
    /// Links are removed before the entry so that an entry written again in
    /// between keeps every link it attached. Returns `true` if a live entry
    /// was deleted.
    async fn remove_entry(&self, key: &CacheKey, flushed: Option<&str>) -> CacheResult<bool> {
        let tags = match self.retrying("get", || self.entries.get(key)).await? {
            Fetched::Fresh(entry) => entry.tags,
            Fetched::Expired(tags) => {
                self.note_expired();
                let rest: TagSet = tags.iter().filter(|t| Some(*t) != flushed).collect();
                self.detach_stale(key, &rest).await;
                return Ok(false);
            }
            Fetched::Absent => return Ok(false),
        };

        for tag in tags.iter().filter(|t| Some(*t) != flushed) {
            self.retrying("detach", || self.tags.detach(tag, key)).await?;
        }

        Ok(self.retrying("delete", || self.entries.delete(key)).await?.is_some())
    }

    /// Drops one tag and deletes its entries. Continues past failed keys and
    /// reports the first failure once the rest are done.
    async fn flush_tag(&self, tag: &str) -> CacheResult<u64> {
        let mut keys = self.retrying("keys_for", || self.tags.keys_for(tag)).await?;

        // `drop_tag` runs once. A failed call may still have removed the set,
        // so the snapshot above is detached instead of asking again.
        match self.guard.run("drop_tag", self.tags.drop_tag(tag)).await {
            Ok(dropped) => keys.extend(dropped),
            Err(e) => {
                warn!(tag, error = %e, keys = keys.len(), "Dropping cache tag failed, detaching its known keys");
                self.retrying("detach_keys", || self.tags.detach_keys(tag, &keys)).await?;
            }
        }

        let mut removed = 0u64;
        let mut failure = None;

        for key in &keys {
            match self.remove_entry(key, Some(tag)).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(key = %key, tag, error = %e, "Cache entry left in place after its tag was dropped");
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}

#[async_trait]
impl CacheInterface for CacheOrchestrator {
    async fn lookup(&self, key: &CacheKey) -> CacheResult<Option<String>> {
        if !self.enabled {
            return Ok(None);
        }

        let namespace = namespace_of(key.as_str());
        match self.guard.run("get", self.entries.get(key)).await {
            Ok(Fetched::Fresh(entry)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                CacheMetrics::hit(namespace);
                debug!(key = %key, "Cache hit");
                Ok(Some(entry.payload))
            }
            Ok(Fetched::Expired(tags)) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                CacheMetrics::miss(namespace);
                self.note_expired();
                debug!(key = %key, "Cache entry expired");
                self.detach_stale(key, &tags).await;
                Ok(None)
            }
            Ok(Fetched::Absent) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                CacheMetrics::miss(namespace);
                debug!(key = %key, "Cache miss");
                Ok(None)
            }
            Err(e) => {
                self.note_fail_open("get", &e);
                Err(e)
            }
        }
    }

    async fn store(&self, key: &CacheKey, payload: String, ttl: Duration, tags: &TagSet) -> CacheResult<()> {
        if !self.enabled {
            return Ok(());
        }

        match self.put_and_attach(key, payload, ttl, tags).await {
            Ok(()) => {
                self.stats.stored.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, tags = tags.len(), ttl_secs = ttl.as_secs(), "Cached computed value");
                Ok(())
            }
            Err(e) => {
                self.note_fail_open("put", &e);
                Err(e)
            }
        }
    }

    async fn forget(&self, key: &CacheKey) -> CacheResult<bool> {
        if !self.enabled {
            return Ok(false);
        }

        match self.remove_entry(key, None).await {
            Ok(removed) => {
                if removed {
                    self.stats.invalidated.fetch_add(1, Ordering::Relaxed);
                    CacheMetrics::invalidated("forget", 1);
                    debug!(key = %key, "Forgot cache entry");
                }
                Ok(removed)
            }
            Err(e) => {
                error!(key = %key, error = %e, attempts = self.retry.max_attempts, "Failed to forget cache entry");
                CacheMetrics::invalidation_failed("forget");
                Err(CacheError::invalidation(format!("key {key}"), e))
            }
        }
    }

    async fn flush_tags(&self, tags: &TagSet) -> CacheResult<u64> {
        if !self.enabled {
            return Ok(0);
        }

        let mut removed = 0u64;
        let mut failure = None;

        for tag in tags.iter() {
            match self.flush_tag(tag).await {
                Ok(count) => removed += count,
                Err(e) => {
                    error!(tag, error = %e, attempts = self.retry.max_attempts, "Failed to flush cache tag");
                    CacheMetrics::invalidation_failed("flush_tags");
                    failure.get_or_insert_with(|| CacheError::invalidation(format!("tag {tag}"), e));
                }
            }
        }

        if removed > 0 {
            self.stats.invalidated.fetch_add(removed, Ordering::Relaxed);
            CacheMetrics::invalidated("flush", removed);
        }
        debug!(tags = ?tags, removed, "Flushed cache tags");

        match failure {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    async fn acquire_flight(&self, key: &CacheKey) -> Option<FlightPermit> {
        match &self.flights {
            Some(flights) => Some(flights.acquire(key).await),
            None => None,
        }
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
