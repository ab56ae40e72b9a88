//! Common test infrastructure for cache integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use caseflow_cache::{
    CacheError, CacheKey, CacheOrchestrator, CacheResult, EntryStore, Fetched, MemoryEntryStore, MemoryTagIndex,
    StoredEntry, TagIndex, TagSet,
};
use caseflow_config::{BreakerConfig, CacheConfig, InvalidationRetryConfig};
use std::collections::HashSet;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TTL: Duration = Duration::from_secs(600);

/// Cache configuration with fast retries and a breaker that never trips.
pub fn test_config() -> CacheConfig {
    CacheConfig {
        invalidation_retry: InvalidationRetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
        },
        breaker: BreakerConfig {
            failure_threshold: 1_000,
            success_threshold: 1,
            open_secs: 30,
        },
        ..CacheConfig::default()
    }
}

/// Counts compute invocations.
#[derive(Clone, Default)]
pub struct Counter {
    calls: Arc<AtomicUsize>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// A compute closure returning `value`.
    pub fn returning<T: Send>(&self, value: T) -> impl FnOnce() -> Ready<Result<T, String>> + Send {
        let calls = Arc::clone(&self.calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            ready(Ok(value))
        }
    }

    /// A compute closure failing with `message`.
    pub fn failing<T: Send>(&self, message: &str) -> impl FnOnce() -> Ready<Result<T, String>> + Send {
        let calls = Arc::clone(&self.calls);
        let message = message.to_string();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            ready(Err(message))
        }
    }
}

/// Shared switch that makes the wrapped stores fail.
#[derive(Clone, Default)]
pub struct Outage {
    down: Arc<AtomicBool>,
    failures_left: Arc<AtomicU32>,
    calls: Arc<AtomicUsize>,
}

impl Outage {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fails the next `n` calls, then recovers.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Calls that reached the stores, failed or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::StoreUnavailable("connection refused".to_string()));
        }
        let transient = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(CacheError::StoreUnavailable("connection reset".to_string()));
        }
        Ok(())
    }
}

/// Entry store that fails while its outage switch is on.
pub struct FlakyEntryStore {
    inner: Arc<MemoryEntryStore>,
    outage: Outage,
}

#[async_trait]
impl EntryStore for FlakyEntryStore {
    async fn get(&self, key: &CacheKey) -> CacheResult<Fetched> {
        self.outage.check()?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &CacheKey, entry: StoredEntry, ttl: Duration) -> CacheResult<Option<TagSet>> {
        self.outage.check()?;
        self.inner.put(key, entry, ttl).await
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<Option<TagSet>> {
        self.outage.check()?;
        self.inner.delete(key).await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

/// Tag index that fails while its outage switch is on.
pub struct FlakyTagIndex {
    inner: Arc<MemoryTagIndex>,
    outage: Outage,
}

#[async_trait]
impl TagIndex for FlakyTagIndex {
    async fn attach(&self, tag: &str, key: &CacheKey, ttl: Duration) -> CacheResult<()> {
        self.outage.check()?;
        self.inner.attach(tag, key, ttl).await
    }

    async fn detach(&self, tag: &str, key: &CacheKey) -> CacheResult<()> {
        self.outage.check()?;
        self.inner.detach(tag, key).await
    }

    async fn detach_keys(&self, tag: &str, keys: &HashSet<CacheKey>) -> CacheResult<()> {
        self.outage.check()?;
        self.inner.detach_keys(tag, keys).await
    }

    async fn keys_for(&self, tag: &str) -> CacheResult<HashSet<CacheKey>> {
        self.outage.check()?;
        self.inner.keys_for(tag).await
    }

    async fn drop_tag(&self, tag: &str) -> CacheResult<HashSet<CacheKey>> {
        self.outage.check()?;
        self.inner.drop_tag(tag).await
    }
}

/// Orchestrator over in-memory stores that tests can inspect directly.
pub struct TestCache {
    pub cache: Arc<CacheOrchestrator>,
    pub entries: Arc<MemoryEntryStore>,
    pub index: Arc<MemoryTagIndex>,
}

impl TestCache {
    pub fn new() -> Self {
        Self::with_config(&test_config())
    }

    pub fn with_config(config: &CacheConfig) -> Self {
        let entries = Arc::new(MemoryEntryStore::new());
        let index = Arc::new(MemoryTagIndex::new());
        let cache = Arc::new(CacheOrchestrator::new(entries.clone(), index.clone(), config));
        Self { cache, entries, index }
    }

    /// Every key under each tag points at an entry that carries the tag.
    pub async fn assert_index_consistent(&self, tags: &[&str]) {
        for tag in tags {
            for key in self.index.keys_for(tag).await.unwrap() {
                match self.entries.get(&key).await.unwrap() {
                    Fetched::Fresh(entry) => assert!(
                        entry.tags.contains(tag),
                        "entry {key} is indexed under {tag} but does not carry it"
                    ),
                    other => panic!("tag {tag} references {key}, which is {other:?}"),
                }
            }
        }
    }
}

/// Orchestrator over stores that fail on demand.
pub struct FlakyCache {
    pub cache: Arc<CacheOrchestrator>,
    pub outage: Outage,
    pub entries: Arc<MemoryEntryStore>,
    pub index: Arc<MemoryTagIndex>,
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::with_config(&test_config())
    }

    pub fn with_config(config: &CacheConfig) -> Self {
        let outage = Outage::default();
        let entries = Arc::new(MemoryEntryStore::new());
        let index = Arc::new(MemoryTagIndex::new());
        let cache = Arc::new(CacheOrchestrator::new(
            Arc::new(FlakyEntryStore {
                inner: entries.clone(),
                outage: outage.clone(),
            }),
            Arc::new(FlakyTagIndex {
                inner: index.clone(),
                outage: outage.clone(),
            }),
            config,
        ));
        Self {
            cache,
            outage,
            entries,
            index,
        }
    }
}
