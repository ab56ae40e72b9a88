//! Read-through caching for one entity family.

use crate::error::CacheResult;
use crate::interface::{CacheExt, CacheInterface};
use crate::key::QueryKey;
use crate::tags::EntityTags;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Caches the list and detail reads of one entity family and flushes them
/// when a record changes.
///
/// ```no_run
/// # use caseflow_cache::{CacheOrchestrator, EntityCache, EntityTags};
/// # use caseflow_config::CacheConfig;
/// # use std::sync::Arc;
/// # async fn example() -> Result<(), String> {
/// let cache = Arc::new(CacheOrchestrator::in_memory(&CacheConfig::default()));
/// let beneficiaries = EntityCache::new(cache, EntityTags::new("beneficiary", "beneficiaries"));
///
/// let name: String = beneficiaries
///     .detail(42, || async { Ok::<_, String>("Ana".to_string()) })
///     .await?;
///
/// // After an update to record 42:
/// beneficiaries.invalidate(42).await.map_err(|e| e.to_string())?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EntityCache {
    cache: Arc<dyn CacheInterface>,
    tags: EntityTags,
    ttl: Duration,
}

impl EntityCache {
    /// Creates a facade using the cache's default TTL.
    pub fn new(cache: Arc<dyn CacheInterface>, tags: EntityTags) -> Self {
        let ttl = cache.default_ttl();
        Self { cache, tags, ttl }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn tags(&self) -> &EntityTags {
        &self.tags
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Starts a list query in the family's namespace.
    pub fn query(&self) -> QueryKey {
        QueryKey::new(self.tags.plural())
    }

    /// Cached list read, tagged with the list tag.
    pub async fn list<T, E, F, Fut>(&self, query: &QueryKey, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        E: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        self.cache.remember(query, self.ttl, &self.tags.list(), compute).await
    }

    /// Cached single-record read, tagged with the list tag and the record tag.
    pub async fn detail<T, E, F, Fut>(&self, id: impl Display, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        E: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let id = id.to_string();
        let query = QueryKey::new(self.tags.singular()).filter("id", id.as_str());
        let tags = self.tags.for_record(&id);
        self.cache.remember(&query, self.ttl, &tags, compute).await
    }

    /// Flushes the record's entries and every list of the family.
    pub async fn invalidate(&self, id: impl Display) -> CacheResult<u64> {
        let tags = self.tags.for_record(id);
        self.cache.flush_tags(&tags).await
    }

    /// Flushes every list of the family. Detail entries of records that did
    /// not change are flushed too, since they carry the list tag.
    pub async fn invalidate_all(&self) -> CacheResult<u64> {
        self.cache.flush_tags(&self.tags.list()).await
    }
}
