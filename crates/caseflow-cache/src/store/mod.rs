//! Backing-store contracts and their implementations.
//!
//! The orchestrator reaches the backing medium only through [`EntryStore`]
//! and [`TagIndex`]. Both are object-safe so backends can be swapped at
//! startup.

mod memory;
mod redis_store;

pub use self::memory::{MemoryEntryStore, MemoryTagIndex};
pub use self::redis_store::{create_pool, RedisEntryStore, RedisKeys, RedisTagIndex};

use crate::error::CacheResult;
use crate::key::CacheKey;
use crate::tags::TagSet;
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

/// A serialized value together with the tags it was stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// JSON payload.
    pub payload: String,
    /// Tags the entry is attached to.
    pub tags: TagSet,
}

impl StoredEntry {
    pub fn new(payload: impl Into<String>, tags: TagSet) -> Self {
        Self {
            payload: payload.into(),
            tags,
        }
    }
}

/// Outcome of an entry lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// The entry exists and has not expired.
    Fresh(StoredEntry),
    /// The entry had expired and has just been removed. Carries the tags it
    /// was attached to so the caller can detach it.
    Expired(TagSet),
    /// No entry under this key.
    Absent,
}

/// Key/value storage with per-entry expiry.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Looks up an entry. An expired entry is removed and reported as
    /// [`Fetched::Expired`].
    async fn get(&self, key: &CacheKey) -> CacheResult<Fetched>;

    /// Stores an entry, replacing any previous one and resetting its expiry.
    ///
    /// Returns the tags of the replaced entry, if there was one.
    async fn put(&self, key: &CacheKey, entry: StoredEntry, ttl: Duration) -> CacheResult<Option<TagSet>>;

    /// Removes an entry, returning the tags it carried if it existed.
    async fn delete(&self, key: &CacheKey) -> CacheResult<Option<TagSet>>;

    /// Removes every expired entry, returning each removed key with its tags.
    ///
    /// Backends with native expiry have nothing to purge.
    async fn purge_expired(&self) -> CacheResult<Vec<(CacheKey, TagSet)>> {
        Ok(Vec::new())
    }

    /// Backend name used in logs and metrics.
    fn backend(&self) -> &'static str;
}

/// Many-to-many mapping from tags to keys.
#[async_trait]
pub trait TagIndex: Send + Sync {
    /// Adds `key` under `tag`. `ttl` is the lifetime of the entry being
    /// attached; backends that expire tag sets keep them at least that long.
    async fn attach(&self, tag: &str, key: &CacheKey, ttl: Duration) -> CacheResult<()>;

    /// Removes `key` from `tag`.
    async fn detach(&self, tag: &str, key: &CacheKey) -> CacheResult<()>;

    /// Removes each of `keys` from `tag`. Repeating the call is harmless.
    async fn detach_keys(&self, tag: &str, keys: &HashSet<CacheKey>) -> CacheResult<()>;

    /// Returns the keys currently under `tag`.
    async fn keys_for(&self, tag: &str) -> CacheResult<HashSet<CacheKey>>;

    /// Removes `tag` and returns its keys in one step. An `attach` racing
    /// with this call lands either in the returned set or in a fresh set.
    ///
    /// Not idempotent: a second call returns nothing, so a call that failed
    /// after reaching the backend must not simply be repeated.
    async fn drop_tag(&self, tag: &str) -> CacheResult<HashSet<CacheKey>>;
}
