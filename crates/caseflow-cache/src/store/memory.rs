//! Process-local backend.

use super::{EntryStore, Fetched, StoredEntry, TagIndex};
use crate::error::CacheResult;
use crate::key::CacheKey;
use crate::tags::TagSet;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

struct MemoryEntry {
    entry: StoredEntry,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Entry store backed by a `HashMap`.
///
/// Expiry uses `tokio::time::Instant`, so paused-clock tests can advance it.
#[derive(Default)]
pub struct MemoryEntryStore {
    entries: RwLock<HashMap<CacheKey, MemoryEntry>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether a live entry exists under `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .get(key)
            .is_some_and(|e| !e.is_expired(Instant::now()))
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn get(&self, key: &CacheKey) -> CacheResult<Fetched> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(Fetched::Absent),
                Some(e) if !e.is_expired(now) => return Ok(Fetched::Fresh(e.entry.clone())),
                Some(_) => {}
            }
        }

        // Expired under the read lock. A concurrent put may have replaced it
        // since, so decide again under the write lock.
        let mut entries = self.entries.write();
        match entries.get(key) {
            None => Ok(Fetched::Absent),
            Some(e) if !e.is_expired(now) => Ok(Fetched::Fresh(e.entry.clone())),
            Some(_) => Ok(entries
                .remove(key)
                .map_or(Fetched::Absent, |e| Fetched::Expired(e.entry.tags))),
        }
    }

    async fn put(&self, key: &CacheKey, entry: StoredEntry, ttl: Duration) -> CacheResult<Option<TagSet>> {
        let expires_at = Instant::now() + ttl;
        let replaced = self
            .entries
            .write()
            .insert(key.clone(), MemoryEntry { entry, expires_at });
        Ok(replaced.map(|e| e.entry.tags))
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<Option<TagSet>> {
        Ok(self.entries.write().remove(key).map(|e| e.entry.tags))
    }

    async fn purge_expired(&self) -> CacheResult<Vec<(CacheKey, TagSet)>> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();

        Ok(expired
            .into_iter()
            .filter_map(|key| entries.remove(&key).map(|e| (key, e.entry.tags)))
            .collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Tag index backed by a `HashMap` of key sets.
#[derive(Default)]
pub struct MemoryTagIndex {
    tags: RwLock<HashMap<String, HashSet<CacheKey>>>,
}

impl MemoryTagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tags with at least one key.
    pub fn tag_count(&self) -> usize {
        self.tags.read().len()
    }
}

#[async_trait]
impl TagIndex for MemoryTagIndex {
    async fn attach(&self, tag: &str, key: &CacheKey, _ttl: Duration) -> CacheResult<()> {
        self.tags
            .write()
            .entry(tag.to_string())
            .or_default()
            .insert(key.clone());
        Ok(())
    }

    async fn detach(&self, tag: &str, key: &CacheKey) -> CacheResult<()> {
        let mut tags = self.tags.write();
        if let Some(keys) = tags.get_mut(tag) {
            keys.remove(key);
            if keys.is_empty() {
                tags.remove(tag);
            }
        }
        Ok(())
    }

    async fn detach_keys(&self, tag: &str, keys: &HashSet<CacheKey>) -> CacheResult<()> {
        let mut tags = self.tags.write();
        if let Some(members) = tags.get_mut(tag) {
            members.retain(|k| !keys.contains(k));
            if members.is_empty() {
                tags.remove(tag);
            }
        }
        Ok(())
    }

    async fn keys_for(&self, tag: &str) -> CacheResult<HashSet<CacheKey>> {
        Ok(self.tags.read().get(tag).cloned().unwrap_or_default())
    }

    async fn drop_tag(&self, tag: &str) -> CacheResult<HashSet<CacheKey>> {
        Ok(self.tags.write().remove(tag).unwrap_or_default())
    }
}
