//! Redis backend.
//!
//! Entries are JSON envelopes stored with `SET .. EX`; tags are Redis sets
//! of entry keys. Redis expires entries on its own, so a tag set can keep a
//! member whose entry is already gone until the tag is flushed or the set
//! itself expires. Flushing such a member deletes nothing and is not counted.
//!
//! `put` uses `SET .. GET` to learn the replaced entry's tags, which needs
//! Redis 6.2 or later.

use super::{EntryStore, Fetched, StoredEntry, TagIndex};
use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::tags::TagSet;
use async_trait::async_trait;
use caseflow_config::RedisConfig;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

/// Adds a member and extends the set's expiry so it outlives the member.
const ATTACH_SCRIPT: &str = r#"
    redis.call("SADD", KEYS[1], ARGV[1])
    local ttl = redis.call("TTL", KEYS[1])
    if ttl < tonumber(ARGV[2]) then
        redis.call("EXPIRE", KEYS[1], ARGV[2])
    end
    return 1
"#;

/// Creates a Redis connection pool and checks it with `PING`.
pub async fn create_pool(config: &RedisConfig) -> CacheResult<Pool> {
    info!("Creating Redis connection pool for the query cache...");

    let pool = PoolConfig::from_url(&config.url)
        .builder()
        .map_err(|e| CacheError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| CacheError::Configuration(format!("Failed to create pool: {}", e)))?;

    let ping = async {
        let mut conn = pool.get().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok::<_, CacheError>(())
    };
    tokio::time::timeout(config.connect_timeout(), ping)
        .await
        .map_err(|_| CacheError::StoreUnavailable(format!("Redis did not answer PING within {:?}", config.connect_timeout())))??;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder for cache entries and tag sets.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Entry key (string: JSON envelope).
    pub fn entry(&self, key: &CacheKey) -> String {
        format!("{}:entry:{}", self.prefix, key)
    }

    /// Tag key (set of entry keys).
    pub fn tag(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.prefix, tag)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("caseflow:cache")
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    payload: String,
    tags: TagSet,
}

/// Tags recorded in a removed or replaced envelope.
///
/// An unreadable envelope yields no tags, so the key stays a member of
/// whatever sets referenced it until those tags are flushed.
fn envelope_tags(key: &CacheKey, raw: &str) -> TagSet {
    match serde_json::from_str::<Envelope>(raw) {
        Ok(envelope) => envelope.tags,
        Err(e) => {
            warn!(key = %key, error = %e, "Unreadable cache envelope, its tag memberships are left in place");
            TagSet::new()
        }
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Entry store on Redis strings.
#[derive(Clone)]
pub struct RedisEntryStore {
    pool: Pool,
    keys: RedisKeys,
}

impl RedisEntryStore {
    pub fn new(pool: Pool, keys: RedisKeys) -> Self {
        Self { pool, keys }
    }

    async fn conn(&self) -> CacheResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl EntryStore for RedisEntryStore {
    async fn get(&self, key: &CacheKey) -> CacheResult<Fetched> {
        let mut conn = self.conn().await?;
        let redis_key = self.keys.entry(key);
        let raw: Option<String> = conn.get(&redis_key).await?;

        let Some(raw) = raw else {
            return Ok(Fetched::Absent);
        };

        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => Ok(Fetched::Fresh(StoredEntry::new(envelope.payload, envelope.tags))),
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping unreadable cache envelope");
                let _: i64 = conn.del(&redis_key).await?;
                Ok(Fetched::Absent)
            }
        }
    }

    async fn put(&self, key: &CacheKey, entry: StoredEntry, ttl: Duration) -> CacheResult<Option<TagSet>> {
        let envelope = serde_json::to_string(&Envelope {
            payload: entry.payload,
            tags: entry.tags,
        })?;

        let mut conn = self.conn().await?;
        let replaced: Option<String> = redis::cmd("SET")
            .arg(self.keys.entry(key))
            .arg(envelope)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .arg("GET")
            .query_async(&mut *conn)
            .await?;

        Ok(replaced.map(|raw| envelope_tags(key, &raw)))
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<Option<TagSet>> {
        let mut conn = self.conn().await?;
        let redis_key = self.keys.entry(key);

        let (raw, _deleted): (Option<String>, i64) = redis::pipe()
            .atomic()
            .get(&redis_key)
            .del(&redis_key)
            .query_async(&mut *conn)
            .await?;

        Ok(raw.map(|raw| envelope_tags(key, &raw)))
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Tag index on Redis sets.
#[derive(Clone)]
pub struct RedisTagIndex {
    pool: Pool,
    keys: RedisKeys,
}

impl RedisTagIndex {
    pub fn new(pool: Pool, keys: RedisKeys) -> Self {
        Self { pool, keys }
    }

    async fn conn(&self) -> CacheResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

fn into_keys(members: Vec<String>) -> HashSet<CacheKey> {
    members.into_iter().filter_map(|m| CacheKey::new(m).ok()).collect()
}

#[async_trait]
impl TagIndex for RedisTagIndex {
    async fn attach(&self, tag: &str, key: &CacheKey, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let _: i32 = redis::Script::new(ATTACH_SCRIPT)
            .key(self.keys.tag(tag))
            .arg(key.as_str())
            .arg(ttl_secs(ttl))
            .invoke_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn detach(&self, tag: &str, key: &CacheKey) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.srem(self.keys.tag(tag), key.as_str()).await?;
        Ok(())
    }

    async fn detach_keys(&self, tag: &str, keys: &HashSet<CacheKey>) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let members: Vec<&str> = keys.iter().map(CacheKey::as_str).collect();
        let mut conn = self.conn().await?;
        let _: i64 = conn.srem(self.keys.tag(tag), members).await?;
        Ok(())
    }

    async fn keys_for(&self, tag: &str) -> CacheResult<HashSet<CacheKey>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.smembers(self.keys.tag(tag)).await?;
        Ok(into_keys(members))
    }

    async fn drop_tag(&self, tag: &str) -> CacheResult<HashSet<CacheKey>> {
        let mut conn = self.conn().await?;
        let tag_key = self.keys.tag(tag);

        let (members, _deleted): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .smembers(&tag_key)
            .del(&tag_key)
            .query_async(&mut *conn)
            .await?;

        Ok(into_keys(members))
    }
}
