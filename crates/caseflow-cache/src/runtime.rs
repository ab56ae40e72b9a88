//! Startup and shutdown wiring for the query cache.

use crate::entity::EntityCache;
use crate::error::{CacheError, CacheResult};
use crate::interface::CacheInterface;
use crate::metrics::register_metrics;
use crate::orchestrator::CacheOrchestrator;
use crate::store::{create_pool, RedisEntryStore, RedisKeys, RedisTagIndex};
use crate::sweeper::{Sweeper, SweeperHandle};
use crate::tags::EntityTags;
use caseflow_config::{CacheBackend, CacheConfig, RedisConfig};
use caseflow_core::CaseflowError;
use std::sync::Arc;
use tracing::info;

/// Owns the orchestrator and its background sweeper for the lifetime of the
/// application.
pub struct CacheRuntime {
    cache: Arc<CacheOrchestrator>,
    sweeper: Option<SweeperHandle>,
}

impl CacheRuntime {
    /// Builds the configured backend and starts the sweeper.
    ///
    /// The sweeper only runs for the in-memory backend; Redis expires
    /// entries itself.
    pub async fn start(config: &CacheConfig, redis: &RedisConfig) -> CacheResult<Self> {
        config.validate().map_err(|e| match e {
            CaseflowError::Configuration(msg) => CacheError::Configuration(msg),
            other => CacheError::Configuration(other.to_string()),
        })?;
        register_metrics();

        let cache = if !config.enabled {
            info!("Query cache disabled, every read computes");
            CacheOrchestrator::in_memory(config)
        } else {
            match config.backend {
                CacheBackend::Memory => CacheOrchestrator::in_memory(config),
                CacheBackend::Redis => {
                    let pool = create_pool(redis).await?;
                    let keys = RedisKeys::new(config.key_prefix.as_str());
                    CacheOrchestrator::new(
                        Arc::new(RedisEntryStore::new(pool.clone(), keys.clone())),
                        Arc::new(RedisTagIndex::new(pool, keys)),
                        config,
                    )
                }
            }
        };
        let cache = Arc::new(cache);

        let sweeper = match config.sweep_interval() {
            Some(every) if config.enabled && config.backend == CacheBackend::Memory => {
                Some(Sweeper::new(Arc::clone(&cache), every).spawn())
            }
            _ => None,
        };

        info!(
            enabled = config.enabled,
            backend = cache.backend(),
            default_ttl_secs = config.default_ttl_secs,
            single_flight = config.single_flight,
            sweeper = sweeper.is_some(),
            "Query cache started"
        );

        Ok(Self { cache, sweeper })
    }

    /// The concrete orchestrator, for stats and sweeping.
    pub fn orchestrator(&self) -> Arc<CacheOrchestrator> {
        Arc::clone(&self.cache)
    }

    /// The orchestrator as an injectable interface.
    pub fn cache(&self) -> Arc<dyn CacheInterface> {
        self.cache.clone()
    }

    /// A facade for one entity family.
    pub fn entity(&self, singular: &str, plural: &str) -> EntityCache {
        EntityCache::new(self.cache(), EntityTags::new(singular, plural))
    }

    pub fn has_sweeper(&self) -> bool {
        self.sweeper.is_some()
    }

    /// Stops the sweeper. Entries are left as they are.
    pub async fn shutdown(self) {
        if let Some(sweeper) = self.sweeper {
            sweeper.shutdown().await;
        }
        info!("Query cache stopped");
    }
}
