//! # Caseflow Cache
//!
//! Read-through query cache with tag-based invalidation.
//!
//! Results of expensive queries are stored under a key derived from the
//! query's namespace, filters and pagination, and attached to one or more
//! tags. A write to a record flushes the tags it affects, which removes every
//! cached query that could contain it.
//!
//! ```no_run
//! use caseflow_cache::{CacheExt, CacheInterface, CacheOrchestrator, QueryKey, TagSet};
//! use caseflow_config::CacheConfig;
//! use caseflow_core::PageRequest;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let cache = CacheOrchestrator::in_memory(&CacheConfig::default());
//! let query = QueryKey::new("beneficiaries")
//!     .filter("status", "active")
//!     .page(PageRequest::first());
//!
//! let names: Vec<String> = cache
//!     .remember(&query, Duration::from_secs(600), &TagSet::from(["beneficiaries_list"]), || async {
//!         Ok::<_, String>(vec!["Ana".to_string()])
//!     })
//!     .await?;
//!
//! cache
//!     .flush_tags(&TagSet::from(["beneficiaries_list"]))
//!     .await
//!     .map_err(|e| e.to_string())?;
//! # Ok(())
//! # }
//! ```

pub mod entity;
pub mod error;
pub mod flight;
mod guard;
pub mod interface;
pub mod key;
pub mod metrics;
pub mod orchestrator;
pub mod runtime;
pub mod store;
pub mod sweeper;
pub mod tags;

pub use entity::EntityCache;
pub use error::{CacheError, CacheResult};
pub use flight::{FlightPermit, SingleFlight};
pub use interface::{CacheExt, CacheInterface};
pub use key::{derive_key, CacheKey, QueryKey};
pub use metrics::{register_metrics, CacheMetrics};
pub use orchestrator::{CacheOrchestrator, CacheStats};
pub use runtime::CacheRuntime;
pub use store::{EntryStore, Fetched, MemoryEntryStore, MemoryTagIndex, StoredEntry, TagIndex};
pub use sweeper::{Sweeper, SweeperHandle};
pub use tags::{EntityTags, TagSet};
