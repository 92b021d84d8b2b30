//! # Query Result Cache
//!
//! Caching and invalidation for knowledge-graph reads.
//!
//! ## Features
//!
//! - **Policy Switch**: one flag decides cached versus direct execution per call
//! - **Key Taxonomy**: structured keys per domain and operation, case-folded names
//! - **Stale-While-Revalidate**: stale entries are served while a refresh runs
//! - **Cascading Invalidation**: a mutation evicts every read derived from the entity
//! - **Bounded Retry**: at most 3 attempts for reads, 2 for writes
//! - **LRU Eviction**: least recently used entries go first when the store is full
//!
//! ## Example
//!
//! ```rust
//! use cheo_kg::cache::{CacheConfig, QueryCache, QueryDescriptor};
//! use cheo_kg::schema::Character;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::builder()
//!     .default_lifetime(Duration::from_secs(300), Duration::from_secs(1800))
//!     .build();
//!
//! let cache = QueryCache::new(config)?;
//!
//! let character: Character = cache
//!     .query(&QueryDescriptor::view_character("Thị Mầu"), || async {
//!         Ok(Character::new("Thị Mầu"))
//!     })
//!     .await?;
//!
//! println!("Loaded {}", character.name);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod entry;
pub mod invalidation;
pub mod keys;
pub mod policy;
pub mod query;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, CacheConfigBuilder, EntryLifetime};
pub use entry::{CacheEntry, EntryState};
pub use invalidation::{
    rule_for, EntityType, InvalidationPlan, InvalidationReport, InvalidationRule, Invalidator, Mutation,
    Target,
};
pub use keys::{
    derive_key, derive_prefix, AiOp, CacheKey, Domain, KeyPrefix, LibraryOp, Operation, ParamRule,
    QueryDescriptor, SearchOp, ViewOp,
};
pub use policy::CachePolicy;
pub use query::QueryCache;
pub use store::{spawn_sweeper, CacheBackend, MemoryStore};
pub use types::{CacheStats, CacheValue};
