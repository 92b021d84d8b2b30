//! # Cheo Knowledge Graph Query Cache (cheo-kg)
//!
//! Query-result caching and invalidation for a knowledge-graph browser of
//! chèo theatre: characters, plays, actors, scenes and quotes.
//!
//! ## Features
//!
//! - Per-call policy switch between cached and direct execution
//! - Deterministic, case-folded cache keys grouped by domain
//! - Stale-while-revalidate reads with background refresh
//! - Cascading, at-least-once invalidation on entity mutation
//! - Bounded retry with exhausted vs non-retryable failures kept apart
//! - Graceful degradation when the cache backend is unavailable
//!
//! ## Usage
//!
//! ```no_run
//! use cheo_kg::cache::{EntityType, QueryCache, QueryDescriptor};
//! use cheo_kg::error::FetchError;
//! use cheo_kg::schema::Play;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = QueryCache::from_env()?;
//!
//!     let plays: Vec<Play> = cache
//!         .query(&QueryDescriptor::plays_by_character("Thị Mầu"), || async {
//!             Ok::<_, FetchError>(vec![Play::new("Quan Âm Thị Kính")])
//!         })
//!         .await?;
//!     println!("{} plays", plays.len());
//!
//!     let report = cache.on_mutation(EntityType::Character, "Thị Mầu").await;
//!     println!("Invalidated {} entries", report.removed);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! [`CacheConfig::from_env`](cache::CacheConfig::from_env) reads `KG_CACHE_*`
//! variables (and a `.env` file if present). See [`cache::config`].

pub mod cache;
pub mod error;
pub mod retry;
pub mod schema;

pub use cache::{CacheConfig, CachePolicy, QueryCache, QueryDescriptor};
pub use error::{CacheError, FetchError, QueryError, Result};
pub use retry::{with_retry, RetryError, RetryPolicy};
