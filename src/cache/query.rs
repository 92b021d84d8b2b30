//! Query facade: cached reads with stale-while-revalidate
//!
//! [`QueryCache::query`] is the one entry point for reads. Given a
//! [`QueryDescriptor`] and a producer it either answers from the cache, answers
//! from the cache and refreshes in the background, or runs the producer under
//! the read retry budget and stores the result. Producer failures are never
//! cached. Backend failures are logged and the call falls through to the
//! producer, so callers only ever see a value or a
//! [`QueryError`](crate::error::QueryError).

use crate::cache::{
    clock::{Clock, SystemClock},
    config::CacheConfig,
    invalidation::{EntityType, InvalidationReport, Invalidator, Mutation},
    keys::{derive_key, CacheKey, QueryDescriptor},
    policy::CachePolicy,
    store::{spawn_sweeper, CacheBackend, MemoryStore},
    types::{CacheStats, CacheValue},
};
use crate::error::{CacheError, FetchError, Result};
use crate::retry::{with_retry, RetryPolicy};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cache-aware query executor shared by every caller in the process
pub struct QueryCache<B: ?Sized = MemoryStore<CacheValue>> {
    policy: CachePolicy,
    backend: Arc<B>,
    invalidator: Arc<Invalidator<B>>,
    clock: Arc<dyn Clock>,
}

impl<B: ?Sized> Clone for QueryCache<B> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            backend: Arc::clone(&self.backend),
            invalidator: Arc::clone(&self.invalidator),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl QueryCache<MemoryStore<CacheValue>> {
    /// Create a facade over a fresh in-memory store
    pub fn new(config: CacheConfig) -> Result<Self> {
        let backend = Arc::new(MemoryStore::new(config.clone()));
        Self::with_backend(config, backend)
    }

    /// Create a facade from `KG_CACHE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(CacheConfig::from_env()?)
    }
}

impl<B> QueryCache<B>
where
    B: CacheBackend<CacheValue> + ?Sized + 'static,
{
    /// Create a facade over an existing backend
    pub fn with_backend(config: CacheConfig, backend: Arc<B>) -> Result<Self> {
        config.validate()?;
        info!(
            "Query cache ready (enabled: {}, stale after {:?}, evict after {:?})",
            config.enabled, config.default_lifetime.stale_after, config.default_lifetime.evict_after
        );

        Ok(Self {
            policy: CachePolicy::new(config),
            invalidator: Arc::new(Invalidator::new(Arc::clone(&backend))),
            backend,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Run a read through the cache
    pub async fn query<T, F, Fut>(&self, descriptor: &QueryDescriptor, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        let producer = Arc::new(producer);
        let direct = Arc::clone(&producer);

        self.policy
            .execute_with_policy(
                descriptor,
                |config| self.cached_query(descriptor, config, producer),
                |config| async move {
                    let context = descriptor.to_string();
                    fetch(&*direct, &config.read_retry(), config.producer_timeout, &context).await
                },
            )
            .await
    }

    async fn cached_query<T, F, Fut>(
        &self,
        descriptor: &QueryDescriptor,
        config: Arc<CacheConfig>,
        producer: Arc<F>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        // One attempt, no delay, on the read path
        self.invalidator.flush_pending(&RetryPolicy::once()).await;

        let key = derive_key(descriptor);
        let context = key.to_string();
        let now = self.clock.now();

        let cached = match self.backend.get(&key, now).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Cache unavailable for {}, querying directly: {}", key, e);
                return fetch(&*producer, &config.read_retry(), config.producer_timeout, &context).await;
            }
        };

        if let Some(entry) = cached {
            let stale = entry.is_stale(now);
            match serde_json::from_value::<T>(entry.value) {
                Ok(value) => {
                    if stale {
                        debug!("Serving stale entry for {}, refreshing in background", key);
                        self.spawn_refresh(key, config, producer);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!("Cached value for {} could not be decoded, bypassing cache: {}", key, e);
                    if let Err(e) = self.backend.evict(&key).await {
                        debug!("Could not drop undecodable entry {}: {}", key, e);
                    }
                    return fetch(&*producer, &config.read_retry(), config.producer_timeout, &context).await;
                }
            }
        }

        let value = fetch(&*producer, &config.read_retry(), config.producer_timeout, &context).await?;
        let encoded = encode(&key, &value);
        if let Some(encoded) = encoded {
            store_value(&*self.backend, &*self.clock, key, encoded).await;
        }
        Ok(value)
    }

    fn spawn_refresh<T, F, Fut>(&self, key: CacheKey, config: Arc<CacheConfig>, producer: Arc<F>)
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let clock = Arc::clone(&self.clock);

        tokio::spawn(async move {
            let context = key.to_string();
            match fetch(&*producer, &config.read_retry(), config.producer_timeout, &context).await {
                Ok(value) => {
                    let encoded = encode(&key, &value);
                    if let Some(encoded) = encoded {
                        store_value(&*backend, &*clock, key, encoded).await;
                        debug!("Background refresh of {} complete", context);
                    }
                }
                Err(e) => warn!("Background refresh of {} failed, keeping stale entry: {}", context, e),
            }
        });
    }

    /// Run a write under the mutation retry budget, then invalidate what it touched
    pub async fn mutate<T, W, Fut>(&self, mutation: Mutation, writer: W) -> Result<T>
    where
        W: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, FetchError>>,
    {
        let config = self.policy.snapshot();
        let value = fetch(&writer, &config.mutation_retry(), config.producer_timeout, &mutation.to_string()).await?;

        let report = self.invalidator.on_mutation(&mutation, &config.mutation_retry()).await;
        debug!(
            "Mutation {} applied ({} entries invalidated, deferred: {})",
            mutation, report.removed, report.deferred
        );
        Ok(value)
    }

    /// Invalidate everything derived from one entity
    pub async fn on_mutation(&self, entity: EntityType, entity_id: &str) -> InvalidationReport {
        let mutation = Mutation::new(entity, entity_id);
        let retry = self.policy.snapshot().mutation_retry();
        self.invalidator.on_mutation(&mutation, &retry).await
    }

    /// Replay invalidations that failed earlier. Returns how many were applied.
    pub async fn flush_pending(&self) -> usize {
        let retry = self.policy.snapshot().mutation_retry();
        self.invalidator.flush_pending(&retry).await
    }

    pub fn pending_invalidations(&self) -> usize {
        self.invalidator.pending_len()
    }

    /// Drop every cached entry
    pub async fn clear_all(&self) -> std::result::Result<usize, CacheError> {
        let removed = self.backend.clear().await?;
        info!("Query cache cleared ({} entries)", removed);
        Ok(removed)
    }

    pub async fn cache_stats(&self) -> std::result::Result<CacheStats, CacheError> {
        self.backend.stats().await
    }

    /// Validate and swap in a new configuration
    pub async fn reload(&self, config: CacheConfig) -> Result<()> {
        self.policy.reload(config.clone())?;
        if let Err(e) = self.backend.reconfigure(&config).await {
            warn!("Cache backend did not accept new configuration: {}", e);
        }
        Ok(())
    }

    /// Start the expiry sweeper if auto cleanup is enabled
    pub fn start_sweeper(&self) -> Option<JoinHandle<()>> {
        let config = self.policy.snapshot();
        if !config.enable_auto_cleanup {
            return None;
        }
        Some(spawn_sweeper::<CacheValue, B>(
            Arc::clone(&self.backend),
            Arc::clone(&self.clock),
            config.cleanup_interval,
        ))
    }
}

/// Run `producer` under `retry`, bounding each attempt by `timeout`
async fn fetch<T, F, Fut>(producer: &F, retry: &RetryPolicy, timeout: Duration, context: &str) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, FetchError>>,
{
    let value = with_retry(
        retry,
        || attempt_with_timeout(producer(), timeout, context),
        FetchError::is_transient,
    )
    .await?;
    Ok(value)
}

async fn attempt_with_timeout<T, Fut>(attempt: Fut, timeout: Duration, context: &str) -> std::result::Result<T, FetchError>
where
    Fut: Future<Output = std::result::Result<T, FetchError>>,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
            context: context.to_string(),
        }),
    }
}

fn encode<T: Serialize>(key: &CacheKey, value: &T) -> Option<CacheValue> {
    match serde_json::to_value(value) {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            warn!("Could not encode value for {}: {}", key, CacheError::from(e));
            None
        }
    }
}

/// Store a fetched value. Failures are logged; the caller already has its value.
async fn store_value<B>(backend: &B, clock: &dyn Clock, key: CacheKey, value: CacheValue)
where
    B: CacheBackend<CacheValue> + ?Sized,
{
    let label = key.to_string();
    if let Err(e) = backend.put(key, value, clock.now()).await {
        warn!("Could not cache {}: {}", label, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::error::QueryError;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_producer(
        calls: Arc<AtomicU32>,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = std::result::Result<CacheValue, FetchError>> + Send>>
           + Send
           + Sync
           + 'static {
        move || {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({ "version": n }))
            })
        }
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_producer() {
        let cache = QueryCache::new(CacheConfig::default()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let descriptor = QueryDescriptor::view_character("Thị Mầu");

        let first: CacheValue = cache.query(&descriptor, counting_producer(calls.clone())).await.unwrap();
        let second: CacheValue = cache.query(&descriptor, counting_producer(calls.clone())).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = QueryCache::new(CacheConfig::builder().retry_delay(Duration::ZERO).build()).unwrap();
        let descriptor = QueryDescriptor::library_plays();

        let result: Result<CacheValue> = cache
            .query(&descriptor, || async { Err(FetchError::Permanent("rejected".to_string())) })
            .await;
        assert_eq!(result, Err(QueryError::Fetch(FetchError::Permanent("rejected".to_string()))));
        assert_eq!(cache.cache_stats().await.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn test_timeout_is_transient_and_retried() {
        let config = CacheConfig::builder()
            .producer_timeout(Duration::from_millis(10))
            .retry_delay(Duration::ZERO)
            .read_max_attempts(2)
            .build();
        let cache = QueryCache::new(config).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<CacheValue> = cache
            .query(&QueryDescriptor::view_actor("slow"), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(json!(null))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(QueryError::RetriesExhausted { attempts: 2, last: FetchError::Timeout { timeout_ms, .. } }) => {
                assert_eq!(timeout_ms, 10);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_bypassed_and_dropped() {
        let cache = QueryCache::new(CacheConfig::default()).unwrap();
        let descriptor = QueryDescriptor::view_play("Kim Nham");
        let key = derive_key(&descriptor);
        cache.backend().put(key.clone(), json!("not a number"), Utc::now()).await;

        let value: u32 = cache.query(&descriptor, || async { Ok(7u32) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(!cache.backend().contains_key(&key).await);
    }

    #[tokio::test]
    async fn test_mutate_invalidates() {
        let cache = QueryCache::new(CacheConfig::default()).unwrap();
        let descriptor = QueryDescriptor::view_actor("Kim Nham");
        let _: CacheValue = cache.query(&descriptor, || async { Ok(json!("old")) }).await.unwrap();

        let saved = cache
            .mutate(Mutation::new(EntityType::Actor, "Kim Nham"), || async { Ok("saved") })
            .await
            .unwrap();
        assert_eq!(saved, "saved");

        let fresh: CacheValue = cache.query(&descriptor, || async { Ok(json!("new")) }).await.unwrap();
        assert_eq!(fresh, json!("new"));
    }

    #[tokio::test]
    async fn test_failed_mutation_does_not_invalidate() {
        let cache = QueryCache::new(CacheConfig::builder().retry_delay(Duration::ZERO).build()).unwrap();
        let descriptor = QueryDescriptor::view_actor("Kim Nham");
        let _: CacheValue = cache.query(&descriptor, || async { Ok(json!("old")) }).await.unwrap();

        let result: Result<()> = cache
            .mutate(Mutation::new(EntityType::Actor, "Kim Nham"), || async {
                Err(FetchError::Transient("write timed out".to_string()))
            })
            .await;
        assert!(matches!(result, Err(QueryError::RetriesExhausted { attempts: 2, .. })));
        assert_eq!(cache.cache_stats().await.unwrap().total_entries, 1);
    }

    #[tokio::test]
    async fn test_reload_disables_cache() {
        let cache = QueryCache::new(CacheConfig::default()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let descriptor = QueryDescriptor::library_actors();

        let _: CacheValue = cache.query(&descriptor, counting_producer(calls.clone())).await.unwrap();
        cache.reload(CacheConfig::disabled()).await.unwrap();
        let _: CacheValue = cache.query(&descriptor, counting_producer(calls.clone())).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.reload(CacheConfig::builder().max_entries(0).build()).await.is_err());
    }

    #[tokio::test]
    async fn test_sweeper_respects_config() {
        let cache = QueryCache::new(CacheConfig::builder().enable_auto_cleanup(false).build()).unwrap();
        assert!(cache.start_sweeper().is_none());

        let clock = Arc::new(ManualClock::default());
        let cache = QueryCache::new(
            CacheConfig::builder()
                .default_lifetime(Duration::from_secs(1), Duration::from_secs(2))
                .cleanup_interval(Duration::from_millis(5))
                .build(),
        )
        .unwrap()
        .with_clock(clock.clone());

        let _: CacheValue = cache
            .query(&QueryDescriptor::view_scene("s-1"), || async { Ok(json!(1)) })
            .await
            .unwrap();
        clock.advance(Duration::from_secs(3));

        let handle = cache.start_sweeper().unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while cache.backend().len().await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        handle.abort();
    }
}
