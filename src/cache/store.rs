//! Cache storage: the backend trait and the in-memory LRU store

use crate::cache::{
    clock::Clock,
    config::CacheConfig,
    entry::CacheEntry,
    keys::{CacheKey, KeyPrefix},
    types::CacheStats,
};
use crate::error::CacheError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Storage seam used by the query facade and the invalidator
///
/// Every method may fail with [`CacheError`]; callers above the store treat
/// such failures as "cache unavailable" and fall back to the producer.
#[async_trait]
pub trait CacheBackend<V: Send + 'static>: Send + Sync {
    /// Entry for `key` if present and not expired at `now`. Expired entries
    /// are removed on access.
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<CacheEntry<V>>, CacheError>;

    /// Insert or overwrite, stamping the entry at `now`
    async fn put(&self, key: CacheKey, value: V, now: DateTime<Utc>) -> Result<(), CacheError>;

    /// Remove one entry; true if it was present
    async fn evict(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Remove every entry matching `prefix` in one step
    async fn evict_by_prefix(&self, prefix: &KeyPrefix) -> Result<usize, CacheError>;

    /// Remove all entries
    async fn clear(&self) -> Result<usize, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;

    /// Remove every entry expired at `now`
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError>;

    /// Adopt new lifetimes and capacity for subsequent writes
    async fn reconfigure(&self, config: &CacheConfig) -> Result<(), CacheError>;
}

/// In-memory store with lazy TTL expiry and LRU eviction
///
/// This implementation provides:
/// - Thread-safe async access via RwLock
/// - Stale/evict lifetimes per domain
/// - LRU eviction when the entry limit is reached
/// - Hit/miss/eviction counters
pub struct MemoryStore<V> {
    inner: Arc<RwLock<StoreInner<V>>>,
}

/// Internal cache storage
struct StoreInner<V> {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry<V>>,

    /// LRU tracking: front is least recently used
    lru_queue: VecDeque<CacheKey>,

    stats: CacheStats,

    /// Lifetimes, jitter and capacity used for new entries
    config: CacheConfig,
}

impl<V> StoreInner<V> {
    fn remove_entry(&mut self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k != key);
        Some(entry)
    }

    fn touch(&mut self, key: &CacheKey) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.clone());
    }

    fn evict_if_needed(&mut self) {
        while self.entries.len() >= self.config.max_entries {
            match self.lru_queue.pop_front() {
                Some(key) => {
                    debug!("Evicting entry due to max_entries limit: {}", key);
                    self.entries.remove(&key);
                    self.stats.evictions_capacity += 1;
                }
                None => break,
            }
        }
    }
}

impl<V: Clone + Send + Sync + 'static> MemoryStore<V> {
    /// Create a new store with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        info!(
            "Initializing query cache store (max_entries: {}, default lifetime: {:?})",
            config.max_entries, config.default_lifetime
        );

        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                entries: HashMap::new(),
                lru_queue: VecDeque::new(),
                stats: CacheStats::default(),
                config,
            })),
        }
    }

    /// Get a live entry. Expired entries are removed and count as a miss.
    pub async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry<V>> {
        let mut store = self.inner.write().await;

        let Some(expired) = store.entries.get(key).map(|entry| entry.is_expired(now)) else {
            debug!("Cache miss: {}", key);
            store.stats.misses += 1;
            return None;
        };

        if expired {
            debug!("Cache entry expired: {}", key);
            store.remove_entry(key);
            store.stats.misses += 1;
            store.stats.evictions_ttl += 1;
            return None;
        }

        let entry = store.entries.get_mut(key).map(|entry| {
            entry.mark_accessed(now);
            entry.clone()
        });
        store.touch(key);
        store.stats.hits += 1;

        debug!("Cache hit: {}", key);
        entry
    }

    /// Insert or overwrite an entry
    pub async fn put(&self, key: CacheKey, value: V, now: DateTime<Utc>) {
        let mut store = self.inner.write().await;

        let domain = key.domain();
        let lifetime = store.config.lifetime_for(domain);
        let stale_after = store.config.stale_after_with_jitter(domain);
        let entry = CacheEntry::new(value, now, stale_after, lifetime.evict_after);

        if store.entries.contains_key(&key) {
            debug!("Updating existing cache entry: {}", key);
            store.entries.insert(key.clone(), entry);
        } else {
            store.evict_if_needed();
            debug!("Inserting new cache entry: {}", key);
            store.entries.insert(key.clone(), entry);
        }
        store.touch(&key);
    }

    pub async fn evict(&self, key: &CacheKey) -> bool {
        let mut store = self.inner.write().await;
        let removed = store.remove_entry(key).is_some();
        if removed {
            store.stats.invalidations += 1;
            debug!("Removed cache entry: {}", key);
        }
        removed
    }

    /// Remove every entry under `prefix` while holding the write lock once
    pub async fn evict_by_prefix(&self, prefix: &KeyPrefix) -> usize {
        let mut store = self.inner.write().await;

        let keys: Vec<CacheKey> = store
            .entries
            .keys()
            .filter(|key| prefix.matches(key))
            .cloned()
            .collect();

        for key in &keys {
            store.remove_entry(key);
        }
        store.stats.invalidations += keys.len() as u64;

        if !keys.is_empty() {
            debug!("Invalidated {} entries under prefix: {}", keys.len(), prefix);
        }
        keys.len()
    }

    /// Clear all entries from the cache
    pub async fn clear(&self) -> usize {
        let mut store = self.inner.write().await;

        let count = store.entries.len();
        store.entries.clear();
        store.lru_queue.clear();
        store.stats.invalidations += count as u64;

        info!("Cleared {} entries from cache", count);
        count
    }

    pub async fn stats(&self) -> CacheStats {
        let store = self.inner.read().await;

        let mut per_domain = BTreeMap::new();
        for key in store.entries.keys() {
            *per_domain.entry(key.domain()).or_insert(0) += 1;
        }

        CacheStats {
            total_entries: store.entries.len(),
            per_domain,
            ..store.stats.clone()
        }
    }

    /// Remove all entries expired at `now`
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut store = self.inner.write().await;

        let expired: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            store.remove_entry(key);
        }
        store.stats.evictions_ttl += expired.len() as u64;

        if !expired.is_empty() {
            debug!("Cleaned up {} expired entries", expired.len());
        }
        expired.len()
    }

    /// Replace lifetimes and capacity; existing entries keep their stamps
    pub async fn reconfigure(&self, config: &CacheConfig) {
        let mut store = self.inner.write().await;
        store.config = config.clone();
        while store.entries.len() > store.config.max_entries {
            match store.lru_queue.pop_front() {
                Some(key) => {
                    store.entries.remove(&key);
                    store.stats.evictions_capacity += 1;
                }
                None => break,
            }
        }
        info!("Cache store reconfigured (max_entries: {})", store.config.max_entries);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Check if a key exists (without updating access time)
    pub async fn contains_key(&self, key: &CacheKey) -> bool {
        self.inner.read().await.entries.contains_key(key)
    }
}

impl<V> Clone for MemoryStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> CacheBackend<V> for MemoryStore<V> {
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<CacheEntry<V>>, CacheError> {
        Ok(MemoryStore::get(self, key, now).await)
    }

    async fn put(&self, key: CacheKey, value: V, now: DateTime<Utc>) -> Result<(), CacheError> {
        MemoryStore::put(self, key, value, now).await;
        Ok(())
    }

    async fn evict(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(MemoryStore::evict(self, key).await)
    }

    async fn evict_by_prefix(&self, prefix: &KeyPrefix) -> Result<usize, CacheError> {
        Ok(MemoryStore::evict_by_prefix(self, prefix).await)
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        Ok(MemoryStore::clear(self).await)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(MemoryStore::stats(self).await)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        Ok(MemoryStore::purge_expired(self, now).await)
    }

    async fn reconfigure(&self, config: &CacheConfig) -> Result<(), CacheError> {
        MemoryStore::reconfigure(self, config).await;
        Ok(())
    }
}

/// Background task that purges expired entries every `interval`
pub fn spawn_sweeper<V, B>(backend: Arc<B>, clock: Arc<dyn Clock>, interval: Duration) -> JoinHandle<()>
where
    V: Send + 'static,
    B: CacheBackend<V> + ?Sized + 'static,
{
    info!("Starting cache expiry sweeper (interval: {:?})", interval);

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            match backend.purge_expired(clock.now()).await {
                Ok(0) => {}
                Ok(removed) => debug!("Expiry sweep removed {} entries", removed),
                Err(e) => warn!("Expiry sweep failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::{derive_key, derive_prefix, Domain, Operation, QueryDescriptor, SearchOp};

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn config(stale: u64, evict: u64) -> CacheConfig {
        CacheConfig::builder()
            .default_lifetime(Duration::from_secs(stale), Duration::from_secs(evict))
            .build()
    }

    #[tokio::test]
    async fn test_unvalidated_jitter_does_not_break_put() {
        let config = CacheConfig::builder()
            .default_lifetime(Duration::from_secs(60), Duration::from_secs(600))
            .ttl_jitter(f64::NAN)
            .build();
        let store = MemoryStore::new(config);
        let key = derive_key(&QueryDescriptor::view_play("Kim Nham"));
        let now = Utc::now();

        store.put(key.clone(), "play".to_string(), now).await;
        let entry = store.get(&key, now).await.unwrap();
        assert_eq!(entry.stale_after, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_basic_put_and_get() {
        let store = MemoryStore::new(config(60, 600));
        let key = derive_key(&QueryDescriptor::view_character("Thị Mầu"));
        let now = Utc::now();

        store.put(key.clone(), "tomboy".to_string(), now).await;
        let entry = store.get(&key, now).await.unwrap();
        assert_eq!(entry.value, "tomboy");
        assert_eq!(entry.access_count, 1);

        let stats = store.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.entries_in(Domain::View), 1);
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let store: MemoryStore<String> = MemoryStore::new(CacheConfig::default());
        let key = derive_key(&QueryDescriptor::library_plays());
        assert!(store.get(&key, Utc::now()).await.is_none());
        assert_eq!(store.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_still_returned() {
        let store = MemoryStore::new(config(1, 5));
        let key = derive_key(&QueryDescriptor::view_play("Quan Âm Thị Kính"));
        let t0 = Utc::now();

        store.put(key.clone(), 1u32, t0).await;
        let entry = store.get(&key, t0 + secs(2)).await.unwrap();
        assert!(entry.is_stale(t0 + secs(2)));
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted_on_read() {
        let store = MemoryStore::new(config(1, 5));
        let key = derive_key(&QueryDescriptor::view_play("Kim Nham"));
        let t0 = Utc::now();

        store.put(key.clone(), 1u32, t0).await;
        assert!(store.get(&key, t0 + secs(6)).await.is_none());
        assert!(!store.contains_key(&key).await);

        let stats = store.stats().await;
        assert_eq!(stats.evictions_ttl, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let store = MemoryStore::new(CacheConfig::builder().max_entries(2).build());
        let now = Utc::now();
        let a = derive_key(&QueryDescriptor::view_actor("a"));
        let b = derive_key(&QueryDescriptor::view_actor("b"));
        let c = derive_key(&QueryDescriptor::view_actor("c"));

        store.put(a.clone(), 1u32, now).await;
        store.put(b.clone(), 2u32, now).await;
        // Touch a so b becomes least recently used
        store.get(&a, now).await;
        store.put(c.clone(), 3u32, now).await;

        assert!(store.contains_key(&a).await);
        assert!(!store.contains_key(&b).await);
        assert!(store.contains_key(&c).await);
        assert_eq!(store.stats().await.evictions_capacity, 1);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let store = MemoryStore::new(CacheConfig::builder().max_entries(1).build());
        let now = Utc::now();
        let key = derive_key(&QueryDescriptor::library_actors());

        store.put(key.clone(), 1u32, now).await;
        store.put(key.clone(), 2u32, now).await;

        assert_eq!(store.get(&key, now).await.unwrap().value, 2);
        assert_eq!(store.stats().await.evictions_capacity, 0);
    }

    #[tokio::test]
    async fn test_evict_by_prefix() {
        let store = MemoryStore::new(CacheConfig::default());
        let now = Utc::now();

        store.put(derive_key(&QueryDescriptor::character_by_name("Thị Mầu")), 1u32, now).await;
        store.put(derive_key(&QueryDescriptor::character_by_name("Thị Kính")), 2u32, now).await;
        store.put(derive_key(&QueryDescriptor::characters_by_play("Quan Âm Thị Kính")), 3u32, now).await;
        store.put(derive_key(&QueryDescriptor::library_characters()), 4u32, now).await;

        let prefix = derive_prefix(Domain::Search, Some(Operation::Search(SearchOp::CharacterByName)));
        assert_eq!(store.evict_by_prefix(&prefix).await, 2);
        assert_eq!(store.len().await, 2);
        assert_eq!(store.evict_by_prefix(&prefix).await, 0);

        let stats = store.stats().await;
        assert_eq!(stats.invalidations, 2);
        assert_eq!(stats.entries_in(Domain::Search), 1);
        assert_eq!(stats.entries_in(Domain::Library), 1);
    }

    #[tokio::test]
    async fn test_evict_and_clear() {
        let store = MemoryStore::new(CacheConfig::default());
        let now = Utc::now();
        let key = derive_key(&QueryDescriptor::view_scene("s-1"));

        store.put(key.clone(), 1u32, now).await;
        assert!(store.evict(&key).await);
        assert!(!store.evict(&key).await);

        store.put(key.clone(), 1u32, now).await;
        store.put(derive_key(&QueryDescriptor::library_plays()), 2u32, now).await;
        assert_eq!(store.clear().await, 2);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::new(
            CacheConfig::builder()
                .default_lifetime(Duration::from_secs(1), Duration::from_secs(5))
                .domain_lifetime(Domain::Library, Duration::from_secs(60), Duration::from_secs(600))
                .build(),
        );
        let t0 = Utc::now();

        store.put(derive_key(&QueryDescriptor::view_actor("x")), 1u32, t0).await;
        store.put(derive_key(&QueryDescriptor::library_actors()), 2u32, t0).await;

        assert_eq!(store.purge_expired(t0 + secs(10)).await, 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.stats().await.evictions_ttl, 1);
    }

    #[tokio::test]
    async fn test_reconfigure_shrinks_capacity() {
        let store = MemoryStore::new(CacheConfig::default());
        let now = Utc::now();
        for name in ["a", "b", "c"] {
            store.put(derive_key(&QueryDescriptor::view_actor(name)), 0u8, now).await;
        }

        store.reconfigure(&CacheConfig::builder().max_entries(1).build()).await;
        assert_eq!(store.len().await, 1);
        assert!(store.contains_key(&derive_key(&QueryDescriptor::view_actor("c"))).await);
    }
}
