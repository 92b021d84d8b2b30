//! Cache entry with stale/evict lifetimes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where an entry is in its lifecycle at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Servable without refresh
    Fresh,
    /// Servable, but a background refresh should run
    Stale,
    /// Must not be served
    Expired,
}

/// A cached value and its timing metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,

    /// When the value was stored
    pub created_at: DateTime<Utc>,

    /// Age at which the entry becomes stale
    pub stale_after: Duration,

    /// Age at which the entry is removed
    pub evict_after: Duration,

    /// Last access time (for LRU tracking)
    pub accessed_at: DateTime<Utc>,

    /// Number of times this entry has been served
    pub access_count: u64,
}

impl<V> CacheEntry<V> {
    /// Create an entry stamped at `now`. `evict_after` is raised to at least `stale_after`.
    pub fn new(value: V, now: DateTime<Utc>, stale_after: Duration, evict_after: Duration) -> Self {
        Self {
            value,
            created_at: now,
            stale_after,
            evict_after: evict_after.max(stale_after),
            accessed_at: now,
            access_count: 0,
        }
    }

    /// Age of the entry; zero if `now` is before creation
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age(now) >= self.stale_after
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) >= self.evict_after
    }

    pub fn state(&self, now: DateTime<Utc>) -> EntryState {
        if self.is_expired(now) {
            EntryState::Expired
        } else if self.is_stale(now) {
            EntryState::Stale
        } else {
            EntryState::Fresh
        }
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.accessed_at = now;
        self.access_count += 1;
    }
}
