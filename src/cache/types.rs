//! Core type definitions for the cache system

use crate::cache::keys::Domain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value type held by the default store: a JSON document decoded by the caller
pub type CacheValue = serde_json::Value;

/// Statistics for cache monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries currently in cache
    pub total_entries: usize,

    /// Entry count per domain
    pub per_domain: BTreeMap<Domain, usize>,

    /// Total number of cache hits (fresh or stale)
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Number of evictions due to TTL expiration
    pub evictions_ttl: u64,

    /// Number of evictions due to the entry limit
    pub evictions_capacity: u64,

    /// Number of entries removed by invalidation or clear
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    pub fn entries_in(&self, domain: Domain) -> usize {
        self.per_domain.get(&domain).copied().unwrap_or(0)
    }

    /// Calculate total evictions
    pub fn total_evictions(&self) -> u64 {
        self.evictions_ttl + self.evictions_capacity
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ entries: {}, hits: {}, misses: {}, hit_rate: {:.2}%, evictions: {} (ttl: {}, capacity: {}), invalidations: {} }}",
            self.total_entries,
            self.hits,
            self.misses,
            self.hit_rate(),
            self.total_evictions(),
            self.evictions_ttl,
            self.evictions_capacity,
            self.invalidations
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 75,
            misses: 25,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 75.0);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_display() {
        let mut stats = CacheStats {
            total_entries: 2,
            hits: 1,
            misses: 1,
            ..Default::default()
        };
        stats.per_domain.insert(Domain::View, 2);
        let text = stats.to_string();
        assert!(text.contains("entries: 2"));
        assert!(text.contains("hit_rate: 50.00%"));
        assert_eq!(stats.entries_in(Domain::View), 2);
        assert_eq!(stats.entries_in(Domain::Ai), 0);
    }
}
