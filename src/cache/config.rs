//! Configuration for the query cache

use crate::cache::keys::Domain;
use crate::error::{QueryError, Result};
use crate::retry::{RetryPolicy, MAX_MUTATION_ATTEMPTS, MAX_READ_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// How long an entry is fresh, and how long it is kept at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryLifetime {
    /// Age at which an entry is served stale and refreshed in the background
    pub stale_after: Duration,
    /// Age at which an entry is removed and must be fetched again
    pub evict_after: Duration,
}

impl EntryLifetime {
    pub fn new(stale_after: Duration, evict_after: Duration) -> Self {
        Self {
            stale_after,
            evict_after,
        }
    }
}

impl Default for EntryLifetime {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5 * 60),
            evict_after: Duration::from_secs(30 * 60),
        }
    }
}

/// Configuration for the query cache
///
/// Built once at startup and handed to [`QueryCache::new`](crate::cache::QueryCache::new).
/// Live changes go through `QueryCache::reload`, which validates first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch. When false every query goes straight to its producer.
    pub enabled: bool,

    /// Lifetime used for domains without an override
    pub default_lifetime: EntryLifetime,

    /// Per-domain lifetime overrides
    pub domain_lifetimes: HashMap<Domain, EntryLifetime>,

    /// Random variation applied to stale-after (0.0 - 1.0)
    pub ttl_jitter: f64,

    /// Attempt budget for reads, at most 3
    pub read_max_attempts: u32,

    /// Attempt budget for writes and invalidation, at most 2
    pub mutation_max_attempts: u32,

    /// Fixed delay between retry attempts
    pub retry_delay: Duration,

    /// Upper bound on a single producer attempt
    pub producer_timeout: Duration,

    /// Maximum number of entries before LRU eviction kicks in
    pub max_entries: usize,

    /// Run the periodic expiry sweep
    pub enable_auto_cleanup: bool,

    /// Interval for the expiry sweep
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_lifetime: EntryLifetime::default(),
            domain_lifetimes: HashMap::new(),
            // No jitter unless asked for; staleness stays deterministic
            ttl_jitter: 0.0,
            read_max_attempts: MAX_READ_ATTEMPTS,
            mutation_max_attempts: MAX_MUTATION_ATTEMPTS,
            retry_delay: Duration::from_millis(250),
            producer_timeout: Duration::from_secs(10),
            max_entries: 10_000,
            enable_auto_cleanup: true,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Configuration with caching switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        check_lifetime("default", &self.default_lifetime)?;
        for (domain, lifetime) in &self.domain_lifetimes {
            check_lifetime(domain.as_str(), lifetime)?;
        }

        if self.read_max_attempts == 0 || self.read_max_attempts > MAX_READ_ATTEMPTS {
            return Err(QueryError::ConfigError(format!(
                "read_max_attempts must be between 1 and {}, got {}",
                MAX_READ_ATTEMPTS, self.read_max_attempts
            )));
        }

        if self.mutation_max_attempts == 0 || self.mutation_max_attempts > MAX_MUTATION_ATTEMPTS {
            return Err(QueryError::ConfigError(format!(
                "mutation_max_attempts must be between 1 and {}, got {}",
                MAX_MUTATION_ATTEMPTS, self.mutation_max_attempts
            )));
        }

        if self.max_entries == 0 {
            return Err(QueryError::ConfigError("max_entries must be greater than 0".to_string()));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(QueryError::ConfigError(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.producer_timeout.is_zero() {
            return Err(QueryError::ConfigError(
                "producer_timeout must be greater than 0".to_string(),
            ));
        }

        if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(QueryError::ConfigError(
                "cleanup_interval must be greater than 0 when auto cleanup is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Lifetime for a domain, falling back to the default
    pub fn lifetime_for(&self, domain: Domain) -> EntryLifetime {
        self.domain_lifetimes
            .get(&domain)
            .copied()
            .unwrap_or(self.default_lifetime)
    }

    /// Stale-after for a new entry with jitter applied, clamped to `[0, evict_after]`
    pub fn stale_after_with_jitter(&self, domain: Domain) -> Duration {
        let lifetime = self.lifetime_for(domain);
        // Jitter outside (0, 1], NaN included, is ignored
        if !(self.ttl_jitter > 0.0 && self.ttl_jitter <= 1.0) {
            return lifetime.stale_after;
        }

        let base_secs = lifetime.stale_after.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).clamp(0.0, lifetime.evict_after.as_secs_f64());

        Duration::from_secs_f64(final_secs)
    }

    pub fn read_retry(&self) -> RetryPolicy {
        RetryPolicy::for_reads(self.read_max_attempts, self.retry_delay)
    }

    pub fn mutation_retry(&self) -> RetryPolicy {
        RetryPolicy::for_mutations(self.mutation_max_attempts, self.retry_delay)
    }

    /// Load configuration from `KG_CACHE_*` environment variables (and `.env`)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Missing keys keep
    /// their defaults; malformed values are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(enabled) = parse_var::<bool, _>(&lookup, "KG_CACHE_ENABLED")? {
            config.enabled = enabled;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "KG_CACHE_STALE_AFTER_SECS")? {
            config.default_lifetime.stale_after = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "KG_CACHE_EVICT_AFTER_SECS")? {
            config.default_lifetime.evict_after = Duration::from_secs(secs);
        }

        for domain in Domain::ALL {
            let upper = domain.as_str().to_uppercase();
            let stale = parse_var::<u64, _>(&lookup, &format!("KG_CACHE_{}_STALE_AFTER_SECS", upper))?;
            let evict = parse_var::<u64, _>(&lookup, &format!("KG_CACHE_{}_EVICT_AFTER_SECS", upper))?;
            if stale.is_none() && evict.is_none() {
                continue;
            }

            let mut lifetime = config.default_lifetime;
            if let Some(secs) = stale {
                lifetime.stale_after = Duration::from_secs(secs);
            }
            if let Some(secs) = evict {
                lifetime.evict_after = Duration::from_secs(secs);
            }
            config.domain_lifetimes.insert(domain, lifetime);
        }

        if let Some(n) = parse_var::<u32, _>(&lookup, "KG_CACHE_READ_MAX_ATTEMPTS")? {
            config.read_max_attempts = n;
        }
        if let Some(n) = parse_var::<u32, _>(&lookup, "KG_CACHE_MUTATION_MAX_ATTEMPTS")? {
            config.mutation_max_attempts = n;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "KG_CACHE_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "KG_CACHE_PRODUCER_TIMEOUT_MS")? {
            config.producer_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<usize, _>(&lookup, "KG_CACHE_MAX_ENTRIES")? {
            config.max_entries = n;
        }
        if let Some(jitter) = parse_var::<f64, _>(&lookup, "KG_CACHE_TTL_JITTER")? {
            config.ttl_jitter = jitter;
        }
        if let Some(enable) = parse_var::<bool, _>(&lookup, "KG_CACHE_AUTO_CLEANUP")? {
            config.enable_auto_cleanup = enable;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "KG_CACHE_CLEANUP_INTERVAL_SECS")? {
            config.cleanup_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        debug!("Loaded cache configuration: {:?}", config);
        Ok(config)
    }
}

fn check_lifetime(scope: &str, lifetime: &EntryLifetime) -> Result<()> {
    if lifetime.evict_after < lifetime.stale_after {
        return Err(QueryError::ConfigError(format!(
            "{} evict_after ({:?}) must not be shorter than stale_after ({:?})",
            scope, lifetime.evict_after, lifetime.stale_after
        )));
    }
    Ok(())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| QueryError::ConfigError(format!("{}: invalid value '{}': {}", key, raw, e))),
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    enabled: Option<bool>,
    default_lifetime: Option<EntryLifetime>,
    domain_lifetimes: HashMap<Domain, EntryLifetime>,
    ttl_jitter: Option<f64>,
    read_max_attempts: Option<u32>,
    mutation_max_attempts: Option<u32>,
    retry_delay: Option<Duration>,
    producer_timeout: Option<Duration>,
    max_entries: Option<usize>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Turn caching on or off
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Default stale-after and evict-after for every domain
    pub fn default_lifetime(mut self, stale_after: Duration, evict_after: Duration) -> Self {
        self.default_lifetime = Some(EntryLifetime::new(stale_after, evict_after));
        self
    }

    /// Override lifetimes for one domain
    pub fn domain_lifetime(mut self, domain: Domain, stale_after: Duration, evict_after: Duration) -> Self {
        self.domain_lifetimes
            .insert(domain, EntryLifetime::new(stale_after, evict_after));
        self
    }

    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    pub fn read_max_attempts(mut self, attempts: u32) -> Self {
        self.read_max_attempts = Some(attempts);
        self
    }

    pub fn mutation_max_attempts(mut self, attempts: u32) -> Self {
        self.mutation_max_attempts = Some(attempts);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn producer_timeout(mut self, timeout: Duration) -> Self {
        self.producer_timeout = Some(timeout);
        self
    }

    /// Set maximum number of cache entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Enable or disable the expiry sweep
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            default_lifetime: self.default_lifetime.unwrap_or(defaults.default_lifetime),
            domain_lifetimes: self.domain_lifetimes,
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            read_max_attempts: self.read_max_attempts.unwrap_or(defaults.read_max_attempts),
            mutation_max_attempts: self
                .mutation_max_attempts
                .unwrap_or(defaults.mutation_max_attempts),
            retry_delay: self.retry_delay.unwrap_or(defaults.retry_delay),
            producer_timeout: self.producer_timeout.unwrap_or(defaults.producer_timeout),
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
        }
    }
}
