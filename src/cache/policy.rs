//! Cached-versus-direct execution switch

use crate::cache::config::CacheConfig;
use crate::cache::keys::QueryDescriptor;
use crate::error::Result;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Holds the active configuration and decides, per call, whether the cache is used
///
/// The configuration is replaced as a whole by [`CachePolicy::reload`]; readers
/// always see either the old or the new snapshot, never a mix.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    config: Arc<RwLock<Arc<CacheConfig>>>,
}

impl CachePolicy {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current configuration
    pub fn snapshot(&self) -> Arc<CacheConfig> {
        self.config.read().clone()
    }

    pub fn should_use_cache(&self) -> bool {
        let enabled = self.snapshot().enabled;
        debug!("Cache policy resolved: enabled={}", enabled);
        enabled
    }

    /// Validate and swap in a new configuration. On error the old one stays active.
    pub fn reload(&self, config: CacheConfig) -> Result<()> {
        config.validate()?;
        let enabled = config.enabled;
        *self.config.write() = Arc::new(config);
        info!("Cache policy reloaded (enabled: {})", enabled);
        Ok(())
    }

    /// Run `cached` or `direct` depending on the policy, resolved once for this call
    pub async fn execute_with_policy<T, C, CF, D, DF>(
        &self,
        descriptor: &QueryDescriptor,
        cached: C,
        direct: D,
    ) -> Result<T>
    where
        C: FnOnce(Arc<CacheConfig>) -> CF,
        CF: Future<Output = Result<T>>,
        D: FnOnce(Arc<CacheConfig>) -> DF,
        DF: Future<Output = Result<T>>,
    {
        let config = self.snapshot();
        debug!("Cache policy for {}: enabled={}", descriptor, config.enabled);

        if config.enabled {
            cached(config).await
        } else {
            direct(config).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;

    #[test]
    fn test_should_use_cache_follows_config() {
        assert!(CachePolicy::new(CacheConfig::default()).should_use_cache());
        assert!(!CachePolicy::new(CacheConfig::disabled()).should_use_cache());
    }

    #[tokio::test]
    async fn test_execute_with_policy_picks_path() {
        let descriptor = QueryDescriptor::library_plays();

        let policy = CachePolicy::new(CacheConfig::default());
        let path = policy
            .execute_with_policy(&descriptor, |_| async { Ok("cached") }, |_| async { Ok("direct") })
            .await
            .unwrap();
        assert_eq!(path, "cached");

        let policy = CachePolicy::new(CacheConfig::disabled());
        let path = policy
            .execute_with_policy(&descriptor, |_| async { Ok("cached") }, |_| async { Ok("direct") })
            .await
            .unwrap();
        assert_eq!(path, "direct");
    }

    #[test]
    fn test_reload_swaps_and_is_shared() {
        let policy = CachePolicy::new(CacheConfig::default());
        let handle = policy.clone();
        let before = policy.snapshot();

        policy.reload(CacheConfig::disabled()).unwrap();
        assert!(!handle.should_use_cache());
        // Earlier snapshots are unaffected
        assert!(before.enabled);
    }

    #[test]
    fn test_invalid_reload_keeps_old_config() {
        let policy = CachePolicy::new(CacheConfig::default());
        let bad = CacheConfig::builder().read_max_attempts(7).build();

        assert!(matches!(policy.reload(bad), Err(QueryError::ConfigError(_))));
        assert_eq!(policy.snapshot().read_max_attempts, 3);
    }
}
