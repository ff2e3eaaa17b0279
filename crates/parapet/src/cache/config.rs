//! Cache configuration.

use std::collections::HashMap;
use std::time::Duration;

/// Configuration for a [`TtlCache`](super::TtlCache).
///
/// TTLs are resolved per key category: list-style reads that change rarely
/// can be given a longer TTL than per-entity reads, and scheduled aggregates
/// (leaderboards and the like) the longest, without touching the cache type.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when no category override matches.
    pub default_ttl: Duration,
    /// Per-category TTL overrides.
    pub category_ttls: HashMap<String, Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { default_ttl: Duration::from_secs(300), category_ttls: HashMap::new() }
    }
}

impl CacheConfig {
    /// Create a new configuration builder.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Preset for a single uniform TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { default_ttl: ttl, category_ttls: HashMap::new() }
    }

    /// Resolve the TTL for a key category.
    pub(crate) fn ttl_for(&self, category: &str) -> Duration {
        self.category_ttls.get(category).copied().unwrap_or(self.default_ttl)
    }
}

/// Builder for [`CacheConfig`] with a fluent API.
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Set the TTL used when no category override matches.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Override the TTL for one category.
    pub fn category_ttl(mut self, category: impl Into<String>, ttl: Duration) -> Self {
        self.config.category_ttls.insert(category.into(), ttl);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> CacheConfig {
        self.config
    }
}
