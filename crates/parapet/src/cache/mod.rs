//! TTL-memoized caching over caller-supplied loaders.
//!
//! The cache sits in front of read queries: callers derive a [`CacheKey`]
//! from the request arguments with one of the pure normalizers, then call
//! [`TtlCache::get_or_load`] with the query as an async loader. A live entry
//! is returned without running the loader; a miss runs it and stores a
//! successful result under the category's TTL. Loader failures are never
//! cached.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use parapet::{CacheConfig, CacheKey, TtlCache};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = CacheConfig::builder()
//!     .default_ttl(Duration::from_secs(120))
//!     .category_ttl("leaderboard", Duration::from_secs(3600))
//!     .build();
//! let cache: TtlCache<Vec<String>> = TtlCache::new(config);
//!
//! let lessons = cache
//!     .get_or_load(CacheKey::all("lesson"), || async {
//!         Ok::<_, std::io::Error>(vec!["intro".to_owned()])
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(lessons.len(), 1);
//!
//! // A write to lessons invalidates the whole namespace.
//! cache.invalidate_category("lesson");
//! # }
//! ```

mod config;
mod core;
mod key;
mod stats;

use std::collections::BTreeMap;

/// Read-only occupancy view of a cache, object-safe so caches holding
/// different value types can feed one diagnostics snapshot.
pub trait CacheProbe: Send + Sync {
    /// Total live entries.
    fn size(&self) -> usize;

    /// Live entries grouped by key category.
    fn category_sizes(&self) -> BTreeMap<String, usize>;
}

pub use self::core::TtlCache;
pub use config::{CacheConfig, CacheConfigBuilder};
pub use key::CacheKey;
pub use stats::CacheStats;
