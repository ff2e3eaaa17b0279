//! Guarded data access primitives shared by service backends.
//!
//! Parapet wraps a caller-supplied unit of work — run this query, call this
//! upstream API — in the protections a backend needs before the work reaches
//! a scarce resource:
//!
//! - [`TtlCache`]: per-key memoization with per-category TTLs and explicit
//!   invalidation
//! - [`Pool`]: named bounded-concurrency pools with FIFO admission
//! - [`RetryConfig`]: capped exponential backoff with jitter
//! - [`FixedWindowLimiter`]: per-identity fixed-window rate limiting
//! - [`Guard`]: the facade composing pool and retry per operation category,
//!   plus a diagnostics snapshot over everything it guards
//!
//! Everything is an injectable service object constructed once at startup;
//! there are no module-level globals, so tests can build fresh instances
//! with small limits.
//!
//! # Examples
//!
//! ```
//! use parapet::{CacheConfig, CacheKey, Guard, GuardConfig, TtlCache};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let guard = Guard::new(GuardConfig::default()).unwrap();
//! let cache: TtlCache<Vec<String>> = TtlCache::new(CacheConfig::default());
//!
//! // Cached read path: the guarded call is the loader.
//! let lessons = cache
//!     .get_or_load(CacheKey::all("lesson"), || {
//!         guard.database(|| async {
//!             Ok::<_, std::io::Error>(vec!["intro".to_owned()])
//!         })
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(lessons, vec!["intro".to_owned()]);
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod cache;
pub mod clock;
pub mod guard;
pub mod resilience;

pub use cache::{CacheConfig, CacheConfigBuilder, CacheKey, CacheProbe, CacheStats, TtlCache};
pub use clock::{Clock, MockClock, SystemClock};
pub use guard::{
    CacheSnapshot, CategoryConfig, Guard, GuardConfig, GuardError, GuardSnapshot,
};
pub use resilience::{
    ConfigError, FixedWindowLimiter, Jitter, Pool, PoolConfig, PoolError, PoolStats,
    RateLimiterConfig, RetryConfig, RetryConfigBuilder, RetryError, SweeperHandle,
};
