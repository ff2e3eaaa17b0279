//! Guarded invocation facade.
//!
//! [`Guard`] composes the resilience primitives per operation category: a
//! call is admitted by the category's [`Pool`], then driven by the category's
//! [`RetryConfig`] while the pool slot is held, so retries never multiply the
//! pressure on the underlying resource. Cache composition stays explicit —
//! callers pass a guarded call as the loader to
//! [`TtlCache::get_or_load`](crate::TtlCache::get_or_load).
//!
//! The facade itself is stateless beyond per-call attempt counting; all
//! durable state lives in the pools, the rate-limit windows, and the caches.

mod snapshot;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::cache::CacheProbe;
use crate::resilience::{
    ConfigError, FixedWindowLimiter, Pool, PoolConfig, PoolError, RateLimiterConfig, RetryConfig,
    RetryError, SweeperHandle,
};

pub use snapshot::{CacheSnapshot, GuardSnapshot};

/// Error returned by guarded invocations.
///
/// [`GuardError::Rejected`] means the operation never ran — the pool turned
/// it away. [`GuardError::Exhausted`] means it ran and failed on every
/// attempt; the final underlying error is attached as the source and is
/// never masked.
#[derive(Debug, Error)]
pub enum GuardError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The pool rejected the task before it started.
    #[error(transparent)]
    Rejected(#[from] PoolError),

    /// Every attempt ran and failed; `source` is the last error.
    #[error("operation failed after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E> GuardError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether the operation was never started.
    pub fn is_rejected(&self) -> bool {
        matches!(self, GuardError::Rejected(_))
    }
}

impl<E> From<RetryError<E>> for GuardError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: RetryError<E>) -> Self {
        GuardError::Exhausted { attempts: error.attempts, source: error.source }
    }
}

/// Per-category budget: pool size, queue patience, retry policy.
#[derive(Debug, Clone)]
pub struct CategoryConfig {
    /// Maximum simultaneously running operations for the category.
    pub max_concurrency: usize,
    /// How long a task may wait for a slot before being rejected.
    /// `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
    /// Retry policy applied inside the pool slot.
    pub retry: RetryConfig,
}

impl CategoryConfig {
    /// Create a budget with no acquire timeout.
    pub fn new(max_concurrency: usize, retry: RetryConfig) -> Self {
        Self { max_concurrency, acquire_timeout: None, retry }
    }

    /// Reject tasks that wait longer than `timeout` for a slot.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }
}

/// Configuration for [`Guard`].
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Budget for relational database operations.
    pub database: CategoryConfig,
    /// Budget for outbound third-party API calls.
    pub external_api: CategoryConfig,
    /// Budget for miscellaneous work.
    pub general: CategoryConfig,
    /// Per-identity request limits.
    pub rate_limit: RateLimiterConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            database: CategoryConfig::new(10, RetryConfig::database()),
            // External upstreams are the slowest and the most rate-limited,
            // so they get the smallest budget.
            external_api: CategoryConfig::new(3, RetryConfig::external_api()),
            general: CategoryConfig::new(8, RetryConfig::general()),
            rate_limit: RateLimiterConfig::default(),
        }
    }
}

/// Facade routing caller-supplied operations through the category pools and
/// retry policies, with an owned per-identity rate limiter and a diagnostics
/// snapshot over everything it guards.
///
/// Construct one per process at startup and share it by reference or `Arc`.
///
/// # Examples
///
/// ```
/// use parapet::{Guard, GuardConfig};
///
/// # #[tokio::main]
/// # async fn main() {
/// let guard = Guard::new(GuardConfig::default()).unwrap();
///
/// let rows = guard
///     .database(|| async {
///         // run the query
///         Ok::<_, std::io::Error>(vec![1, 2, 3])
///     })
///     .await
///     .unwrap();
/// assert_eq!(rows.len(), 3);
/// # }
/// ```
pub struct Guard {
    database_pool: Pool,
    external_api_pool: Pool,
    general_pool: Pool,
    database_retry: RetryConfig,
    external_api_retry: RetryConfig,
    general_retry: RetryConfig,
    rate_limiter: FixedWindowLimiter,
    caches: Mutex<Vec<(String, Arc<dyn CacheProbe>)>>,
}

impl Guard {
    /// Build the facade from per-category budgets.
    pub fn new(config: GuardConfig) -> Result<Self, ConfigError> {
        let build_pool = |name: &str, category: &CategoryConfig| {
            category.retry.validate()?;
            let mut pool_config = PoolConfig::new(name, category.max_concurrency);
            if let Some(timeout) = category.acquire_timeout {
                pool_config = pool_config.acquire_timeout(timeout);
            }
            Pool::new(pool_config)
        };

        Ok(Self {
            database_pool: build_pool("database", &config.database)?,
            external_api_pool: build_pool("external_api", &config.external_api)?,
            general_pool: build_pool("general", &config.general)?,
            database_retry: config.database.retry,
            external_api_retry: config.external_api.retry,
            general_retry: config.general.retry,
            rate_limiter: FixedWindowLimiter::new(config.rate_limit)?,
            caches: Mutex::new(Vec::new()),
        })
    }

    /// Run a relational database operation under the database pool and
    /// retry budget.
    pub async fn database<F, Fut, T, E>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::guarded(&self.database_pool, &self.database_retry, operation).await
    }

    /// Run an outbound third-party API call under the external-API pool and
    /// retry budget.
    pub async fn external_api<F, Fut, T, E>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::guarded(&self.external_api_pool, &self.external_api_retry, operation).await
    }

    /// Run miscellaneous work under the general pool and retry budget.
    pub async fn general<F, Fut, T, E>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::guarded(&self.general_pool, &self.general_retry, operation).await
    }

    /// The slot is held across every retry attempt, so a struggling
    /// operation occupies one unit of capacity rather than re-entering the
    /// queue between attempts.
    async fn guarded<F, Fut, T, E>(
        pool: &Pool,
        retry: &RetryConfig,
        operation: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let name = pool.name();
        let outcome = pool
            .run(|| {
                retry.run_observed(operation, |error: &E, attempt, remaining| {
                    warn!(pool = name, attempt, remaining, error = %error, "guarded operation failed, retrying");
                })
            })
            .await?;
        outcome.map_err(GuardError::from)
    }

    /// Run `processor` over `items` with at most `batch_size` in flight.
    ///
    /// Results are returned in input order even when later items finish
    /// first. The throwaway limiter exists only for the duration of the
    /// batch and does not draw on the category pools.
    pub async fn process_batch<I, F, Fut, T>(
        &self,
        items: Vec<I>,
        processor: F,
        batch_size: usize,
    ) -> Vec<T>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = T>,
    {
        let semaphore = Arc::new(Semaphore::new(batch_size.max(1)));
        let tasks = items.into_iter().map(|item| {
            let semaphore = Arc::clone(&semaphore);
            let work = processor(item);
            async move {
                // The semaphore is never closed, so acquisition only fails
                // if it were; fall through and run unthrottled in that case.
                let _permit = semaphore.acquire().await.ok();
                work.await
            }
        });
        join_all(tasks).await
    }

    /// Check a request from `identity` against the per-identity rate limit.
    ///
    /// Denial is a boolean, not an error, so callers choose their own
    /// response (an HTTP 429, a dropped event) without unwinding.
    pub fn allow(&self, identity: &str) -> bool {
        self.rate_limiter.allow(identity)
    }

    /// The owned rate limiter.
    pub fn rate_limiter(&self) -> &FixedWindowLimiter {
        &self.rate_limiter
    }

    /// Spawn the periodic rate-window sweep. Call once at startup; keep the
    /// handle and shut it down when the process stops.
    pub fn spawn_rate_sweeper(&self, interval: Duration) -> SweeperHandle {
        self.rate_limiter.spawn_sweeper(interval)
    }

    /// Register a cache so it appears in [`Guard::snapshot`].
    pub fn register_cache(&self, label: impl Into<String>, cache: Arc<dyn CacheProbe>) {
        self.lock_caches().push((label.into(), cache));
    }

    /// Point-in-time view of pools, registered caches, and rate-limit
    /// tracking, for an administrative diagnostics endpoint.
    pub fn snapshot(&self) -> GuardSnapshot {
        let caches = self
            .lock_caches()
            .iter()
            .map(|(label, probe)| CacheSnapshot {
                label: label.clone(),
                size: probe.size(),
                category_sizes: probe.category_sizes(),
            })
            .collect();

        GuardSnapshot {
            pools: vec![
                self.database_pool.stats(),
                self.external_api_pool.stats(),
                self.general_pool.stats(),
            ],
            caches,
            rate_limited_identities: self.rate_limiter.tracked_identities(),
        }
    }

    fn lock_caches(&self) -> MutexGuard<'_, Vec<(String, Arc<dyn CacheProbe>)>> {
        match self.caches.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("cache registry lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug)]
    struct OpError(&'static str);

    impl std::fmt::Display for OpError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for OpError {}

    fn fast_retry(retries: u32) -> RetryConfig {
        RetryConfig::builder()
            .retries(retries)
            .min_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .build()
            .expect("valid config")
    }

    fn small_guard() -> Guard {
        Guard::new(GuardConfig {
            database: CategoryConfig::new(2, fast_retry(2)),
            external_api: CategoryConfig::new(1, fast_retry(1)),
            general: CategoryConfig::new(2, fast_retry(0)),
            rate_limit: RateLimiterConfig::new(3, Duration::from_secs(60)),
        })
        .expect("valid config")
    }

    #[tokio::test]
    async fn database_call_returns_the_operation_result() {
        let guard = small_guard();
        let value =
            guard.database(|| async { Ok::<_, OpError>(5) }).await.expect("should succeed");
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_last_error() {
        let guard = small_guard();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<(), _> = guard
            .database(move || {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(OpError("still broken"))
                }
            })
            .await;

        match result {
            Err(GuardError::Exhausted { attempts: total, source }) => {
                assert_eq!(total, 3);
                assert_eq!(source.0, "still broken");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejection_is_distinguishable_from_operation_failure() {
        let guard = Guard::new(GuardConfig {
            database: CategoryConfig::new(1, fast_retry(0))
                .acquire_timeout(Duration::from_millis(20)),
            ..GuardConfig::default()
        })
        .expect("valid config");
        let guard = Arc::new(guard);

        let occupant = Arc::clone(&guard);
        let blocker = tokio::spawn(async move {
            occupant
                .database(|| async {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    Ok::<_, OpError>(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = guard.database(|| async { Ok::<_, OpError>(()) }).await;
        match result {
            Err(error) => assert!(error.is_rejected()),
            Ok(()) => panic!("expected rejection"),
        }

        blocker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn rate_limit_denial_is_a_boolean() {
        let guard = small_guard();

        assert!(guard.allow("user-1"));
        assert!(guard.allow("user-1"));
        assert!(guard.allow("user-1"));
        assert!(!guard.allow("user-1"));
        assert_eq!(guard.snapshot().rate_limited_identities, 1);
    }

    #[tokio::test]
    async fn snapshot_names_every_pool() {
        let guard = small_guard();
        let snapshot = guard.snapshot();

        assert!(snapshot.pool("database").is_some());
        assert!(snapshot.pool("external_api").is_some());
        assert!(snapshot.pool("general").is_some());
        assert_eq!(snapshot.total_pending(), 0);
    }
}
