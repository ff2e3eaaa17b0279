//! Integration tests for the resilience module.
//!
//! Covers the pool concurrency invariant under bursts, FIFO draining,
//! retry exhaustion accounting, and fixed-window rate limiting.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parapet::{
    FixedWindowLimiter, MockClock, Pool, PoolConfig, RateLimiterConfig, RetryConfig,
};

#[derive(Debug, Clone)]
struct UpstreamError;

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream unavailable")
    }
}

impl std::error::Error for UpstreamError {}

/// Fires a burst of tasks at a small pool and asserts the cap holds at every
/// instant, via an atomic high-water mark.
///
/// # Test Steps
/// 1. Build a pool with `max_concurrency = 4`.
/// 2. Spawn 32 tasks that each bump a live counter, sleep, and drop it.
/// 3. Record the peak live count across all tasks.
/// 4. Assert the peak never exceeded 4 and every task completed.
#[tokio::test(flavor = "multi_thread")]
async fn burst_never_exceeds_pool_capacity() {
    let pool = Arc::new(Pool::new(PoolConfig::new("burst", 4)).unwrap());
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..32 {
        let pool = Arc::clone(&pool);
        let live = Arc::clone(&live);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            pool.run(|| async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                live.fetch_sub(1, Ordering::SeqCst);
            })
            .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 4, "peak {} exceeded cap", peak.load(Ordering::SeqCst));
    assert_eq!(pool.stats().completed, 32);
    assert_eq!(pool.active(), 0);
    assert_eq!(pool.pending(), 0);
}

/// The pending gauge reflects queued work while the pool is saturated and
/// drains back to zero afterwards.
#[tokio::test(flavor = "multi_thread")]
async fn pending_gauge_rises_and_drains() {
    let pool = Arc::new(Pool::new(PoolConfig::new("queue", 1)).unwrap());

    let mut handles = vec![];
    for _ in 0..5 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            pool.run(|| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
            .await
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    let stats = pool.stats();
    assert_eq!(stats.active, 1);
    assert!(stats.pending >= 3, "expected a queue, saw {}", stats.pending);
    assert!(stats.is_at_capacity());

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(pool.pending(), 0);
    assert_eq!(pool.active(), 0);
}

/// An always-failing operation is attempted exactly `retries + 1` times, the
/// observer fires once per retried failure, and the final error surfaces.
#[tokio::test]
async fn retry_exhaustion_accounting() {
    let config = RetryConfig::builder()
        .retries(3)
        .min_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(2))
        .build()
        .unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let observed = Arc::new(AtomicU32::new(0));

    let attempts_clone = Arc::clone(&attempts);
    let observed_clone = Arc::clone(&observed);
    let result: Result<(), _> = config
        .run_observed(
            move || {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(UpstreamError)
                }
            },
            move |_error, _attempt, _remaining| {
                observed_clone.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

    let error = result.unwrap_err();
    assert_eq!(error.attempts, 4);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(observed.load(Ordering::SeqCst), 3);
}

/// Retrying stops as soon as an attempt succeeds; later attempts never run.
#[tokio::test]
async fn retry_stops_on_first_success() {
    let config = RetryConfig::builder()
        .retries(5)
        .min_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(2))
        .build()
        .unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = Arc::clone(&attempts);

    let value = config
        .run(move || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(UpstreamError)
                } else {
                    Ok("recovered")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "recovered");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

/// Fixed-window semantics end to end: a full window denies, an elapsed
/// window restarts the count at one.
#[tokio::test]
async fn rate_limit_window_lifecycle() {
    let clock = MockClock::new();
    let limiter = FixedWindowLimiter::with_clock(
        RateLimiterConfig::new(3, Duration::from_secs(60)),
        clock.clone(),
    )
    .unwrap();

    assert!(limiter.allow("learner-9"));
    assert!(limiter.allow("learner-9"));
    assert!(limiter.allow("learner-9"));
    assert!(!limiter.allow("learner-9"), "4th call within the window must be denied");

    clock.advance(Duration::from_secs(61));
    assert!(limiter.allow("learner-9"), "a fresh window starts with count 1");
    assert!(limiter.allow("learner-9"));

    assert_eq!(limiter.tracked_identities(), 1);
}

/// The background sweep bounds memory to active identities: expired windows
/// disappear without any further requests.
#[tokio::test]
async fn sweeper_bounds_tracked_identities() {
    let clock = MockClock::new();
    let limiter = FixedWindowLimiter::with_clock(
        RateLimiterConfig::new(10, Duration::from_secs(30)),
        clock.clone(),
    )
    .unwrap();

    for identity in ["a", "b", "c"] {
        assert!(limiter.allow(identity));
    }
    assert_eq!(limiter.tracked_identities(), 3);

    clock.advance(Duration::from_secs(31));
    let sweeper = limiter.spawn_sweeper(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(limiter.tracked_identities(), 0);
    sweeper.shutdown();
}
