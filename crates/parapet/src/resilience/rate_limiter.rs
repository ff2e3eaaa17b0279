//! Fixed-window per-identity rate limiting.
//!
//! One counter window is kept per identity. Counting resets fully at window
//! boundaries, so a caller can burst at the edge of two adjacent windows;
//! that is the accepted tradeoff of the fixed-window strategy and is part of
//! the observable contract — this is deliberately not a sliding window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::ConfigError;
use crate::clock::{Clock, SystemClock};

/// Configuration for a [`FixedWindowLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Requests allowed per identity within one window.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { max_requests: 60, window: Duration::from_secs(60) }
    }
}

impl RateLimiterConfig {
    /// Create a configuration.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self { max_requests, window }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError("max_requests must be greater than 0".to_owned()));
        }
        if self.window.is_zero() {
            return Err(ConfigError("window must be greater than zero".to_owned()));
        }
        Ok(())
    }
}

/// Counter window for one identity.
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window request counter keyed by identity.
///
/// Windows are created lazily on an identity's first request and reset in
/// place once their deadline passes. A periodic sweep (see
/// [`FixedWindowLimiter::spawn_sweeper`]) drops expired windows so memory is
/// bounded by recently active identities.
pub struct FixedWindowLimiter<C: Clock = SystemClock> {
    config: RateLimiterConfig,
    windows: Arc<Mutex<HashMap<String, RateWindow>>>,
    clock: Arc<C>,
}

impl FixedWindowLimiter<SystemClock> {
    /// Create a limiter using the system clock.
    pub fn new(config: RateLimiterConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> FixedWindowLimiter<C> {
    /// Create a limiter with a custom clock (useful for testing).
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(clock),
        })
    }

    /// Record a request for `identity` and report whether it is allowed.
    ///
    /// A fresh or expired window starts at count 1 and allows the request.
    /// Below the limit the count is incremented and the request allowed; at
    /// the limit the request is denied without counting further.
    pub fn allow(&self, identity: &str) -> bool {
        let now = self.clock.now();
        let mut windows = self.lock_windows();
        let window = windows
            .entry(identity.to_owned())
            .or_insert(RateWindow { count: 0, reset_at: now + self.config.window });

        if now > window.reset_at {
            window.count = 0;
            window.reset_at = now + self.config.window;
        }

        if window.count < self.config.max_requests {
            window.count += 1;
            true
        } else {
            debug!(identity, count = window.count, "rate limit exceeded");
            false
        }
    }

    /// Number of identities currently holding a window, expired or not.
    pub fn tracked_identities(&self) -> usize {
        self.lock_windows().len()
    }

    /// Drop windows whose deadline has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.lock_windows();
        let before = windows.len();
        windows.retain(|_, window| now <= window.reset_at);
        before - windows.len()
    }

    /// Spawn a periodic task that purges expired windows every `interval`.
    ///
    /// The returned handle stops the task on [`SweeperHandle::shutdown`] and
    /// aborts it on drop, so the timer never outlives shutdown.
    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
        let limiter = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = limiter.purge_expired();
                if removed > 0 {
                    debug!(removed, "swept expired rate windows");
                }
            }
        });
        SweeperHandle { handle }
    }

    fn lock_windows(&self) -> MutexGuard<'_, HashMap<String, RateWindow>> {
        match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("rate window lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}

impl<C: Clock> Clone for FixedWindowLimiter<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            windows: Arc::clone(&self.windows),
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Handle to a background sweep task.
#[derive(Debug)]
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweep task.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
