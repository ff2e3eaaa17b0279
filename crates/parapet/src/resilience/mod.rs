//! Resilience primitives: bounded concurrency, retries, rate limiting.
//!
//! Each primitive is an injectable service object constructed once at
//! startup; nothing here is a module-level global, so tests build fresh
//! instances with small limits.

mod pool;
mod rate_limiter;
mod retry;

use thiserror::Error;

/// Validation error produced by the resilience configuration builders.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

pub use pool::{Pool, PoolConfig, PoolError, PoolStats};
pub use rate_limiter::{FixedWindowLimiter, RateLimiterConfig, SweeperHandle};
pub use retry::{Jitter, RetryConfig, RetryConfigBuilder, RetryError};
