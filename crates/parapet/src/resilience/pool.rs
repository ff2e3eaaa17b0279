//! Named bounded-concurrency pools.
//!
//! A pool caps how many operations of one category run at once. Callers past
//! the cap wait in FIFO order for a slot; the semaphore backing the pool is
//! fair, so no waiter starves while the pool keeps completing work.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use super::ConfigError;

/// Admission failures: the task never started, as opposed to running and
/// failing on its own terms.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No slot became available within the configured acquire timeout.
    #[error("pool `{pool}` did not admit the task within {waited:?}")]
    QueueTimeout { pool: String, waited: Duration },

    /// The pool has been closed; queued and future tasks are rejected.
    #[error("pool `{pool}` is closed")]
    Closed { pool: String },
}

/// Configuration for a [`Pool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Name used in errors, logs, and stats.
    pub name: String,
    /// Maximum number of simultaneously running tasks.
    pub max_concurrency: usize,
    /// How long a task may wait for a slot before being rejected.
    /// `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Create a configuration with no acquire timeout.
    pub fn new(name: impl Into<String>, max_concurrency: usize) -> Self {
        Self { name: name.into(), max_concurrency, acquire_timeout: None }
    }

    /// Reject tasks that wait longer than `timeout` for a slot.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError("max_concurrency must be greater than 0".to_owned()));
        }
        Ok(())
    }
}

/// Snapshot of a pool's live gauges and lifetime totals.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Pool name.
    pub name: String,
    /// Configured concurrency cap.
    pub max_concurrency: usize,
    /// Tasks currently running.
    pub active: usize,
    /// Tasks waiting for a slot.
    pub pending: usize,
    /// Tasks that were admitted and ran to completion.
    pub completed: u64,
    /// Tasks rejected before running (queue timeout or closed pool).
    pub rejected: u64,
}

impl PoolStats {
    /// Current utilization as a fraction of the cap.
    pub fn utilization(&self) -> f64 {
        self.active as f64 / self.max_concurrency as f64
    }

    /// Whether every slot is occupied.
    pub fn is_at_capacity(&self) -> bool {
        self.active >= self.max_concurrency
    }
}

/// Increments a gauge on creation and decrements it on drop, so live counts
/// stay accurate when a waiting or running future is dropped mid-flight.
struct GaugeGuard {
    gauge: Arc<AtomicUsize>,
}

impl GaugeGuard {
    fn raise(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self { gauge: Arc::clone(gauge) }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded-concurrency pool with FIFO admission.
///
/// The slot and the live gauges are released on every exit path — success,
/// task error, panic, and caller cancellation — so capacity can never leak.
/// A caller cancelled while waiting is removed from the queue without its
/// task ever running; a task already running is simply allowed to finish.
pub struct Pool {
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
    completed: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl Pool {
    /// Create a pool from a validated configuration.
    pub fn new(config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            active: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run `task` once a slot is free.
    ///
    /// `task` is only invoked after admission, so an `Err` return means the
    /// work never ran. The returned `T` is typically the operation's own
    /// `Result`, which keeps admission failures structurally distinct from
    /// operation failures.
    #[instrument(skip(self, task), fields(pool = %self.config.name))]
    pub async fn run<F, Fut, T>(&self, task: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let waiting = GaugeGuard::raise(&self.pending);
        let permit = match self.config.acquire_timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, self.semaphore.acquire()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        self.rejected.fetch_add(1, Ordering::Relaxed);
                        return Err(PoolError::Closed { pool: self.config.name.clone() });
                    }
                    Err(_) => {
                        self.rejected.fetch_add(1, Ordering::Relaxed);
                        warn!(pool = %self.config.name, ?timeout, "task timed out waiting for a slot");
                        return Err(PoolError::QueueTimeout {
                            pool: self.config.name.clone(),
                            waited: timeout,
                        });
                    }
                }
            }
            None => match self.semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(PoolError::Closed { pool: self.config.name.clone() });
                }
            },
        };
        drop(waiting);

        let running = GaugeGuard::raise(&self.active);
        debug!(pool = %self.config.name, active = self.active.load(Ordering::SeqCst), "task admitted");

        let output = task().await;

        self.completed.fetch_add(1, Ordering::Relaxed);
        drop(running);
        drop(permit);
        Ok(output)
    }

    /// Close the pool. Queued waiters and subsequent `run` calls fail with
    /// [`PoolError::Closed`]; tasks already running finish normally.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Tasks currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Tasks waiting for a slot.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Snapshot of gauges and totals.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.config.name.clone(),
            max_concurrency: self.config.max_concurrency,
            active: self.active(),
            pending: self.pending(),
            completed: self.completed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl Clone for Pool {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            semaphore: Arc::clone(&self.semaphore),
            active: Arc::clone(&self.active),
            pending: Arc::clone(&self.pending),
            completed: Arc::clone(&self.completed),
            rejected: Arc::clone(&self.rejected),
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.config.name)
            .field("max_concurrency", &self.config.max_concurrency)
            .field("active", &self.active())
            .field("pending", &self.pending())
            .finish()
    }
}
