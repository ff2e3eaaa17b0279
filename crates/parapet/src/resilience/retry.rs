//! Retry with capped exponential backoff and jitter.
//!
//! Every failure is treated as retryable up to the configured budget; the
//! layer does not classify errors as transient versus fatal. Once attempts
//! are exhausted the most recent error is returned, never swallowed.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::ConfigError;

/// Terminal failure after every attempt was spent.
#[derive(Debug, Error)]
#[error("operation failed after {attempts} attempts")]
pub struct RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Total attempts made (`retries + 1`).
    pub attempts: u32,
    /// Error from the final attempt.
    #[source]
    pub source: E,
}

/// Randomization applied to computed backoff delays, spreading out retry
/// storms across many concurrent callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// No randomization.
    None,
    /// Uniform in `[delay/2, delay]`; keeps some spacing while
    /// desynchronizing callers.
    #[default]
    Equal,
    /// Uniform in `[0, delay]`.
    Full,
}

impl Jitter {
    /// Apply jitter to a computed delay.
    pub fn apply(self, delay: Duration) -> Duration {
        let millis = delay.as_millis() as u64;
        if millis == 0 {
            return delay;
        }
        let mut rng = rand::thread_rng();
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(rng.gen_range(0..=millis)),
            Jitter::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + rng.gen_range(0..=millis - half))
            }
        }
    }
}

/// Retry budget for one category of operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first; total tries are `retries + 1`.
    pub retries: u32,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Ceiling the backoff growth is clamped to.
    pub max_delay: Duration,
    /// Randomization applied to each computed delay.
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: Jitter::Equal,
        }
    }
}

impl RetryConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Preset for relational database calls. Transient lock contention
    /// clears quickly, so few, fast retries.
    pub fn database() -> Self {
        Self {
            retries: 2,
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            jitter: Jitter::Equal,
        }
    }

    /// Preset for outbound third-party API calls. Upstream rate limits and
    /// network blips need more patience than local resources.
    pub fn external_api() -> Self {
        Self {
            retries: 4,
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            jitter: Jitter::Equal,
        }
    }

    /// Preset for miscellaneous background work.
    pub fn general() -> Self {
        Self {
            retries: 1,
            min_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(250),
            jitter: Jitter::Equal,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay > self.max_delay {
            return Err(ConfigError("min_delay must not exceed max_delay".to_owned()));
        }
        Ok(())
    }

    /// Backoff before retry `attempt` (1-based): `min_delay * 2^(attempt-1)`
    /// clamped to `max_delay`, before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self.min_delay.saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.max_delay)
    }

    /// Run `operation`, retrying failures with backoff.
    pub async fn run<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run_observed(operation, |_: &E, _, _| {}).await
    }

    /// Run `operation`, reporting each retried failure to `observer`.
    ///
    /// The observer fires once per retried failure — after the failed
    /// attempt, before the backoff sleep — with the error, the 1-based
    /// attempt number, and the retries still remaining. The terminal failure
    /// is not observed; it is returned. The observer cannot change the
    /// outcome.
    #[instrument(skip_all, fields(retries = self.retries))]
    pub async fn run_observed<F, Fut, T, E, O>(
        &self,
        mut operation: F,
        mut observer: O,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
        O: FnMut(&E, u32, u32),
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt > self.retries {
                        warn!(attempts = attempt, error = %error, "retries exhausted");
                        return Err(RetryError { attempts: attempt, source: error });
                    }
                    let remaining = self.retries - attempt + 1;
                    observer(&error, attempt, remaining);

                    let delay = self.jitter.apply(self.delay_for(attempt));
                    debug!(attempt, ?delay, "retrying after backoff");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Builder for [`RetryConfig`] with a fluent API.
#[derive(Debug)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    /// Additional attempts after the first.
    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    /// Delay before the first retry.
    pub fn min_delay(mut self, delay: Duration) -> Self {
        self.config.min_delay = delay;
        self
    }

    /// Ceiling for backoff growth.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Jitter strategy.
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
