//! Bounded retry policy for entitlement resolution
//!
//! Resolution that fails outright (as opposed to degrading to a single
//! signal) is retried a bounded number of times, then reported as a terminal
//! failure. The policy is a plain value so callers and tests can reason about
//! it without timers tied to a UI.
//!
//! # Error Classification
//!
//! - **Retryable**: upstream outages where no entitlement source answered
//! - **Non-retryable**: authentication failures
//!
//! # Usage
//!
//! ```rust
//! use ownbite_access::access::retry::{RetryConfig, RetryExecutor, RetryableError};
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone)]
//! struct Flaky;
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("flaky") }
//! }
//! impl RetryableError for Flaky {
//!     fn is_retryable(&self) -> bool { true }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let executor = RetryExecutor::new(
//!     RetryConfig::default()
//!         .with_max_retries(3)
//!         .with_initial_delay(Duration::from_millis(1)),
//! );
//!
//! let result: Result<u32, Flaky> = executor.execute(|| async { Err(Flaky) }).await;
//! assert!(result.is_err());
//! # }
//! ```

use std::fmt::Display;
use std::time::Duration;

use futures::Future;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (not including the initial attempt)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter as a fraction of the base delay (0.0 to 1.0), used by `ExponentialWithJitter`
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Fixed,
            jitter_ratio: 0.3,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio;
        self
    }

    /// Total attempts including the initial one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Backoff strategies for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Constant delay between retries
    #[default]
    Fixed,
    /// delay = initial_delay * (retry + 1)
    Linear,
    /// delay = initial_delay * 2^retry
    Exponential,
    /// Exponential with uniform jitter to avoid synchronized retries
    ExponentialWithJitter,
}

/// Errors that know whether another attempt could help
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

/// Runs an operation under a [`RetryConfig`]
///
/// Attempt counters live inside each `execute` call, so one executor can be
/// reused without carrying retry state from one call into the next.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute `operation`, retrying retryable errors
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + Display,
    {
        self.execute_observed(|_| operation(), |_, _, _| {}).await
    }

    /// Execute with hooks
    ///
    /// `operation` receives the 1-based attempt number. `on_retry` runs after a
    /// failed attempt that will be retried, with the attempt number, the delay
    /// about to be slept and the error.
    pub async fn execute_observed<F, Fut, T, E, O>(
        &self,
        mut operation: F,
        mut on_retry: O,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + Display,
        O: FnMut(u32, Duration, &E),
    {
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(
                            attempt = %attempt,
                            total_duration_ms = %start_time.elapsed().as_millis(),
                            "Operation succeeded after {} attempts", attempt
                        );
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_retryable() {
                        debug!(attempt = %attempt, error = %error, "Operation failed with non-retryable error");
                        return Err(error);
                    }

                    if attempt > self.config.max_retries {
                        warn!(
                            attempts = %attempt,
                            total_duration_ms = %start_time.elapsed().as_millis(),
                            error = %error,
                            "Operation failed after all retry attempts"
                        );
                        return Err(error);
                    }

                    let delay = self.delay_for(attempt - 1);
                    debug!(
                        attempt = %attempt,
                        delay_ms = %delay.as_millis(),
                        error = %error,
                        "Operation failed, retrying after delay"
                    );
                    on_retry(attempt, delay, &error);

                    sleep(delay).await;
                }
            }
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let initial_ms = u64::try_from(self.config.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let base = match self.config.strategy {
            BackoffStrategy::Fixed => self.config.initial_delay,
            BackoffStrategy::Linear => {
                Duration::from_millis(initial_ms.saturating_mul(u64::from(retry) + 1))
            }
            BackoffStrategy::Exponential | BackoffStrategy::ExponentialWithJitter => {
                let multiplier = 2_u64.checked_pow(retry).unwrap_or(u64::MAX);
                Duration::from_millis(initial_ms.saturating_mul(multiplier))
            }
        };

        let capped = base.min(self.config.max_delay);

        match self.config.strategy {
            BackoffStrategy::ExponentialWithJitter => self.apply_jitter(capped),
            _ => capped,
        }
    }

    fn apply_jitter(&self, base: Duration) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let jitter = (base_ms as f64 * self.config.jitter_ratio.clamp(0.0, 1.0)) as u64;
        if jitter == 0 {
            return base;
        }

        let offset = rand::thread_rng().gen_range(0..=jitter * 2);
        Duration::from_millis(base_ms.saturating_sub(jitter).saturating_add(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl RetryableError for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig::default().with_initial_delay(Duration::from_millis(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exactly_max_retries_times() {
        let executor = RetryExecutor::new(fast_config().with_max_retries(3));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<(), TestError> = executor
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Transient)
                }
            })
            .await;

        assert_eq!(result, Err(TestError::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let executor = RetryExecutor::new(fast_config());
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let executor = RetryExecutor::new(fast_config());
        let mut retries_seen = Vec::new();

        let result = executor
            .execute_observed(
                |attempt| async move {
                    if attempt < 3 { Err(TestError::Transient) } else { Ok(attempt) }
                },
                |attempt, delay, _error| retries_seen.push((attempt, delay)),
            )
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(
            retries_seen,
            vec![(1, Duration::from_millis(10)), (2, Duration::from_millis(10))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_reuse_does_not_leak_attempts() {
        let executor = RetryExecutor::new(fast_config().with_max_retries(1));

        for _ in 0..3 {
            let calls = AtomicU32::new(0);
            let _: Result<(), TestError> = executor
                .execute(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Transient) }
                })
                .await;
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        }
    }

    #[test]
    fn test_zero_retries_runs_once() {
        let executor = RetryExecutor::new(fast_config().with_max_retries(0));
        let calls = AtomicU32::new(0);

        let result: Result<u32, TestError> = tokio_test::block_on(executor.execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Transient) }
        }));

        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_strategies() {
        let base = RetryConfig::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));

        let fixed = RetryExecutor::new(base.clone());
        assert_eq!(fixed.delay_for(0), Duration::from_millis(100));
        assert_eq!(fixed.delay_for(5), Duration::from_millis(100));

        let linear = RetryExecutor::new(base.clone().with_strategy(BackoffStrategy::Linear));
        assert_eq!(linear.delay_for(1), Duration::from_millis(200));
        assert_eq!(linear.delay_for(9), Duration::from_millis(350));

        let exponential = RetryExecutor::new(base.clone().with_strategy(BackoffStrategy::Exponential));
        assert_eq!(exponential.delay_for(0), Duration::from_millis(100));
        assert_eq!(exponential.delay_for(1), Duration::from_millis(200));
        assert_eq!(exponential.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let executor = RetryExecutor::new(
            RetryConfig::default()
                .with_initial_delay(Duration::from_millis(1000))
                .with_strategy(BackoffStrategy::ExponentialWithJitter),
        );

        for _ in 0..50 {
            let delay = executor.delay_for(0);
            assert!(delay >= Duration::from_millis(700) && delay <= Duration::from_millis(1300));
        }
    }
}
