//! Circuit breaker for upstream calls
//!
//! Protects the resolver from a slow or dead payments provider: after enough
//! consecutive failures the circuit opens and calls fail immediately, so a
//! consumer waiting on a decision never stalls on a known-bad dependency.
//!
//! # States
//!
//! 1. **Closed**: all calls pass through
//! 2. **Open**: calls are rejected until `half_open_timeout` has passed
//! 3. **HalfOpen**: trial calls pass; `success_threshold` successes close the
//!    circuit, any failure re-opens it
//!
//! Every call runs under `timeout`; a timeout counts as a failure.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Future;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes needed to close the circuit
    pub success_threshold: u32,
    /// Timeout for each call
    pub timeout: Duration,
    /// Time spent open before trial calls are allowed
    pub half_open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(5),
            half_open_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a guarded call did not produce a value
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open")]
    Open,

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    rejected: u64,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            rejected: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub rejected_calls: u64,
}

/// Circuit breaker; clones share state
#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        debug!(
            breaker = name,
            failure_threshold = config.failure_threshold,
            timeout_ms = config.timeout.as_millis(),
            "Creating circuit breaker"
        );

        Self {
            name,
            config,
            state: Arc::new(RwLock::new(BreakerState::default())),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Run `f` through the breaker
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit().await {
            debug!(breaker = self.name, "Circuit open, rejecting call");
            return Err(BreakerError::Open);
        }

        match tokio::time::timeout(self.config.timeout, f()).await {
            Ok(Ok(value)) => {
                self.on_success().await;
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure().await;
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                warn!(
                    breaker = self.name,
                    timeout_ms = %self.config.timeout.as_millis(),
                    "Upstream call timed out"
                );
                self.on_failure().await;
                Err(BreakerError::Timeout(self.config.timeout))
            }
        }
    }

    async fn admit(&self) -> bool {
        let mut state = self.state.write().await;
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = state
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.config.half_open_timeout);
                if cooled_down {
                    info!(breaker = self.name, "Circuit half-open, allowing trial call");
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    true
                } else {
                    state.rejected += 1;
                    false
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;
        match state.state {
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    info!(breaker = self.name, "Circuit closed");
                    *state = BreakerState {
                        rejected: state.rejected,
                        ..BreakerState::default()
                    };
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;
        state.failure_count += 1;

        let trip = match state.state {
            CircuitState::Closed => state.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if trip {
            warn!(
                breaker = self.name,
                failures = state.failure_count,
                "Circuit opened"
            );
            state.state = CircuitState::Open;
            state.success_count = 0;
            state.opened_at = Some(Instant::now());
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == CircuitState::Open
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.read().await;
        CircuitBreakerStats {
            state: state.state,
            consecutive_failures: state.failure_count,
            rejected_calls: state.rejected,
        }
    }

    pub async fn reset(&self) {
        info!(breaker = self.name, "Circuit manually reset");
        *self.state.write().await = BreakerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, half_open_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold,
                success_threshold: 1,
                timeout: Duration::from_millis(50),
                half_open_timeout,
            },
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.call(|| async { Err::<(), _>("boom") }).await
    }

    #[tokio::test]
    async fn test_passes_values_through_when_closed() {
        let breaker = breaker(3, Duration::from_secs(30));

        let result = breaker.call(|| async { Ok::<_, &str>(7) }).await;
        assert_eq!(result, Ok(7));
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects() {
        let breaker = breaker(2, Duration::from_secs(30));

        assert_eq!(fail(&breaker).await, Err(BreakerError::Inner("boom")));
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(fail(&breaker).await, Err(BreakerError::Inner("boom")));
        assert!(breaker.is_open().await);

        let rejected = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert_eq!(rejected, Err(BreakerError::Open));
        assert_eq!(breaker.stats().await.rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = breaker(2, Duration::from_secs(30));

        let _ = fail(&breaker).await;
        let _ = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        let _ = fail(&breaker).await;

        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_closes_or_reopens() {
        let breaker = breaker(1, Duration::ZERO);

        let _ = fail(&breaker).await;
        assert!(breaker.is_open().await);

        // Cool-down of zero admits the next call as a trial.
        let _ = fail(&breaker).await;
        assert!(breaker.is_open().await);

        let result = breaker.call(|| async { Ok::<_, &str>("ok") }).await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let breaker = breaker(1, Duration::from_secs(30));

        let result = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, &str>(())
            })
            .await;

        assert_eq!(result, Err(BreakerError::Timeout(Duration::from_millis(50))));
        assert!(breaker.is_open().await);
    }

    #[tokio::test]
    async fn test_reset_closes_circuit() {
        let breaker = breaker(1, Duration::from_secs(30));
        let _ = fail(&breaker).await;

        breaker.reset().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
