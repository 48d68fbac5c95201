//! # Resilience Policy
//!
//! Wraps an asynchronous operation with a per-attempt timeout, bounded retry
//! with exponential backoff and jitter, and the shared [`CircuitBreaker`].
//!
//! Every attempt is classified into a [`Failure`] value and the terminal
//! outcome into a [`ResilienceError`], so callers inspect results by value.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use thiserror::Error as ThisError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, ResilienceConfig};
use crate::retry::Backoff;
use crate::types::Error;

/// Outcome of one failed attempt.
#[derive(Debug, Clone)]
pub enum Failure {
    /// The attempt ran past `timeout_per_attempt_ms`
    Timeout { attempt: u32, after: Duration },
    /// The operation failed and may be retried
    Retryable { attempt: u32, error: Error },
    /// The operation failed with an error the fatal predicate rejects
    Fatal { attempt: u32, error: Error },
    /// The circuit refused the attempt
    CircuitRejected { retry_after: Duration },
}

impl Failure {
    pub fn attempt(&self) -> Option<u32> {
        match self {
            Failure::Timeout { attempt, .. }
            | Failure::Retryable { attempt, .. }
            | Failure::Fatal { attempt, .. } => Some(*attempt),
            Failure::CircuitRejected { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Failure::Retryable { error, .. } | Failure::Fatal { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Timeout { attempt, after } => {
                write!(f, "attempt {} timed out after {}ms", attempt, after.as_millis())
            }
            Failure::Retryable { attempt, error } => write!(f, "attempt {} failed: {}", attempt, error),
            Failure::Fatal { attempt, error } => {
                write!(f, "attempt {} failed fatally: {}", attempt, error)
            }
            Failure::CircuitRejected { retry_after } => {
                write!(f, "circuit open, retry after {}ms", retry_after.as_millis())
            }
        }
    }
}

/// Terminal failure of [`ResiliencePolicy::execute`].
#[derive(ThisError, Debug, Clone)]
pub enum ResilienceError {
    #[error("Circuit is open; retry after {}ms", .retry_after.as_millis())]
    CircuitOpen {
        retry_after: Duration,
        /// Attempts that failed before the circuit refused the next one
        failures: Vec<Failure>,
    },

    #[error("Operation cancelled by caller")]
    Cancelled,

    #[error("Retries exhausted after {} attempts", .failures.len())]
    Exhausted { failures: Vec<Failure> },

    #[error("Non-retryable failure after {} attempts", .failures.len())]
    Fatal { failures: Vec<Failure> },
}

impl ResilienceError {
    /// Every attempt failure collected before the policy gave up.
    pub fn failures(&self) -> &[Failure] {
        match self {
            ResilienceError::CircuitOpen { failures, .. }
            | ResilienceError::Exhausted { failures }
            | ResilienceError::Fatal { failures } => failures,
            ResilienceError::Cancelled => &[],
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }
}

type FatalPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

enum Attempt<T> {
    Completed(Result<T, Error>),
    TimedOut,
    Cancelled,
}

/// Timeout, retry and circuit breaking around an async operation.
///
/// One instance is meant to be shared by every caller; the circuit it owns
/// sees the interleaved outcomes of all of them.
pub struct ResiliencePolicy {
    config: ResilienceConfig,
    backoff: Backoff,
    breaker: CircuitBreaker,
    clock: Arc<dyn Clock>,
    is_fatal: FatalPredicate,
}

impl fmt::Debug for ResiliencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResiliencePolicy")
            .field("config", &self.config)
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl ResiliencePolicy {
    /// Creates a policy on the system clock.
    pub fn new(config: ResilienceConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ResilienceConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;

        let fatal_kinds = config.fatal_error_kinds.clone();
        let breaker = CircuitBreaker::new(
            "gateway",
            config.circuit_breaker_failure_threshold,
            config.circuit_breaker_duration(),
            clock.clone(),
        );

        Ok(Self {
            backoff: Backoff::from_config(&config),
            breaker,
            clock,
            is_fatal: Arc::new(move |err: &Error| fatal_kinds.contains(&err.kind)),
            config,
        })
    }

    /// Replaces the rule deciding which errors are never retried.
    pub fn with_fatal_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.is_fatal = Arc::new(predicate);
        self
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    /// Runs `operation` until it succeeds, fails fatally, runs out of
    /// retries, is refused by the circuit, or `cancel` fires.
    ///
    /// Each attempt receives a child of `cancel` that is also cancelled when
    /// the attempt times out. Attempts never overlap.
    pub async fn execute<T, F, Fut>(
        &self,
        mut operation: F,
        cancel: &CancellationToken,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if cancel.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }

        let timeout = self.config.timeout_per_attempt();
        let mut failures = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            let permit = match self.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(rejection) => {
                    counter!("gateway_circuit_rejections_total", 1);
                    failures.push(Failure::CircuitRejected {
                        retry_after: rejection.retry_after,
                    });
                    return Err(ResilienceError::CircuitOpen {
                        retry_after: rejection.retry_after,
                        failures,
                    });
                }
            };

            attempt += 1;
            let attempt_token = cancel.child_token();

            let outcome = tokio::select! {
                biased;
                result = operation(attempt_token.clone()) => Attempt::Completed(result),
                _ = cancel.cancelled() => Attempt::Cancelled,
                _ = self.clock.deadline(timeout) => Attempt::TimedOut,
            };
            attempt_token.cancel();

            let failure = match outcome {
                Attempt::Completed(Ok(value)) => {
                    permit.success();
                    debug!(attempt = %attempt, "Operation succeeded");
                    return Ok(value);
                }
                Attempt::Completed(Err(_)) | Attempt::Cancelled if cancel.is_cancelled() => {
                    debug!(attempt = %attempt, "Operation cancelled by caller");
                    return Err(ResilienceError::Cancelled);
                }
                Attempt::Cancelled => return Err(ResilienceError::Cancelled),
                Attempt::TimedOut => Failure::Timeout {
                    attempt,
                    after: timeout,
                },
                Attempt::Completed(Err(error)) => {
                    if (self.is_fatal)(&error) {
                        Failure::Fatal { attempt, error }
                    } else {
                        Failure::Retryable { attempt, error }
                    }
                }
            };

            permit.failure();
            let fatal = matches!(failure, Failure::Fatal { .. });
            warn!(attempt = %attempt, failure = %failure, "Attempt failed");
            failures.push(failure);

            if fatal {
                return Err(ResilienceError::Fatal { failures });
            }
            if attempt > self.config.max_retries {
                warn!(attempts = %attempt, "Retries exhausted");
                return Err(ResilienceError::Exhausted { failures });
            }

            let delay = self.backoff.delay(attempt);
            counter!("gateway_retries_total", 1);
            debug!(
                attempt = %attempt,
                delay_ms = %delay.as_millis(),
                "Backing off before retry"
            );
            if !self.clock.sleep_or_cancel(delay, cancel).await {
                return Err(ResilienceError::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::clock::ManualClock;
    use crate::types::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> ResilienceConfig {
        ResilienceConfig {
            max_retries: 2,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            timeout_per_attempt_ms: 50,
            jitter_factor: 0.0,
            circuit_breaker_failure_threshold: 10,
            circuit_breaker_duration_ms: 1000,
            fatal_error_kinds: vec![ErrorKind::Validation],
        }
    }

    fn policy(config: ResilienceConfig) -> (Arc<ManualClock>, ResiliencePolicy) {
        let clock = Arc::new(ManualClock::new());
        let policy = ResiliencePolicy::with_clock(config, clock.clone()).unwrap();
        (clock, policy)
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let err = ResiliencePolicy::new(ResilienceConfig {
            base_delay_ms: 10,
            max_delay_ms: 1,
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::DelayRange { base: 10, max: 1 });
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let (_clock, policy) = policy(config());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::new(ErrorKind::Validation, "missing url")) }
                },
                &CancellationToken::new(),
            )
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, ResilienceError::Fatal { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(policy.circuit_snapshot().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_custom_fatal_predicate() {
        let (_clock, policy) = policy(config());
        let policy = policy.with_fatal_predicate(|err| err.kind == ErrorKind::Security);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::new(ErrorKind::Validation, "retried now")) }
                },
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(ResilienceError::Exhausted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failures_carry_attempt_numbers() {
        let (_clock, policy) = policy(config());

        let err = policy
            .execute(
                |_| async { Err::<(), _>(Error::new(ErrorKind::External, "boom")) },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        let attempts: Vec<_> = err.failures().iter().filter_map(Failure::attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(err.to_string(), "Retries exhausted after 3 attempts");
    }

    #[tokio::test]
    async fn test_precancelled_token_never_invokes() {
        let (_clock, policy) = policy(config());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(ResilienceError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(policy.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_trips_mid_loop() {
        let (_clock, policy) = policy(ResilienceConfig {
            max_retries: 5,
            circuit_breaker_failure_threshold: 2,
            ..config()
        });
        let calls = AtomicU32::new(0);

        let err = policy
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(Error::new(ErrorKind::External, "down")) }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.failures().len(), 3);
        assert!(matches!(
            err.failures().last(),
            Some(Failure::CircuitRejected { .. })
        ));
    }
}
