//! Retry execution engine
//!
//! This module provides the core retry execution logic with configurable
//! policies, predicates, and observers.

use std::error::Error;
use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

use crate::types::RetryPolicy;

use super::error::AttemptTimedOut;
use super::metrics::{MetricsState, RetryMetrics};
use super::observer::{NoOpObserver, RetryObserver};
use super::strategies::{apply_jitter, next_delay, PolicyPredicate, RetryPredicate};

/// Builder for configuring a `RetryExecutor`
///
/// # Example
///
/// ```rust
/// use fiscal_core::retry::{RetryExecutorBuilder, TracingObserver};
/// use fiscal_core::types::RetryPolicy;
///
/// let executor = RetryExecutorBuilder::new()
///     .with_policy(RetryPolicy::default())
///     .with_observer(TracingObserver::new("receipts"))
///     .build();
/// ```
pub struct RetryExecutorBuilder<P = PolicyPredicate, O = NoOpObserver> {
    policy: RetryPolicy,
    predicate: P,
    observer: O,
}

impl Default for RetryExecutorBuilder<PolicyPredicate, NoOpObserver> {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutorBuilder<PolicyPredicate, NoOpObserver> {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
            predicate: PolicyPredicate,
            observer: NoOpObserver,
        }
    }
}

impl<P, O> RetryExecutorBuilder<P, O> {
    /// Set the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the retry predicate
    ///
    /// Without a custom predicate, errors are classified against the policy's
    /// retryable status and error-code sets.
    pub fn with_predicate<P2>(self, predicate: P2) -> RetryExecutorBuilder<P2, O> {
        RetryExecutorBuilder {
            policy: self.policy,
            predicate,
            observer: self.observer,
        }
    }

    /// Set the observer
    pub fn with_observer<O2>(self, observer: O2) -> RetryExecutorBuilder<P, O2> {
        RetryExecutorBuilder {
            policy: self.policy,
            predicate: self.predicate,
            observer,
        }
    }

    /// Build the executor
    pub fn build(self) -> RetryExecutor<P, O> {
        RetryExecutor {
            policy: self.policy,
            predicate: self.predicate,
            observer: self.observer,
            metrics: Mutex::new(MetricsState::default()),
        }
    }
}

/// A retry executor with configurable policy, predicate, and observer
///
/// Attempts run strictly one after another. A failure that is not retryable,
/// or the failure of the last attempt, is returned to the caller unchanged so
/// upstream classification (for example "should this be queued?") keeps
/// working.
pub struct RetryExecutor<P = PolicyPredicate, O = NoOpObserver> {
    policy: RetryPolicy,
    predicate: P,
    observer: O,
    metrics: Mutex<MetricsState>,
}

impl RetryExecutor<PolicyPredicate, NoOpObserver> {
    /// Create an executor that classifies errors with `policy`
    pub fn new(policy: RetryPolicy) -> Self {
        RetryExecutorBuilder::new().with_policy(policy).build()
    }
}

impl<P, O> RetryExecutor<P, O> {
    /// The policy this executor applies
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Snapshot of cumulative metrics
    pub fn metrics(&self) -> RetryMetrics {
        self.metrics.lock().unwrap().snapshot()
    }

    /// Reset cumulative metrics
    pub fn reset_metrics(&self) {
        *self.metrics.lock().unwrap() = MetricsState::default();
    }
}

impl<P, O> RetryExecutor<P, O>
where
    O: RetryObserver,
{
    /// Execute an operation with retry logic
    ///
    /// # Arguments
    ///
    /// * `op` - A closure that returns a future representing the operation
    ///
    /// # Returns
    ///
    /// The result of the first successful attempt, or the error of the last
    /// attempt made.
    pub async fn execute<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + From<AttemptTimedOut> + 'static,
        P: RetryPredicate<E>,
    {
        let start = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let base = self.policy.base_delay();
        let max = self.policy.max_delay();
        let mut current_delay = base;
        let mut previous_delay = base;
        let mut attempt = 1;

        loop {
            self.observer.on_attempt_start(attempt, max_attempts);
            self.metrics.lock().unwrap().record_attempt();

            let outcome = match self.policy.attempt_timeout() {
                Some(timeout) => match tokio::time::timeout(timeout, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(E::from(AttemptTimedOut { attempt, timeout })),
                },
                None => op().await,
            };

            let err = match outcome {
                Ok(result) => {
                    self.metrics.lock().unwrap().record_outcome(attempt, true);
                    self.observer.on_success(attempt, start.elapsed());
                    return Ok(result);
                }
                Err(err) => err,
            };

            // Check if this error should be retried
            if !self.predicate.should_retry(&self.policy, &err) {
                {
                    let mut metrics = self.metrics.lock().unwrap();
                    metrics.record_failure(attempt, std::time::Duration::ZERO, err.to_string());
                    metrics.record_outcome(attempt, false);
                }
                self.observer.on_non_retryable(attempt, &err);
                return Err(err);
            }

            // Check if this was the last attempt
            if attempt >= max_attempts {
                {
                    let mut metrics = self.metrics.lock().unwrap();
                    metrics.record_failure(attempt, std::time::Duration::ZERO, err.to_string());
                    metrics.record_outcome(attempt, false);
                }
                self.observer.on_exhausted(attempt, &err);
                return Err(err);
            }

            let delay = apply_jitter(self.policy.jitter, current_delay, base, max, previous_delay);

            self.metrics
                .lock()
                .unwrap()
                .record_failure(attempt, delay, err.to_string());
            self.observer.on_attempt_failed(attempt, &err, delay);
            drop(err);

            // Wait before next attempt
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            previous_delay = delay;
            current_delay = next_delay(current_delay, self.policy.backoff_multiplier, max);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::retry::observer::StatsObserver;
    use crate::retry::strategies::ClosurePredicate;
    use crate::types::JitterStrategy;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10, // Short delays for tests
            max_delay_ms: 100,
            jitter: JitterStrategy::None,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_immediate_success() {
        let observer = Arc::new(StatsObserver::new());

        let result: Result<&str, ApiError> = RetryExecutorBuilder::new()
            .with_policy(test_policy())
            .with_observer(observer.clone())
            .build()
            .execute(|| async { Ok("success") })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(observer.attempt_starts(), 1);
        assert_eq!(observer.successes(), 1);
        assert_eq!(observer.failures(), 0);
    }

    #[tokio::test]
    async fn test_success_after_retry() {
        let executor = RetryExecutor::new(test_policy());
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<&str, ApiError> = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt < 2 {
                        Err(ApiError::network("ECONNRESET", "reset by peer"))
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        let metrics = executor.metrics();
        assert_eq!(metrics.total_attempts, 2);
        assert_eq!(metrics.successful_retries, 1);
        assert_eq!(metrics.failed_retries, 0);
        assert_eq!(metrics.history.len(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let observer = Arc::new(StatsObserver::new());
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), ApiError> = RetryExecutorBuilder::new()
            .with_policy(test_policy())
            .with_observer(observer.clone())
            .build()
            .execute(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::validation("vat number is malformed"))
                }
            })
            .await;

        assert!(matches!(result, Err(ApiError::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.non_retryable(), 1);
    }

    #[tokio::test]
    async fn test_custom_predicate() {
        let predicate = ClosurePredicate::new(|err: &io::Error| err.kind() == io::ErrorKind::Other);
        let executor = RetryExecutorBuilder::new()
            .with_policy(test_policy())
            .with_predicate(predicate)
            .build();

        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), io::Error> = executor
            .execute(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(io::Error::new(io::ErrorKind::Other, "flaky"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_max_attempts_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..test_policy()
        };
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), ApiError> = RetryExecutor::new(policy)
            .execute(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::network("ECONNRESET", "reset"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
