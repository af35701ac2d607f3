//! Retry delay strategies and predicates
//!
//! This module computes backoff delays with jitter and decides whether an
//! error is worth another attempt.

use crate::error::ApiError;
use crate::types::{JitterStrategy, RetryPolicy};
use rand::Rng;
use std::io;
use std::time::Duration;

/// Apply a jitter strategy to a computed delay
///
/// # Arguments
///
/// * `strategy` - The jitter strategy to apply
/// * `delay` - The backoff delay before randomisation
/// * `base` - The policy's base delay (lower bound for decorrelated jitter)
/// * `max` - The policy's maximum delay
/// * `previous` - The delay actually slept before the previous attempt
///
/// # Example
///
/// ```rust
/// use fiscal_core::retry::apply_jitter;
/// use fiscal_core::types::JitterStrategy;
/// use std::time::Duration;
///
/// let delay = apply_jitter(
///     JitterStrategy::None,
///     Duration::from_millis(2000),
///     Duration::from_millis(1000),
///     Duration::from_millis(30000),
///     Duration::from_millis(1000),
/// );
/// assert_eq!(delay, Duration::from_millis(2000));
/// ```
pub fn apply_jitter(
    strategy: JitterStrategy,
    delay: Duration,
    base: Duration,
    max: Duration,
    previous: Duration,
) -> Duration {
    let delay_ms = delay.as_millis() as u64;

    let jittered_ms = match strategy {
        JitterStrategy::None => delay_ms,

        JitterStrategy::Full => {
            if delay_ms == 0 {
                0
            } else {
                rand::rng().random_range(0..=delay_ms)
            }
        }

        JitterStrategy::Equal => {
            let half = delay_ms / 2;
            let spread = delay_ms - half;
            half + if spread == 0 {
                0
            } else {
                rand::rng().random_range(0..=spread)
            }
        }

        JitterStrategy::Decorrelated => {
            let low = base.as_millis() as u64;
            let high = (previous.as_millis() as u64)
                .saturating_mul(3)
                .min(max.as_millis() as u64);
            if high <= low {
                low
            } else {
                rand::rng().random_range(low..=high)
            }
        }
    };

    Duration::from_millis(jittered_ms)
}

/// Grow a delay by the backoff multiplier, capped at `max`
pub fn next_delay(current: Duration, multiplier: f64, max: Duration) -> Duration {
    let grown_ms = current.as_millis() as f64 * multiplier;
    let capped_ms = grown_ms.min(max.as_millis() as f64);
    Duration::from_millis(capped_ms as u64)
}

/// Delay before retry number `attempt` (1-indexed) under pure exponential
/// backoff: `base * multiplier^(attempt-1)`, capped at `max`.
///
/// ```rust
/// use fiscal_core::retry::backoff_delay;
/// use std::time::Duration;
///
/// let base = Duration::from_millis(1000);
/// let max = Duration::from_millis(30000);
/// assert_eq!(backoff_delay(base, 2.0, max, 1), Duration::from_millis(1000));
/// assert_eq!(backoff_delay(base, 2.0, max, 3), Duration::from_millis(4000));
/// assert_eq!(backoff_delay(base, 2.0, max, 10), max);
/// ```
pub fn backoff_delay(base: Duration, multiplier: f64, max: Duration, attempt: u32) -> Duration {
    let attempt_index = attempt.saturating_sub(1);
    let factor = multiplier.powf(attempt_index as f64);
    let delay_ms = (base.as_millis() as f64 * factor).min(max.as_millis() as f64);
    Duration::from_millis(delay_ms as u64)
}

/// Errors that expose the signals used for retry classification
pub trait ClassifiableError {
    /// An explicit retryable marker set by the error source
    fn retryable_flag(&self) -> Option<bool>;

    /// The HTTP status code, if the error carries one
    fn status_code(&self) -> Option<u16>;

    /// A machine-readable error code, if the error carries one
    fn error_code(&self) -> Option<&str>;
}

impl ClassifiableError for ApiError {
    fn retryable_flag(&self) -> Option<bool> {
        ApiError::retryable_flag(self)
    }

    fn status_code(&self) -> Option<u16> {
        ApiError::status_code(self)
    }

    fn error_code(&self) -> Option<&str> {
        ApiError::error_code(self)
    }
}

impl ClassifiableError for io::Error {
    fn retryable_flag(&self) -> Option<bool> {
        None
    }

    fn status_code(&self) -> Option<u16> {
        None
    }

    fn error_code(&self) -> Option<&str> {
        match self.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                Some("ECONNRESET")
            }
            io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
            io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
            io::ErrorKind::BrokenPipe => Some("EPIPE"),
            io::ErrorKind::NotConnected => Some("NETWORK_ERROR"),
            _ => None,
        }
    }
}

/// Decide retryability from a policy, in priority order:
/// explicit flag, retryable status set, retryable error-code set, then the
/// built-in transient network codes.
pub fn is_retryable<E: ClassifiableError + ?Sized>(policy: &RetryPolicy, error: &E) -> bool {
    if let Some(flag) = error.retryable_flag() {
        return flag;
    }

    if let Some(status) = error.status_code() {
        if policy.retryable_status_codes.contains(&status) {
            return true;
        }
    }

    if let Some(code) = error.error_code() {
        if policy.retryable_error_codes.contains(code) {
            return true;
        }
        return crate::error::TRANSIENT_NETWORK_CODES.contains(&code);
    }

    false
}

/// A predicate that determines whether an error should be retried
///
/// The executor passes its policy along so predicates can consult the
/// configured retryable sets.
pub trait RetryPredicate<E: ?Sized>: Send + Sync {
    /// Determine whether the given error should be retried
    fn should_retry(&self, policy: &RetryPolicy, error: &E) -> bool;
}

/// Classifies errors against the executor's [`RetryPolicy`] (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyPredicate;

impl<E: ClassifiableError + ?Sized> RetryPredicate<E> for PolicyPredicate {
    fn should_retry(&self, policy: &RetryPolicy, error: &E) -> bool {
        is_retryable(policy, error)
    }
}

/// A predicate that never retries (no errors are retryable)
#[derive(Debug, Clone, Copy)]
pub struct NeverRetry;

impl<E: ?Sized> RetryPredicate<E> for NeverRetry {
    fn should_retry(&self, _policy: &RetryPolicy, _error: &E) -> bool {
        false
    }
}

/// A predicate that uses a closure to determine retryability
pub struct ClosurePredicate<F> {
    predicate: F,
}

impl<F> ClosurePredicate<F> {
    /// Create a new closure-based predicate
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<E, F> RetryPredicate<E> for ClosurePredicate<F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_retry(&self, _policy: &RetryPolicy, error: &E) -> bool {
        (self.predicate)(error)
    }
}
