//! Retry execution engine with policy-based configuration
//!
//! Runs an async operation up to `max_attempts` times with exponential
//! backoff and jitter between attempts. Errors are classified against the
//! policy's retryable status codes and error codes; anything else fails fast.
//!
//! # Features
//!
//! - Jitter strategies: none, full, equal, decorrelated
//! - Original error returned unchanged once attempts are exhausted
//! - Optional per-attempt timeout
//! - Observable retry attempts via the `RetryObserver` trait
//! - Cumulative metrics with a bounded attempt history
//!
//! # Example
//!
//! ```rust,no_run
//! use fiscal_core::error::ApiError;
//! use fiscal_core::retry::RetryExecutor;
//! use fiscal_core::types::RetryPolicy;
//!
//! async fn example() -> Result<String, ApiError> {
//!     let executor = RetryExecutor::new(RetryPolicy::default());
//!
//!     executor
//!         .execute(|| async {
//!             // Your fallible operation here
//!             Ok("success".to_string())
//!         })
//!         .await
//! }
//! ```

mod error;
mod executor;
mod metrics;
mod observer;
mod strategies;

pub use error::AttemptTimedOut;
pub use executor::{RetryExecutor, RetryExecutorBuilder};
pub use metrics::{AttemptRecord, RetryMetrics, MAX_ATTEMPT_HISTORY};
pub use observer::{NoOpObserver, RetryObserver, StatsObserver, TracingObserver};
pub use strategies::{
    apply_jitter, backoff_delay, is_retryable, next_delay, ClassifiableError, ClosurePredicate,
    NeverRetry, PolicyPredicate, RetryPredicate,
};
