//! Rejections produced by the breaker itself

use std::time::Duration;

use thiserror::Error;

use super::state::CircuitState;
use crate::error::ApiError;

/// Failures raised by a [`CircuitBreaker`](super::CircuitBreaker) rather
/// than by the wrapped call
///
/// Error types passed through the breaker implement
/// `From<CircuitBreakerError>` so the caller sees one error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError {
    /// The call was rejected without being invoked
    #[error("circuit '{name}' is {state}; retry after {}ms", retry_after.as_millis())]
    Open {
        name: String,
        state: CircuitState,
        retry_after: Duration,
    },

    /// The call did not finish within the breaker's timeout
    #[error("circuit '{name}': {operation} timed out after {}ms", timeout.as_millis())]
    Timeout {
        name: String,
        operation: String,
        timeout: Duration,
    },
}

impl From<CircuitBreakerError> for ApiError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::Open {
                name,
                state,
                retry_after,
            } => ApiError::CircuitOpen {
                name,
                state,
                retry_after,
            },
            CircuitBreakerError::Timeout {
                operation, timeout, ..
            } => ApiError::Timeout { operation, timeout },
        }
    }
}

impl From<CircuitBreakerError> for std::io::Error {
    fn from(err: CircuitBreakerError) -> Self {
        let kind = match err {
            CircuitBreakerError::Open { .. } => std::io::ErrorKind::Other,
            CircuitBreakerError::Timeout { .. } => std::io::ErrorKind::TimedOut,
        };
        std::io::Error::new(kind, err)
    }
}
