//! Error raised when a single retry attempt exceeds its time box
//!
//! The executor re-raises operation errors unchanged, so a timed-out attempt
//! has to be expressed in the operation's own error type. Error types used
//! with a per-attempt timeout implement `From<AttemptTimedOut>`.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::error::ApiError;

/// A single attempt exceeded the policy's per-attempt timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimedOut {
    /// Which attempt timed out (1-indexed)
    pub attempt: u32,
    /// The timeout duration that was exceeded
    pub timeout: Duration,
}

impl fmt::Display for AttemptTimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempt {} timed out after {}ms",
            self.attempt,
            self.timeout.as_millis()
        )
    }
}

impl std::error::Error for AttemptTimedOut {}

impl From<AttemptTimedOut> for ApiError {
    fn from(err: AttemptTimedOut) -> Self {
        ApiError::timeout(format!("attempt {}", err.attempt), err.timeout)
    }
}

impl From<AttemptTimedOut> for io::Error {
    fn from(err: AttemptTimedOut) -> Self {
        io::Error::new(io::ErrorKind::TimedOut, err)
    }
}
