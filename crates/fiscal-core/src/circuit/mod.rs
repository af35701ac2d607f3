//! Circuit breaker for a single remote dependency
//!
//! The breaker fails fast while a backend keeps failing and lets a few probe
//! calls through once a cooldown has passed. Retrying is left to the caller
//! (see [`crate::retry`]); the usual composition is
//! `retry.execute(|| breaker.execute(name, call))`.

mod breaker;
mod error;
mod state;

pub use breaker::{CircuitBreaker, CircuitMetrics};
pub use error::CircuitBreakerError;
pub use state::{CircuitState, StateTransition, MAX_TRANSITION_LOG};

#[cfg(test)]
mod tests;
