//! # fiscal-core
//!
//! Resilience core for the fiscal document API client providing:
//! - Error taxonomy shared by the client, the offline queue and the sync engine
//! - Configuration types and hierarchical loading (embedded defaults, file, env)
//! - Retry execution engine with jittered exponential backoff
//! - Circuit breaker per remote dependency
//! - A wall-clock abstraction for deterministic tests

pub mod circuit;
pub mod clock;
pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use circuit::{CircuitBreaker, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HierarchicalConfigLoader;
pub use error::{ApiError, ApiResult, Error, Result};
pub use retry::RetryExecutor;
pub use types::ResilienceConfig;
