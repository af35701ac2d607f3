//! The circuit breaker state machine

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::CircuitBreakerError;
use super::state::{CircuitState, StateTransition, MAX_TRANSITION_LOG};
use crate::types::CircuitBreakerConfig;

/// Failure rate at or above which a closed breaker reports unhealthy
const UNHEALTHY_FAILURE_RATE: f64 = 0.5;

/// Snapshot of a breaker's counters and recent transitions
#[derive(Debug, Clone, Serialize)]
pub struct CircuitMetrics {
    pub name: String,
    pub state: CircuitState,
    /// Calls that were actually invoked
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Calls turned away while open
    pub rejected_requests: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// `failed_requests / total_requests`, or 0 before any call
    pub failure_rate: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub transitions: Vec<StateTransition>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    rejected_requests: u64,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    transitions: VecDeque<StateTransition>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            rejected_requests: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_success: None,
            last_failure: None,
            transitions: VecDeque::new(),
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }

    fn transition(&mut self, name: &str, to: CircuitState, reason: impl Into<String>) {
        let from = self.state;
        if from == to {
            return;
        }
        let reason = reason.into();

        match to {
            CircuitState::Open => {
                tracing::warn!(circuit = %name, from = %from, reason = %reason, "circuit opened");
                self.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                tracing::info!(circuit = %name, reason = %reason, "circuit half-open");
            }
            CircuitState::Closed => {
                tracing::info!(circuit = %name, from = %from, reason = %reason, "circuit closed");
                self.opened_at = None;
            }
        }

        self.state = to;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;

        if self.transitions.len() == MAX_TRANSITION_LOG {
            self.transitions.pop_front();
        }
        self.transitions.push_back(StateTransition {
            from,
            to,
            at: Utc::now(),
            reason,
        });
    }
}

/// Per-dependency failure detector
///
/// After `failure_threshold` consecutive failures the breaker opens and
/// rejects calls with [`CircuitBreakerError::Open`] without invoking them.
/// Once `reset_timeout` has elapsed the next call is let through as a probe
/// (half-open); `success_threshold` consecutive probe successes close the
/// circuit again, a single probe failure reopens it.
///
/// The breaker never retries. Timing uses `tokio::time`, so tests can run on
/// a paused clock.
///
/// # Example
///
/// ```rust,no_run
/// use fiscal_core::circuit::CircuitBreaker;
/// use fiscal_core::error::ApiError;
/// use fiscal_core::types::CircuitBreakerConfig;
///
/// async fn example() -> Result<u16, ApiError> {
///     let breaker = CircuitBreaker::new("fiscal-api", CircuitBreakerConfig::default());
///     breaker
///         .execute("GET /health", || async { Ok::<_, ApiError>(200) })
///         .await
/// }
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, without applying the lazy OPEN -> HALF_OPEN check
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Closed and failing less than half of the time
    pub fn is_healthy(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.state == CircuitState::Closed && inner.failure_rate() < UNHEALTHY_FAILURE_RATE
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let inner = self.inner.lock().unwrap();
        CircuitMetrics {
            name: self.name.clone(),
            state: inner.state,
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            rejected_requests: inner.rejected_requests,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            failure_rate: inner.failure_rate(),
            last_success: inner.last_success,
            last_failure: inner.last_failure,
            transitions: inner.transitions.iter().cloned().collect(),
        }
    }

    /// Run `f` through the breaker, counting every error as a failure
    pub async fn execute<F, Fut, T, E>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitBreakerError>,
    {
        self.execute_filtered(operation, f, |_| true).await
    }

    /// Run `f` through the breaker
    ///
    /// Errors for which `is_failure` returns false (for example a conflict
    /// or validation rejection from a healthy server) are passed through
    /// and count as successful calls.
    pub async fn execute_filtered<F, Fut, T, E, P>(
        &self,
        operation: &str,
        f: F,
        is_failure: P,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitBreakerError>,
        P: Fn(&E) -> bool,
    {
        self.admit()?;

        let timeout = self.config.timeout();
        let outcome = if timeout.is_zero() {
            f().await
        } else {
            match tokio::time::timeout(timeout, f()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        circuit = %self.name,
                        operation = %operation,
                        timeout_ms = timeout.as_millis() as u64,
                        "call timed out"
                    );
                    Err(E::from(CircuitBreakerError::Timeout {
                        name: self.name.clone(),
                        operation: operation.to_string(),
                        timeout,
                    }))
                }
            }
        };

        match &outcome {
            Err(err) if is_failure(err) => self.on_failure(operation),
            _ => self.on_success(),
        }
        outcome
    }

    /// Close the circuit and clear the consecutive counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.transition(&self.name, CircuitState::Closed, "manual reset");
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
    }

    /// Open the circuit regardless of the failure count
    pub fn force_open(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open {
            inner.opened_at = Some(Instant::now());
        } else {
            inner.transition(&self.name, CircuitState::Open, "forced open");
        }
    }

    /// Apply the OPEN -> HALF_OPEN transition if the reset timeout elapsed
    ///
    /// Returns the state afterwards.
    pub fn check_reset(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Spawn a task that runs [`check_reset`](Self::check_reset) on the
    /// configured health-check interval
    ///
    /// Returns `None` when no interval is configured. The task ends when the
    /// breaker is dropped.
    pub fn spawn_health_check(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let period = self.config.health_check_interval()?;
        let breaker: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(breaker) = breaker.upgrade() else {
                    break;
                };
                breaker.check_reset();
            }
        }))
    }

    fn maybe_half_open(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
        if elapsed >= self.config.reset_timeout() {
            inner.transition(&self.name, CircuitState::HalfOpen, "reset timeout elapsed");
        }
    }

    fn admit(&self) -> Result<(), CircuitBreakerError> {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_half_open(&mut inner);

        if inner.state != CircuitState::Open {
            return Ok(());
        }

        inner.rejected_requests += 1;
        let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
        let retry_after = self
            .config
            .reset_timeout()
            .checked_sub(elapsed)
            .unwrap_or(Duration::ZERO);
        tracing::debug!(
            circuit = %self.name,
            retry_after_ms = retry_after.as_millis() as u64,
            "call rejected"
        );
        Err(CircuitBreakerError::Open {
            name: self.name.clone(),
            state: inner.state,
            retry_after,
        })
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_requests += 1;
        inner.successful_requests += 1;
        inner.last_success = Some(Utc::now());
        inner.consecutive_failures = 0;
        inner.consecutive_successes += 1;

        if inner.state == CircuitState::HalfOpen
            && inner.consecutive_successes >= self.config.success_threshold
        {
            let reason = format!("{} consecutive successes", inner.consecutive_successes);
            inner.transition(&self.name, CircuitState::Closed, reason);
        }
    }

    fn on_failure(&self, operation: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_requests += 1;
        inner.failed_requests += 1;
        inner.last_failure = Some(Utc::now());
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                let reason = format!("probe '{operation}' failed");
                inner.transition(&self.name, CircuitState::Open, reason);
            }
            CircuitState::Closed
                if inner.consecutive_failures >= self.config.failure_threshold =>
            {
                let reason = format!("{} consecutive failures", inner.consecutive_failures);
                inner.transition(&self.name, CircuitState::Open, reason);
            }
            _ => {}
        }
    }
}
