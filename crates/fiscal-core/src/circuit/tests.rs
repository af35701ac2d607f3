//! State machine tests for the circuit breaker
//!
//! All tests run on tokio's paused clock so reset windows elapse instantly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::circuit::{CircuitBreaker, CircuitBreakerError, CircuitState, MAX_TRANSITION_LOG};
use crate::error::ApiError;
use crate::types::CircuitBreakerConfig;

fn config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        timeout_ms: 1000,
        reset_timeout_ms: 60_000,
        health_check_interval_ms: None,
    }
}

async fn fail(breaker: &CircuitBreaker) -> Result<(), ApiError> {
    breaker
        .execute("POST /receipts", || async {
            Err(ApiError::http(503, "unavailable"))
        })
        .await
}

async fn succeed(breaker: &CircuitBreaker) -> Result<(), ApiError> {
    breaker.execute("POST /receipts", || async { Ok(()) }).await
}

async fn trip(breaker: &CircuitBreaker) {
    for _ in 0..breaker.config().failure_threshold {
        let _ = fail(breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_opens_after_consecutive_failures() {
    let breaker = CircuitBreaker::new("fiscal-api", config());

    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Closed);

    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_count_without_state_change() {
    let breaker = CircuitBreaker::new("fiscal-api", config());

    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    succeed(&breaker).await.unwrap();
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().consecutive_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_open_rejects_without_invoking() {
    let breaker = CircuitBreaker::new("fiscal-api", config());
    trip(&breaker).await;

    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();
    let result: Result<(), ApiError> = breaker
        .execute("POST /receipts", || async move {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    match result {
        Err(ApiError::CircuitOpen {
            state, retry_after, ..
        }) => {
            assert_eq!(state, CircuitState::Open);
            assert_eq!(retry_after, Duration::from_secs(60));
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
    assert_eq!(breaker.metrics().rejected_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_then_close() {
    let breaker = CircuitBreaker::new("fiscal-api", config());
    trip(&breaker).await;

    tokio::time::advance(Duration::from_secs(61)).await;
    // Lazy: nothing happens until the next call
    assert_eq!(breaker.state(), CircuitState::Open);

    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens_and_restarts_window() {
    let breaker = CircuitBreaker::new("fiscal-api", config());
    trip(&breaker).await;

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(fail(&breaker).await.is_err());
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(30)).await;
    let err = succeed(&breaker).await.unwrap_err();
    assert!(err.is_circuit_open());

    tokio::time::advance(Duration::from_secs(31)).await;
    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure() {
    let breaker = CircuitBreaker::new(
        "fiscal-api",
        CircuitBreakerConfig {
            failure_threshold: 1,
            ..config()
        },
    );

    let result: Result<(), ApiError> = breaker
        .execute("GET /receipts/1", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(ApiError::Timeout { .. })));
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_filtered_errors_do_not_trip() {
    let breaker = CircuitBreaker::new("fiscal-api", config());

    for _ in 0..5 {
        let result: Result<(), ApiError> = breaker
            .execute_filtered(
                "PUT /receipts/1",
                || async { Err(ApiError::conflict("stale version", None)) },
                |err: &ApiError| !err.is_conflict(),
            )
            .await;
        assert!(result.unwrap_err().is_conflict());
    }

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().failed_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_and_health() {
    let breaker = CircuitBreaker::new("fiscal-api", config());
    assert!(breaker.is_healthy());

    succeed(&breaker).await.unwrap();
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;

    let metrics = breaker.metrics();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.successful_requests, 1);
    assert_eq!(metrics.failed_requests, 2);
    assert!(metrics.last_success.is_some());
    assert!(metrics.last_failure.is_some());
    assert!(metrics.failure_rate > 0.5);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(!breaker.is_healthy());
}

#[tokio::test(start_paused = true)]
async fn test_transition_log_records_reasons_and_is_bounded() {
    let breaker = CircuitBreaker::new("fiscal-api", config());
    trip(&breaker).await;

    let log = breaker.metrics().transitions;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].from, CircuitState::Closed);
    assert_eq!(log[0].to, CircuitState::Open);
    assert!(log[0].reason.contains("3 consecutive failures"));

    for _ in 0..MAX_TRANSITION_LOG {
        breaker.reset();
        breaker.force_open();
    }
    assert_eq!(breaker.metrics().transitions.len(), MAX_TRANSITION_LOG);
}

#[tokio::test(start_paused = true)]
async fn test_reset_and_force_open() {
    let breaker = CircuitBreaker::new("fiscal-api", config());

    breaker.force_open();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(succeed(&breaker).await.is_err());

    breaker.reset();
    assert_eq!(breaker.state(), CircuitState::Closed);
    succeed(&breaker).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_health_check_moves_to_half_open() {
    let breaker = Arc::new(CircuitBreaker::new(
        "fiscal-api",
        CircuitBreakerConfig {
            health_check_interval_ms: Some(5_000),
            ..config()
        },
    ));
    let handle = breaker.spawn_health_check().expect("interval configured");

    trip(&breaker).await;
    tokio::time::sleep(Duration::from_secs(66)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    handle.abort();
}

#[test]
fn test_health_check_disabled_without_interval() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    runtime.block_on(async {
        let breaker = Arc::new(CircuitBreaker::new("fiscal-api", config()));
        assert!(breaker.spawn_health_check().is_none());
    });
}

#[test]
fn test_breaker_error_maps_to_api_error() {
    let err = CircuitBreakerError::Timeout {
        name: "fiscal-api".to_string(),
        operation: "GET /status".to_string(),
        timeout: Duration::from_secs(10),
    };
    let api: ApiError = err.into();
    assert!(matches!(api, ApiError::Timeout { .. }));
    assert!(api.is_queueable());
}
