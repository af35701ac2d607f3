//! Common test helpers for fiscal-http integration tests
//!
//! Provides:
//! - Transports pointed at a `wiremock` server or at a closed port
//! - Fast, deterministic resilience settings
//! - An offline queue wired to a manual network monitor

#![allow(dead_code)]

use fiscal_core::types::{
    CircuitBreakerConfig, HttpConfig, JitterStrategy, QueueConfig, ResilienceConfig, RetryPolicy,
};
use fiscal_http::ReqwestTransport;
use fiscal_offline::{ManualNetworkMonitor, MemoryStorage, OperationQueue};
use std::sync::Arc;
use wiremock::MockServer;

/// Nothing listens here, so connections are refused
pub const UNREACHABLE_URL: &str = "http://127.0.0.1:1";

pub fn transport_for(server: &MockServer) -> Arc<ReqwestTransport> {
    transport_at(&server.uri())
}

pub fn transport_at(base_url: &str) -> Arc<ReqwestTransport> {
    Arc::new(
        ReqwestTransport::new(&HttpConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            ..HttpConfig::default()
        })
        .unwrap(),
    )
}

/// Three attempts 10ms apart, no jitter
pub fn fast_config() -> ResilienceConfig {
    ResilienceConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
            jitter: JitterStrategy::None,
            ..RetryPolicy::default()
        },
        circuit_breaker: CircuitBreakerConfig {
            timeout_ms: 5_000,
            ..CircuitBreakerConfig::default()
        },
        queue: QueueConfig::default(),
        ..ResilienceConfig::default()
    }
}

pub struct Offline {
    pub queue: Arc<OperationQueue>,
    pub network: Arc<ManualNetworkMonitor>,
}

pub async fn offline_queue(online: bool) -> Offline {
    let queue = OperationQueue::open(QueueConfig::default(), Arc::new(MemoryStorage::new()))
        .await
        .unwrap();
    Offline {
        queue: Arc::new(queue),
        network: Arc::new(ManualNetworkMonitor::new(online)),
    }
}

/// Value of `name` on a request the mock server received
pub fn header_value(request: &wiremock::Request, name: &str) -> Option<String> {
    request
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
