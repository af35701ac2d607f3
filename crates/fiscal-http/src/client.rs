//! Resilient API client
//!
//! Every call runs as `RetryExecutor(CircuitBreaker(transport))`. With an
//! offline queue attached, a mutating call that cannot complete for a
//! queueable reason (offline, transient failure, open circuit) is persisted
//! and the caller gets a queued confirmation instead of an error.

use fiscal_core::circuit::CircuitBreaker;
use fiscal_core::error::{ApiError, ApiResult};
use fiscal_core::retry::{
    PolicyPredicate, RetryExecutor, RetryExecutorBuilder, RetryMetrics, TracingObserver,
};
use fiscal_core::types::{CircuitBreakerConfig, ResilienceConfig, RetryPolicy};
use fiscal_offline::{
    EnqueueOptions, HttpMethod, NetworkMonitor, OperationQueue, OperationType, Priority,
};
use serde::Serialize;
use std::sync::Arc;

use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Result of [`ResilientClient::request`]
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// The server answered with a success status
    Completed(HttpResponse),
    /// The call was deferred to the offline queue
    Queued { operation_id: String },
}

impl RequestOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::Completed(response) => Some(response),
            Self::Queued { .. } => None,
        }
    }

    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Self::Queued { operation_id } => Some(operation_id),
            Self::Completed(_) => None,
        }
    }
}

/// A call against the fiscal API
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub endpoint: String,
    /// Resource family used for processor lookup when queued;
    /// defaults to the first path segment
    pub resource: String,
    pub body: Option<Vec<u8>>,
    pub priority: Priority,
    /// Allow deferring this call to the offline queue
    pub queueable: bool,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let resource = endpoint
            .trim_start_matches('/')
            .split(|c| c == '/' || c == '?')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            method,
            endpoint,
            resource,
            body: None,
            priority: Priority::default(),
            queueable: true,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, endpoint)
    }

    pub fn patch(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, endpoint)
    }

    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> ApiResult<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| ApiError::validation(format!("request body is not serializable: {e}")))?;
        self.body = Some(body);
        Ok(self)
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Fail instead of queueing
    pub fn without_queueing(mut self) -> Self {
        self.queueable = false;
        self
    }

    /// Queue operation type for a mutating method
    pub fn operation_type(&self) -> Option<OperationType> {
        match self.method {
            HttpMethod::Post => Some(OperationType::Create),
            HttpMethod::Put | HttpMethod::Patch => Some(OperationType::Update),
            HttpMethod::Delete => Some(OperationType::Delete),
            HttpMethod::Get => None,
        }
    }

    fn to_http(&self) -> HttpRequest {
        let mut request = HttpRequest::new(self.method, &self.endpoint);
        if let Some(body) = &self.body {
            request = request.with_body(body.clone());
        }
        request
    }
}

struct OfflineQueue {
    queue: Arc<OperationQueue>,
    network: Arc<dyn NetworkMonitor>,
}

/// Builder for [`ResilientClient`]
pub struct ResilientClientBuilder {
    transport: Arc<dyn HttpTransport>,
    retry_policy: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
    breaker_config: CircuitBreakerConfig,
    offline: Option<OfflineQueue>,
}

impl ResilientClientBuilder {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            retry_policy: RetryPolicy::default(),
            breaker: None,
            breaker_config: CircuitBreakerConfig::default(),
            offline: None,
        }
    }

    pub fn with_config(mut self, config: &ResilienceConfig) -> Self {
        self.retry_policy = config.retry.clone();
        self.breaker_config = config.circuit_breaker.clone();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Use a breaker shared with the sync coordinator
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Defer mutating calls to `queue` when they cannot complete
    pub fn with_offline_queue(
        mut self,
        queue: Arc<OperationQueue>,
        network: Arc<dyn NetworkMonitor>,
    ) -> Self {
        self.offline = Some(OfflineQueue { queue, network });
        self
    }

    pub fn build(self) -> ResilientClient {
        ResilientClient {
            transport: self.transport,
            retry: RetryExecutorBuilder::new()
                .with_policy(self.retry_policy)
                .with_observer(TracingObserver::new("api"))
                .build(),
            breaker: self.breaker.unwrap_or_else(|| {
                Arc::new(CircuitBreaker::new("fiscal-api", self.breaker_config))
            }),
            offline: self.offline,
        }
    }
}

/// API client with retry, circuit breaking and optional offline queueing
pub struct ResilientClient {
    transport: Arc<dyn HttpTransport>,
    retry: RetryExecutor<PolicyPredicate, TracingObserver>,
    breaker: Arc<CircuitBreaker>,
    offline: Option<OfflineQueue>,
}

impl ResilientClient {
    pub fn builder(transport: Arc<dyn HttpTransport>) -> ResilientClientBuilder {
        ResilientClientBuilder::new(transport)
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry_metrics(&self) -> RetryMetrics {
        self.retry.metrics()
    }

    /// Send `request`, queueing it when it is mutating and cannot complete
    /// for a queueable reason
    ///
    /// Validation errors, conflicts and other rejections are returned
    /// directly and never queued.
    pub async fn request(&self, request: ApiRequest) -> ApiResult<RequestOutcome> {
        let offline = self
            .offline
            .as_ref()
            .filter(|_| request.queueable && request.method.is_mutating());

        if let Some(offline) = offline {
            if !offline.network.is_online() {
                return self.enqueue(offline, request, "offline").await;
            }
        }

        match self.execute(request.to_http()).await {
            Ok(response) => Ok(RequestOutcome::Completed(response)),
            Err(err) => match offline {
                Some(offline) if err.is_queueable() => {
                    let reason = err.to_string();
                    self.enqueue(offline, request, &reason).await
                }
                _ => Err(err),
            },
        }
    }

    /// Send a raw request through retry and the circuit breaker, without
    /// queueing
    pub async fn execute(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        let label = request.label();
        let label = label.as_str();
        let request = &request;
        let transport = &self.transport;
        let breaker = &self.breaker;

        self.retry
            .execute(|| async move {
                breaker
                    .execute_filtered(
                        label,
                        || transport.send(request.clone()),
                        ApiError::is_dependency_failure,
                    )
                    .await
            })
            .await
    }

    /// GET `endpoint` and decode the JSON response
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> ApiResult<T> {
        self.execute(HttpRequest::get(endpoint)).await?.json()
    }

    async fn enqueue(
        &self,
        offline: &OfflineQueue,
        request: ApiRequest,
        reason: &str,
    ) -> ApiResult<RequestOutcome> {
        let Some(operation_type) = request.operation_type() else {
            return Err(ApiError::validation(format!(
                "{} requests cannot be queued",
                request.method
            )));
        };

        let options = EnqueueOptions::default()
            .with_priority(request.priority)
            .with_endpoint(request.endpoint.clone())
            .with_method(request.method);
        let operation_id = offline
            .queue
            .enqueue(
                operation_type,
                &request.resource,
                request.body.unwrap_or_default(),
                options,
            )
            .await?;

        tracing::info!(
            operation_id = %operation_id,
            method = %request.method,
            endpoint = %request.endpoint,
            reason,
            "request queued for later sync"
        );
        Ok(RequestOutcome::Queued { operation_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_defaults_to_first_segment() {
        assert_eq!(ApiRequest::post("/receipts").resource, "receipts");
        assert_eq!(ApiRequest::put("invoices/INV-1").resource, "invoices");
        assert_eq!(ApiRequest::get("/receipts?day=1").resource, "receipts");
        assert_eq!(
            ApiRequest::post("/receipts").with_resource("sales").resource,
            "sales"
        );
    }

    #[test]
    fn test_operation_type_from_method() {
        assert_eq!(
            ApiRequest::post("/r").operation_type(),
            Some(OperationType::Create)
        );
        assert_eq!(
            ApiRequest::patch("/r").operation_type(),
            Some(OperationType::Update)
        );
        assert_eq!(
            ApiRequest::delete("/r").operation_type(),
            Some(OperationType::Delete)
        );
        assert_eq!(ApiRequest::get("/r").operation_type(), None);
    }

    #[test]
    fn test_outcome_accessors() {
        let queued = RequestOutcome::Queued {
            operation_id: "op-1".to_string(),
        };
        assert!(queued.is_queued());
        assert_eq!(queued.operation_id(), Some("op-1"));
        assert!(queued.response().is_none());
    }
}
