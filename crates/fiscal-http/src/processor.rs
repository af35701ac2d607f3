//! Replays queued operations over HTTP

use async_trait::async_trait;
use fiscal_core::error::ApiResult;
use fiscal_offline::{OperationProcessor, ProcessResult, QueuedOperation};
use std::sync::Arc;

use crate::transport::{HttpRequest, HttpTransport, FORCE_OVERRIDE_HEADER, IDEMPOTENCY_KEY_HEADER};

/// [`OperationProcessor`] that sends the operation to its target endpoint
///
/// The operation id is sent as the idempotency key so the server can
/// recognise a replay of a call whose response was lost.
#[derive(Clone)]
pub struct HttpProcessor {
    transport: Arc<dyn HttpTransport>,
}

impl HttpProcessor {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Build the request for `operation`
    pub fn request_for(operation: &QueuedOperation) -> HttpRequest {
        let mut request = HttpRequest::new(operation.target.method, &operation.target.endpoint)
            .with_header(IDEMPOTENCY_KEY_HEADER, &operation.id);

        if !operation.payload.is_empty() {
            request = request.with_body(operation.payload.clone());
        }
        if operation.force_override {
            request = request.with_header(FORCE_OVERRIDE_HEADER, "true");
        }
        request
    }
}

#[async_trait]
impl OperationProcessor for HttpProcessor {
    async fn process(&self, operation: &QueuedOperation) -> ApiResult<ProcessResult> {
        let request = Self::request_for(operation);
        let bytes_uploaded = request.body.as_ref().map_or(0, |b| b.len() as u64);

        let response = self.transport.send(request).await?;
        tracing::debug!(
            operation_id = %operation.id,
            status = response.status,
            "operation replayed"
        );

        Ok(ProcessResult {
            result: response.json_value().ok().flatten(),
            bytes_uploaded,
            bytes_downloaded: response.body.len() as u64,
        })
    }
}
