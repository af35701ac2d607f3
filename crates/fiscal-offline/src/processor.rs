//! Processor registration
//!
//! A processor replays one queued operation against the remote API. The
//! registry maps `(resource, operation type)` to a processor, with an
//! optional fallback that handles anything not registered explicitly.

use async_trait::async_trait;
use fiscal_core::error::{ApiError, ApiResult};
use std::collections::HashMap;
use std::sync::Arc;

use crate::operation::{OperationType, QueuedOperation};

/// What a successful replay produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessResult {
    /// Response body, when the server returned one
    pub result: Option<serde_json::Value>,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

/// Replays queued operations
///
/// Errors use the shared [`ApiError`] taxonomy: a conflict must be reported
/// as [`ApiError::Conflict`] so the coordinator can apply its strategy.
#[async_trait]
pub trait OperationProcessor: Send + Sync {
    async fn process(&self, operation: &QueuedOperation) -> ApiResult<ProcessResult>;
}

/// Lookup table from `(resource, operation type)` to processor
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<(String, OperationType), Arc<dyn OperationProcessor>>,
    fallback: Option<Arc<dyn OperationProcessor>>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("registered", &self.processors.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `processor` for one resource and operation type
    pub fn register(
        &mut self,
        resource: impl Into<String>,
        operation_type: OperationType,
        processor: Arc<dyn OperationProcessor>,
    ) -> &mut Self {
        self.processors
            .insert((resource.into(), operation_type), processor);
        self
    }

    /// Register `processor` for every operation type of a resource
    pub fn register_resource(
        &mut self,
        resource: impl Into<String>,
        processor: Arc<dyn OperationProcessor>,
    ) -> &mut Self {
        let resource = resource.into();
        for operation_type in [
            OperationType::Create,
            OperationType::Update,
            OperationType::Delete,
            OperationType::Batch,
        ] {
            self.register(resource.clone(), operation_type, processor.clone());
        }
        self
    }

    /// Processor used when nothing more specific is registered
    pub fn set_fallback(&mut self, processor: Arc<dyn OperationProcessor>) -> &mut Self {
        self.fallback = Some(processor);
        self
    }

    pub fn resolve(
        &self,
        resource: &str,
        operation_type: OperationType,
    ) -> ApiResult<Arc<dyn OperationProcessor>> {
        self.processors
            .get(&(resource.to_string(), operation_type))
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| ApiError::ProcessorNotFound {
                resource: resource.to_string(),
                operation_type: operation_type.to_string(),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty() && self.fallback.is_none()
    }
}
