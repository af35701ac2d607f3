//! Conflict strategies
//!
//! When the server reports a conflicting version, the configured strategy
//! decides what happens to the local operation. Merging is domain specific,
//! so the merge strategy delegates to a caller-supplied [`PayloadMerger`].

use fiscal_core::error::ApiResult;
use fiscal_core::types::ConflictStrategyKind;
use std::sync::Arc;

use crate::operation::QueuedOperation;

/// Produces a new payload from the local operation and the server's version
pub trait PayloadMerger: Send + Sync {
    fn merge(
        &self,
        local: &QueuedOperation,
        server_version: Option<&serde_json::Value>,
    ) -> ApiResult<Vec<u8>>;
}

impl<F> PayloadMerger for F
where
    F: Fn(&QueuedOperation, Option<&serde_json::Value>) -> ApiResult<Vec<u8>> + Send + Sync,
{
    fn merge(
        &self,
        local: &QueuedOperation,
        server_version: Option<&serde_json::Value>,
    ) -> ApiResult<Vec<u8>> {
        self(local, server_version)
    }
}

/// What to do with a conflicting operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictAction {
    /// Resubmit with the force-override marker (client wins)
    ResubmitWithOverride,
    /// Drop the local change and treat the operation as done (server wins)
    AcceptServer,
    /// Replace the operation with a merged payload
    Requeue(Vec<u8>),
    /// Leave the operation in `conflict` until resolved externally
    Hold,
}

/// Applies a [`ConflictStrategyKind`]
#[derive(Clone)]
pub struct ConflictResolver {
    strategy: ConflictStrategyKind,
    merger: Option<Arc<dyn PayloadMerger>>,
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("strategy", &self.strategy)
            .field("merger", &self.merger.is_some())
            .finish()
    }
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategyKind) -> Self {
        Self {
            strategy,
            merger: None,
        }
    }

    pub fn with_merger(mut self, merger: Arc<dyn PayloadMerger>) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn strategy(&self) -> ConflictStrategyKind {
        self.strategy
    }

    /// Decide using the configured strategy
    pub fn resolve(
        &self,
        local: &QueuedOperation,
        server_version: Option<&serde_json::Value>,
    ) -> ConflictAction {
        self.resolve_with(self.strategy, local, server_version)
    }

    /// Decide using an explicit strategy
    ///
    /// A merge without a registered merger, or a merger that fails, holds the
    /// operation for manual resolution rather than guessing.
    pub fn resolve_with(
        &self,
        strategy: ConflictStrategyKind,
        local: &QueuedOperation,
        server_version: Option<&serde_json::Value>,
    ) -> ConflictAction {
        match strategy {
            ConflictStrategyKind::ClientWins => ConflictAction::ResubmitWithOverride,
            ConflictStrategyKind::ServerWins => ConflictAction::AcceptServer,
            ConflictStrategyKind::Manual => ConflictAction::Hold,
            ConflictStrategyKind::Merge => {
                let Some(merger) = &self.merger else {
                    tracing::warn!(
                        operation_id = %local.id,
                        "merge strategy configured without a merger, holding for manual resolution"
                    );
                    return ConflictAction::Hold;
                };
                match merger.merge(local, server_version) {
                    Ok(payload) => ConflictAction::Requeue(payload),
                    Err(err) => {
                        tracing::warn!(operation_id = %local.id, error = %err, "merge failed");
                        ConflictAction::Hold
                    }
                }
            }
        }
    }
}
