//! Sync lifecycle events
//!
//! Published on a `tokio::sync::broadcast` channel. For any operation id the
//! `OperationQueued` event is sent before `OperationCompleted` or
//! `OperationFailed`: the queue publishes it while still holding its write
//! lock, and nothing can process the operation before that lock is released.

use chrono::{DateTime, Utc};
use fiscal_core::types::ConflictStrategyKind;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::operation::{OperationType, Priority};

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Observable sync lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// An operation was accepted into the queue
    OperationQueued {
        operation_id: String,
        resource: String,
        operation_type: OperationType,
        priority: Priority,
    },

    /// An operation was applied by the server and removed
    OperationCompleted {
        operation_id: String,
        duration_ms: u64,
    },

    /// An operation failed and will be tried again in a later pass
    OperationRetryScheduled {
        operation_id: String,
        attempt: u32,
        next_retry: DateTime<Utc>,
        error: String,
    },

    /// An operation failed terminally and was evicted
    OperationFailed {
        operation_id: String,
        attempts: u32,
        error: String,
    },

    /// The server reported a conflicting version
    OperationConflict {
        operation_id: String,
        strategy: ConflictStrategyKind,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        replacement_id: Option<String>,
    },

    /// A sync pass picked up a batch
    SyncStarted { batch_id: String, size: usize },

    /// A sync pass finished
    SyncCompleted {
        batch_id: String,
        completed: usize,
        failed: usize,
        conflicts: usize,
        retried: usize,
        duration_ms: u64,
    },

    /// Connectivity changed
    NetworkStatusChanged { online: bool },
}

impl SyncEvent {
    /// The operation this event is about, if any
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Self::OperationQueued { operation_id, .. }
            | Self::OperationCompleted { operation_id, .. }
            | Self::OperationRetryScheduled { operation_id, .. }
            | Self::OperationFailed { operation_id, .. }
            | Self::OperationConflict { operation_id, .. } => Some(operation_id),
            _ => None,
        }
    }

    /// Whether this event reports an error
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::OperationFailed { .. } | Self::OperationRetryScheduled { .. }
        )
    }
}

/// Broadcast hub for [`SyncEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers; events with no subscriber are dropped
    pub fn publish(&self, event: SyncEvent) {
        tracing::trace!(?event, "sync event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
