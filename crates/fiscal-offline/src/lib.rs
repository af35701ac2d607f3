//! Offline operation queue and sync engine for the fiscal document API client
//!
//! This crate handles:
//! - Durable priority queueing of mutating operations while offline
//! - Pluggable persistence (in-memory and file-backed)
//! - Network reachability monitoring
//! - Conflict reconciliation strategies
//! - Opportunistic queue drainage through retry and circuit breaker
//! - Sync lifecycle events

pub mod batch;
pub mod conflict;
pub mod coordinator;
pub mod events;
pub mod network;
pub mod operation;
pub mod processor;
pub mod queue;
pub mod storage;
pub mod timer;

pub use batch::Batch;
pub use conflict::{ConflictAction, ConflictResolver, PayloadMerger};
pub use coordinator::{SyncCoordinator, SyncCoordinatorBuilder, SyncStats};
pub use events::{EventBus, SyncEvent};
pub use network::{ManualNetworkMonitor, NetworkMonitor};
pub use operation::{
    EnqueueOptions, HttpMethod, OperationStatus, OperationType, Priority, QueuedOperation,
};
pub use processor::{OperationProcessor, ProcessResult, ProcessorRegistry};
pub use queue::{OperationQueue, QueueStats};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use timer::{SyncTimer, SyncTrigger};
