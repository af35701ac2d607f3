//! Durable, priority-ordered operation queue
//!
//! Every mutation is applied to a copy of the state, persisted through the
//! [`Storage`] collaborator, and only then committed in memory. A failed
//! write therefore surfaces as [`ApiError::Persistence`] and leaves the queue
//! exactly as it was. A `tokio::sync::Mutex` makes the queue the single
//! writer of its snapshot.
//!
//! [`OperationQueue::release`] is the one in-memory-only change: it undoes a
//! `processing` mark whose follow-up write failed, matching what a reload of
//! the stored snapshot would produce.

use chrono::{DateTime, Utc};
use fiscal_core::clock::{Clock, SystemClock};
use fiscal_core::error::{ApiError, ApiResult};
use fiscal_core::types::QueueConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::events::{EventBus, SyncEvent};
use crate::operation::{
    ConflictData, EnqueueOptions, OperationError, OperationStatus, OperationType,
    QueuedOperation,
};
use crate::storage::Storage;

/// Snapshot format version
const SNAPSHOT_VERSION: u32 = 1;

/// Persisted form of the queue: one map keyed by operation id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueSnapshot {
    version: u32,
    next_sequence: u64,
    operations: BTreeMap<String, QueuedOperation>,
}

/// Counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub conflict: usize,
}

/// Durable store of operations awaiting replay
pub struct OperationQueue {
    config: QueueConfig,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    state: Mutex<QueueSnapshot>,
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("storage", &self.storage.name())
            .field("storage_key", &self.config.storage_key)
            .finish()
    }
}

impl OperationQueue {
    /// Open the queue, restoring any snapshot found in `storage`
    pub async fn open(config: QueueConfig, storage: Arc<dyn Storage>) -> ApiResult<Self> {
        Self::open_with_clock(config, storage, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        config: QueueConfig,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> ApiResult<Self> {
        let snapshot = load_snapshot(storage.as_ref(), &config.storage_key).await?;
        tracing::debug!(
            storage = storage.name(),
            operations = snapshot.operations.len(),
            "operation queue opened"
        );
        Ok(Self {
            config,
            storage,
            clock,
            events: EventBus::default(),
            state: Mutex::new(snapshot),
        })
    }

    /// Publish `OperationQueued` events on `events` instead of a private bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// The bus `OperationQueued` events are published on
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Re-read the snapshot from storage, discarding in-memory state
    pub async fn reload(&self) -> ApiResult<usize> {
        let mut state = self.state.lock().await;
        let snapshot = load_snapshot(self.storage.as_ref(), &self.config.storage_key).await?;
        let count = snapshot.operations.len();
        *state = snapshot;
        Ok(count)
    }

    /// Add an operation and return its id
    ///
    /// Fails with `DuplicateOperation` when deduplication is on and an
    /// identical operation is pending, and with `QueueFull` at capacity.
    pub async fn enqueue(
        &self,
        operation_type: OperationType,
        resource: &str,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> ApiResult<String> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let operation = QueuedOperation::new(
            operation_type,
            resource,
            payload,
            options,
            now,
            state.next_sequence,
        );

        if self.config.deduplicate {
            let key = operation.dedup_key();
            if let Some(existing) = state.operations.values().find(|op| {
                op.status == OperationStatus::Pending && op.dedup_key() == key
            }) {
                return Err(ApiError::DuplicateOperation {
                    existing_id: existing.id.clone(),
                });
            }
        }

        if state.operations.len() >= self.config.max_size {
            return Err(ApiError::QueueFull {
                max_size: self.config.max_size,
            });
        }

        let id = operation.id.clone();
        let event = SyncEvent::OperationQueued {
            operation_id: id.clone(),
            resource: operation.target.resource.clone(),
            operation_type,
            priority: operation.priority,
        };

        let mut next = state.clone();
        next.next_sequence += 1;
        next.operations.insert(id.clone(), operation);
        self.commit(&mut state, next).await?;

        tracing::debug!(operation_id = %id, resource, %operation_type, "operation queued");
        self.events.publish(event);
        Ok(id)
    }

    /// Up to `limit` eligible operations in processing order
    pub async fn get_next_batch(&self, limit: usize) -> Vec<QueuedOperation> {
        let state = self.state.lock().await;
        let now = self.clock.now();
        let mut eligible: Vec<&QueuedOperation> = state
            .operations
            .values()
            .filter(|op| op.is_eligible(now))
            .collect();
        eligible.sort_by_key(|op| op.order_key());
        eligible.into_iter().take(limit).cloned().collect()
    }

    /// Move to `processing` and count the attempt
    pub async fn mark_processing(&self, id: &str) -> ApiResult<QueuedOperation> {
        let now = self.clock.now();
        self.update(id, OperationStatus::Processing, |op| {
            op.metadata.attempt_count += 1;
            op.metadata.last_attempt = Some(now);
        })
        .await
    }

    pub async fn mark_completed(&self, id: &str) -> ApiResult<QueuedOperation> {
        self.update(id, OperationStatus::Completed, |op| {
            op.error = None;
            op.metadata.next_retry = None;
        })
        .await
    }

    pub async fn mark_failed(&self, id: &str, error: OperationError) -> ApiResult<QueuedOperation> {
        self.update(id, OperationStatus::Failed, |op| {
            op.error = Some(error);
            op.metadata.next_retry = None;
        })
        .await
    }

    /// Return a failed attempt to `pending`, not eligible before `next_retry`
    pub async fn schedule_retry(
        &self,
        id: &str,
        error: OperationError,
        next_retry: DateTime<Utc>,
    ) -> ApiResult<QueuedOperation> {
        self.update(id, OperationStatus::Pending, |op| {
            op.error = Some(error);
            op.metadata.next_retry = Some(next_retry);
        })
        .await
    }

    /// Park an operation until the conflict is resolved externally
    pub async fn mark_conflict(&self, id: &str, data: ConflictData) -> ApiResult<QueuedOperation> {
        self.update(id, OperationStatus::Conflict, |op| {
            op.conflict = Some(data);
            op.metadata.next_retry = None;
        })
        .await
    }

    /// Resubmit with the force-override marker and a fresh attempt budget
    pub async fn requeue_with_override(&self, id: &str) -> ApiResult<QueuedOperation> {
        self.update(id, OperationStatus::Pending, |op| {
            op.force_override = true;
            op.metadata.attempt_count = 0;
            op.metadata.next_retry = None;
            op.error = None;
        })
        .await
    }

    /// Replace an operation with a new pending one carrying `payload`
    ///
    /// A checksum is fixed at creation, so a merged payload becomes a new
    /// operation (new id, new checksum) that keeps the original's target,
    /// priority and owner. Returns the new id.
    pub async fn requeue_merged(&self, id: &str, payload: Vec<u8>) -> ApiResult<String> {
        let mut state = self.state.lock().await;
        let original = state
            .operations
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(id))?;
        ensure_transition(&original, OperationStatus::Pending)?;

        let options = EnqueueOptions {
            priority: original.priority,
            endpoint: Some(original.target.endpoint.clone()),
            method: Some(original.target.method),
            user_id: original.metadata.user_id.clone(),
            device_id: original.metadata.device_id.clone(),
        };
        let replacement = QueuedOperation::new(
            original.operation_type,
            &original.target.resource,
            payload,
            options,
            self.clock.now(),
            state.next_sequence,
        );
        let new_id = replacement.id.clone();
        let event = SyncEvent::OperationQueued {
            operation_id: new_id.clone(),
            resource: replacement.target.resource.clone(),
            operation_type: replacement.operation_type,
            priority: replacement.priority,
        };

        let mut next = state.clone();
        next.next_sequence += 1;
        next.operations.remove(id);
        next.operations.insert(new_id.clone(), replacement);
        self.commit(&mut state, next).await?;

        tracing::debug!(operation_id = %id, replacement_id = %new_id, "merged operation requeued");
        self.events.publish(event);
        Ok(new_id)
    }

    /// Delete an operation; returns it if it existed
    pub async fn remove(&self, id: &str) -> ApiResult<Option<QueuedOperation>> {
        let mut state = self.state.lock().await;
        if !state.operations.contains_key(id) {
            return Ok(None);
        }
        let mut next = state.clone();
        let removed = next.operations.remove(id);
        self.commit(&mut state, next).await?;
        tracing::debug!(operation_id = %id, "operation removed");
        Ok(removed)
    }

    /// Remove every operation; returns how many were removed
    pub async fn clear(&self) -> ApiResult<usize> {
        self.retain(|_| false).await
    }

    pub async fn clear_completed(&self) -> ApiResult<usize> {
        self.retain(|op| op.status != OperationStatus::Completed).await
    }

    pub async fn clear_failed(&self) -> ApiResult<usize> {
        self.retain(|op| op.status != OperationStatus::Failed).await
    }

    /// Return a `processing` operation to `pending` without persisting
    ///
    /// Used when the write that would settle an attempt failed. The stored
    /// snapshot still says `processing`, which a reload maps back to
    /// `pending` as well, so memory and storage agree on replay. Returns
    /// whether the operation was released.
    pub async fn release(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.operations.get_mut(id) {
            Some(op) if op.status == OperationStatus::Processing => {
                op.status = OperationStatus::Pending;
                tracing::debug!(operation_id = %id, "operation released after failed write");
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, id: &str) -> Option<QueuedOperation> {
        self.state.lock().await.operations.get(id).cloned()
    }

    /// Operations in processing order, optionally filtered by status
    pub async fn list(&self, status: Option<OperationStatus>) -> Vec<QueuedOperation> {
        let state = self.state.lock().await;
        let mut operations: Vec<QueuedOperation> = state
            .operations
            .values()
            .filter(|op| status.is_none_or(|s| op.status == s))
            .cloned()
            .collect();
        operations.sort_by_key(|op| op.order_key());
        operations
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.operations.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get_stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let mut stats = QueueStats {
            total: state.operations.len(),
            ..QueueStats::default()
        };
        for op in state.operations.values() {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Processing => stats.processing += 1,
                OperationStatus::Completed => stats.completed += 1,
                OperationStatus::Failed => stats.failed += 1,
                OperationStatus::Conflict => stats.conflict += 1,
            }
        }
        stats
    }

    /// Earliest time a pending operation becomes eligible
    ///
    /// Operations without a `next_retry` are eligible now.
    pub async fn next_due(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        let now = self.clock.now();
        state
            .operations
            .values()
            .filter(|op| op.status == OperationStatus::Pending)
            .map(|op| op.metadata.next_retry.unwrap_or(now))
            .min()
    }

    async fn update<F>(
        &self,
        id: &str,
        to: OperationStatus,
        mutate: F,
    ) -> ApiResult<QueuedOperation>
    where
        F: FnOnce(&mut QueuedOperation),
    {
        let mut state = self.state.lock().await;
        let current = state
            .operations
            .get(id)
            .ok_or_else(|| ApiError::not_found(id))?;
        ensure_transition(current, to)?;

        let mut next = state.clone();
        let updated = {
            // Present: checked above under the same lock
            let Some(op) = next.operations.get_mut(id) else {
                return Err(ApiError::not_found(id));
            };
            op.status = to;
            op.metadata.updated_at = self.clock.now();
            mutate(op);
            op.clone()
        };
        self.commit(&mut state, next).await?;

        tracing::debug!(operation_id = %id, status = %to, "operation status updated");
        Ok(updated)
    }

    async fn retain<F>(&self, keep: F) -> ApiResult<usize>
    where
        F: Fn(&QueuedOperation) -> bool,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.operations.retain(|_, op| keep(op));
        let removed = state.operations.len() - next.operations.len();
        if removed > 0 {
            self.commit(&mut state, next).await?;
            tracing::debug!(removed, "operations cleared");
        }
        Ok(removed)
    }

    /// Persist `next` and make it the live state
    async fn commit(&self, state: &mut QueueSnapshot, next: QueueSnapshot) -> ApiResult<()> {
        let bytes = serde_json::to_vec(&next)
            .map_err(|err| ApiError::persistence(format!("failed to encode queue: {err}")))?;
        self.storage.set(&self.config.storage_key, &bytes).await?;
        *state = next;
        Ok(())
    }
}

fn ensure_transition(op: &QueuedOperation, to: OperationStatus) -> ApiResult<()> {
    if op.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(ApiError::InvalidTransition {
            id: op.id.clone(),
            from: op.status.to_string(),
            to: to.to_string(),
        })
    }
}

async fn load_snapshot(storage: &dyn Storage, key: &str) -> ApiResult<QueueSnapshot> {
    let Some(bytes) = storage.get(key).await? else {
        return Ok(QueueSnapshot {
            version: SNAPSHOT_VERSION,
            ..QueueSnapshot::default()
        });
    };

    let mut snapshot: QueueSnapshot = serde_json::from_slice(&bytes)
        .map_err(|err| ApiError::persistence(format!("corrupt queue snapshot: {err}")))?;

    // An operation caught mid-call by a crash is replayed
    for op in snapshot.operations.values_mut() {
        if op.status == OperationStatus::Processing {
            op.status = OperationStatus::Pending;
        }
    }
    let max_sequence = snapshot
        .operations
        .values()
        .map(|op| op.sequence + 1)
        .max()
        .unwrap_or(0);
    snapshot.next_sequence = snapshot.next_sequence.max(max_sequence);
    snapshot.version = SNAPSHOT_VERSION;
    Ok(snapshot)
}
