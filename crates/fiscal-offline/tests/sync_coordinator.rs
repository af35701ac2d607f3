//! Integration tests for the sync coordinator
//!
//! Time-dependent tests run on a paused tokio clock, so debounce and retry
//! timers fire as soon as the runtime is otherwise idle.

mod common;

use async_trait::async_trait;
use common::*;
use fiscal_core::circuit::CircuitState;
use fiscal_core::error::{ApiError, ApiResult};
use fiscal_core::types::ConflictStrategyKind;
use fiscal_offline::{
    ConflictAction, EnqueueOptions, ManualNetworkMonitor, MemoryStorage, OperationProcessor,
    OperationQueue, OperationStatus, OperationType, ProcessResult, ProcessorRegistry,
    QueuedOperation, SyncCoordinator, SyncEvent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn conflict() -> ApiError {
    ApiError::conflict(
        "receipt was modified on the server",
        Some(serde_json::json!({ "receipt": "R-1", "total": 99 })),
    )
}

// ─── Offline to online ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_offline_operation_syncs_after_reconnect() {
    let harness = Harness::new(false).await;
    let mut events = harness.coordinator.subscribe();
    harness.coordinator.start().await;

    let id = harness.enqueue_receipt(42).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.processor.call_count(), 0);

    harness.network.set_online(true);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(harness.processor.call_count(), 1);
    let stats = harness.coordinator.stats().await;
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.sync_passes, 1);
    assert!(stats.bytes_uploaded > 0);
    assert!(stats.last_sync.is_some());
    assert!(harness.queue.is_empty().await);

    let events = drain(&mut events);
    assert!(events.contains(&SyncEvent::NetworkStatusChanged { online: true }));
    let for_op = events_for(&events, &id);
    assert!(for_op.iter().all(|event| !event.is_error()));
    assert!(matches!(for_op[0], SyncEvent::OperationQueued { .. }));
    assert!(matches!(
        for_op.last(),
        Some(SyncEvent::OperationCompleted { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_online_waits_for_debounce() {
    let harness = Harness::new(false).await;
    harness.coordinator.start().await;
    harness.enqueue_receipt(1).await;

    harness.network.set_online(true);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.processor.call_count(), 0);
    assert!(harness.coordinator.next_timer().is_some());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(harness.processor.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_going_offline_cancels_pending_timer() {
    let harness = Harness::new(false).await;
    harness.coordinator.start().await;
    harness.enqueue_receipt(1).await;

    harness.network.set_online(true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    harness.network.set_online(false);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(harness.processor.call_count(), 0);
    assert!(harness.coordinator.next_timer().is_none());
    assert_eq!(harness.coordinator.stats().await.pending, 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_drains_existing_queue_when_online() {
    let harness = Harness::new(true).await;
    harness.enqueue_receipt(1).await;
    harness.enqueue_receipt(2).await;

    harness.coordinator.start().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(harness.processor.call_count(), 2);
    assert!(harness.queue.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_foreground_requests_a_pass() {
    let harness = Harness::new(true).await;
    harness.coordinator.start().await;
    harness.enqueue_receipt(1).await;
    assert_eq!(harness.processor.call_count(), 0);

    harness.coordinator.notify_foreground();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(harness.processor.call_count(), 1);
}

#[tokio::test]
async fn test_sync_now_is_noop_while_offline() {
    let harness = Harness::new(false).await;
    harness.enqueue_receipt(1).await;

    assert!(harness.coordinator.sync_now().await.unwrap().is_none());
    assert_eq!(harness.processor.call_count(), 0);
}

#[tokio::test]
async fn test_priority_order_within_pass() {
    let harness = Harness::new(true).await;
    let low = harness
        .queue
        .enqueue(
            fiscal_offline::OperationType::Create,
            "receipts",
            receipt_payload(1),
            fiscal_offline::EnqueueOptions::default()
                .with_priority(fiscal_offline::Priority::Low),
        )
        .await
        .unwrap();
    let critical = harness
        .queue
        .enqueue(
            fiscal_offline::OperationType::Create,
            "receipts",
            receipt_payload(2),
            fiscal_offline::EnqueueOptions::default()
                .with_priority(fiscal_offline::Priority::Critical),
        )
        .await
        .unwrap();

    let batch = harness.coordinator.sync_now().await.unwrap().unwrap();

    assert_eq!(batch.operation_ids, vec![critical.clone(), low.clone()]);
    let seen: Vec<String> = harness.processor.calls().into_iter().map(|op| op.id).collect();
    assert_eq!(seen, vec![critical, low]);
}

// ─── Failures and retries ────────────────────────────────────────────────────

#[tokio::test]
async fn test_transient_failure_schedules_retry_then_evicts() {
    let processor =
        ScriptedProcessor::new().fail_times(ApiError::network("ECONNRESET", "reset"), 3);
    let harness = Harness::with_processor(true, processor).await;
    let mut events = harness.coordinator.subscribe();
    let id = harness.enqueue_receipt(1).await;

    // Attempt 1 fails, retry after the base delay
    let batch = harness.coordinator.sync_now().await.unwrap().unwrap();
    assert_eq!(batch.retried, 1);
    let op = harness.queue.get(&id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.metadata.attempt_count, 1);
    assert_eq!(
        op.metadata.next_retry,
        Some(start_time() + chrono::Duration::seconds(1))
    );

    // Not eligible yet
    let batch = harness.coordinator.sync_now().await.unwrap().unwrap();
    assert_eq!(batch.total(), 0);
    assert_eq!(harness.processor.call_count(), 1);

    // Attempt 2 doubles the delay
    harness.clock.advance(Duration::from_secs(1));
    harness.coordinator.sync_now().await.unwrap();
    let op = harness.queue.get(&id).await.unwrap();
    assert_eq!(op.metadata.attempt_count, 2);
    assert_eq!(
        op.metadata.next_retry,
        Some(start_time() + chrono::Duration::seconds(3))
    );

    // Attempt 3 reaches max_retries
    harness.clock.advance(Duration::from_secs(2));
    let batch = harness.coordinator.sync_now().await.unwrap().unwrap();
    assert_eq!(batch.failed, 1);
    assert!(harness.queue.get(&id).await.is_none());

    let events = drain(&mut events);
    let retries = events
        .iter()
        .filter(|e| matches!(e, SyncEvent::OperationRetryScheduled { .. }))
        .count();
    assert_eq!(retries, 2);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::OperationFailed { operation_id, attempts: 3, .. } if operation_id == &id
    )));

    let stats = harness.coordinator.stats().await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.retried, 2);
}

#[tokio::test]
async fn test_validation_error_fails_immediately() {
    let processor =
        ScriptedProcessor::new().then(Err(ApiError::validation("vat number is malformed")));
    let harness = Harness::with_processor(true, processor).await;
    let mut events = harness.coordinator.subscribe();
    let id = harness.enqueue_receipt(1).await;

    let batch = harness.coordinator.sync_now().await.unwrap().unwrap();

    assert_eq!(batch.failed, 1);
    assert!(harness.queue.get(&id).await.is_none());
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        SyncEvent::OperationFailed { attempts: 1, .. }
    )));
    // A rejected request says nothing about the server's health
    assert_eq!(
        harness.coordinator.circuit_breaker().metrics().failed_requests,
        0
    );
}

#[tokio::test]
async fn test_retryable_status_is_retried_within_a_pass() {
    let mut config = test_config();
    config.retry.max_attempts = 3;
    config.retry.base_delay_ms = 0;
    let processor = ScriptedProcessor::new().fail_times(ApiError::http(503, "unavailable"), 2);
    let harness = Harness::build(true, config, processor, |b| b).await;
    harness.enqueue_receipt(1).await;

    let batch = harness.coordinator.sync_now().await.unwrap().unwrap();

    assert_eq!(batch.completed, 1);
    assert_eq!(harness.processor.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_defers_remaining_operations() {
    let mut config = test_config();
    config.circuit_breaker.failure_threshold = 1;
    let processor = ScriptedProcessor::new().then(Err(ApiError::network("ECONNRESET", "reset")));
    let harness = Harness::build(true, config, processor, |b| b).await;
    let first = harness.enqueue_receipt(1).await;
    let second = harness.enqueue_receipt(2).await;

    let batch = harness.coordinator.sync_now().await.unwrap().unwrap();

    assert_eq!(batch.retried, 2);
    assert_eq!(harness.processor.call_count(), 1);
    assert_eq!(
        harness.coordinator.circuit_breaker().state(),
        CircuitState::Open
    );

    let first = harness.queue.get(&first).await.unwrap();
    let second = harness.queue.get(&second).await.unwrap();
    assert_eq!(
        first.metadata.next_retry,
        Some(start_time() + chrono::Duration::seconds(1))
    );
    // Deferred for the breaker's reset window rather than the queue backoff
    assert_eq!(
        second.metadata.next_retry,
        Some(start_time() + chrono::Duration::seconds(60))
    );
    assert_eq!(second.error.as_ref().unwrap().code.as_deref(), Some("CIRCUIT_OPEN"));
}

#[tokio::test]
async fn test_missing_processor_is_retried_later() {
    let harness = Harness::build(true, test_config(), ScriptedProcessor::new(), |b| {
        b.with_processors(ProcessorRegistry::new())
    })
    .await;
    let id = harness.enqueue_receipt(1).await;

    let batch = harness.coordinator.sync_now().await.unwrap().unwrap();

    assert_eq!(batch.retried, 1);
    let op = harness.queue.get(&id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert!(op.metadata.next_retry.is_some());
}

// ─── Conflicts ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_server_wins_drops_local_change() {
    let processor = ScriptedProcessor::new().then(Err(conflict()));
    let harness = Harness::with_processor(true, processor).await;
    let mut events = harness.coordinator.subscribe();
    let id = harness.enqueue_receipt(1).await;

    let batch = harness.coordinator.sync_now().await.unwrap().unwrap();

    assert_eq!(batch.conflicts, 1);
    assert!(harness.queue.get(&id).await.is_none());
    assert_eq!(harness.processor.call_count(), 1);

    let events = drain(&mut events);
    let for_op = events_for(&events, &id);
    assert!(for_op.iter().any(|e| matches!(
        e,
        SyncEvent::OperationConflict {
            strategy: ConflictStrategyKind::ServerWins,
            ..
        }
    )));
    assert!(matches!(
        for_op.last(),
        Some(SyncEvent::OperationCompleted { .. })
    ));
    assert_eq!(harness.coordinator.stats().await.conflicted, 1);
}

#[tokio::test]
async fn test_client_wins_resubmits_with_override() {
    let mut config = test_config();
    config.sync.conflict_strategy = ConflictStrategyKind::ClientWins;
    let processor = ScriptedProcessor::new().then(Err(conflict()));
    let harness = Harness::build(true, config, processor, |b| b).await;
    let id = harness.enqueue_receipt(1).await;

    harness.coordinator.sync_now().await.unwrap();

    let op = harness.queue.get(&id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert!(op.force_override);
    assert_eq!(op.metadata.attempt_count, 0);

    let batch = harness.coordinator.sync_now().await.unwrap().unwrap();
    assert_eq!(batch.completed, 1);
    let calls = harness.processor.calls();
    assert!(!calls[0].force_override);
    assert!(calls[1].force_override);
}

#[tokio::test(start_paused = true)]
async fn test_client_wins_holds_conflict_when_override_is_rejected() {
    let mut config = test_config();
    config.sync.conflict_strategy = ConflictStrategyKind::ClientWins;
    let processor = ScriptedProcessor::new().fail_times(conflict(), 10);
    let harness = Harness::build(true, config, processor, |b| b).await;
    let mut events = harness.coordinator.subscribe();
    let id = harness.enqueue_receipt(1).await;

    harness.coordinator.start().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    // Original call plus one overridden resubmission
    assert_eq!(harness.processor.call_count(), 2);
    let op = harness.queue.get(&id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Conflict);
    assert!(op.force_override);
    assert!(harness.coordinator.next_timer().is_none());

    let events = drain(&mut events);
    let conflicts = events_for(&events, &id)
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::OperationConflict { .. }))
        .count();
    assert_eq!(conflicts, 2);
}

#[tokio::test]
async fn test_manual_strategy_holds_until_resolved() {
    let mut config = test_config();
    config.sync.conflict_strategy = ConflictStrategyKind::Manual;
    let processor = ScriptedProcessor::new().then(Err(conflict()));
    let harness = Harness::build(true, config, processor, |b| b).await;
    let id = harness.enqueue_receipt(1).await;

    harness.coordinator.sync_now().await.unwrap();

    let op = harness.queue.get(&id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Conflict);
    let data = op.conflict.unwrap();
    assert_eq!(data.local_version, receipt_payload(1));
    assert_eq!(data.server_version.unwrap()["total"], 99);

    // Held operations are not picked up again
    let batch = harness.coordinator.sync_now().await.unwrap().unwrap();
    assert_eq!(batch.total(), 0);

    let action = harness
        .coordinator
        .resolve_conflict(&id, ConflictStrategyKind::ClientWins)
        .await
        .unwrap();
    assert_eq!(action, ConflictAction::ResubmitWithOverride);
    let op = harness.queue.get(&id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert!(op.force_override);
}

#[tokio::test]
async fn test_resolve_conflict_rejects_operation_not_in_conflict() {
    let harness = Harness::new(true).await;
    let id = harness.enqueue_receipt(1).await;

    let err = harness
        .coordinator
        .resolve_conflict(&id, ConflictStrategyKind::ServerWins)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidTransition { .. }));

    let err = harness
        .coordinator
        .resolve_conflict("missing", ConflictStrategyKind::ServerWins)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound { .. }));
}

#[tokio::test]
async fn test_merge_replaces_operation_with_merged_payload() {
    let mut config = test_config();
    config.sync.conflict_strategy = ConflictStrategyKind::Merge;
    let processor = ScriptedProcessor::new().then(Err(conflict()));
    let merger =
        |local: &QueuedOperation, server: Option<&serde_json::Value>| -> ApiResult<Vec<u8>> {
            let mut merged: serde_json::Value = serde_json::from_slice(&local.payload)
                .map_err(|err| ApiError::validation(err.to_string()))?;
            merged["server_total"] = server.map(|s| s["total"].clone()).unwrap_or_default();
            Ok(serde_json::to_vec(&merged).unwrap())
        };
    let harness =
        Harness::build(true, config, processor, |b| b.with_merger(Arc::new(merger))).await;
    let mut events = harness.coordinator.subscribe();
    let id = harness.enqueue_receipt(1).await;

    harness.coordinator.sync_now().await.unwrap();

    assert!(harness.queue.get(&id).await.is_none());
    let replacement = drain(&mut events)
        .into_iter()
        .find_map(|e| match e {
            SyncEvent::OperationConflict { replacement_id, .. } => replacement_id,
            _ => None,
        })
        .expect("conflict event carries the replacement id");
    let op = harness.queue.get(&replacement).await.unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&op.payload).unwrap();
    assert_eq!(payload["server_total"], 99);
    assert!(op.verify_checksum());
}

// ─── Storage failures ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_failing_storage_backs_off_between_passes() {
    let storage = FlakyStorage::new();
    let harness = Harness::build_with_storage(
        true,
        test_config(),
        ScriptedProcessor::new(),
        storage.clone(),
        |b| b,
    )
    .await;
    let id = harness.enqueue_receipt(1).await;
    storage.set_failing(true);
    let before = storage.writes();

    harness.coordinator.start().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    // Passes at 0s, 1s, 3s and 7s: the wait doubles from the 1s base
    let attempted = storage.writes() - before;
    assert!((3..=5).contains(&attempted), "{attempted} writes attempted");
    assert_eq!(harness.processor.call_count(), 0);
    assert!(harness.coordinator.next_timer().is_some());
    assert_eq!(
        harness.queue.get(&id).await.unwrap().status,
        OperationStatus::Pending
    );

    // The next timer pass after recovery drains the queue
    storage.set_failing(false);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.processor.call_count(), 1);
    assert!(harness.queue.is_empty().await);
}

#[tokio::test]
async fn test_failed_retry_write_keeps_operation_selectable() {
    let storage = FlakyStorage::new();
    let processor = ScriptedProcessor::new().then(Err(ApiError::http(503, "unavailable")));
    let harness =
        Harness::build_with_storage(true, test_config(), processor, storage.clone(), |b| b).await;
    let id = harness.enqueue_receipt(1).await;
    // Write 2 marks the operation processing, write 3 records the retry
    storage.fail_write(3);

    let err = harness.coordinator.sync_now().await.unwrap_err();
    assert!(matches!(err, ApiError::Persistence { .. }));
    let stats = harness.queue.get_stats().await;
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.pending, 1);

    let batch = harness.coordinator.sync_now().await.unwrap().unwrap();
    assert_eq!(batch.completed, 1);
    assert!(harness.queue.get(&id).await.is_none());
    assert_eq!(harness.processor.call_count(), 2);
}

// ─── Event wiring ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_coordinator_publishes_on_queue_bus_by_default() {
    let queue = Arc::new(
        OperationQueue::open(test_config().queue, Arc::new(MemoryStorage::new()))
            .await
            .unwrap(),
    );
    let processor = ScriptedProcessor::new();
    let mut processors = ProcessorRegistry::new();
    processors.set_fallback(processor.clone());
    let coordinator =
        SyncCoordinator::builder(queue.clone(), Arc::new(ManualNetworkMonitor::new(true)))
            .with_processors(processors)
            .build();
    let mut events = coordinator.subscribe();

    let id = queue
        .enqueue(
            OperationType::Create,
            "receipts",
            receipt_payload(1),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();
    coordinator.sync_now().await.unwrap();

    let events = drain(&mut events);
    let for_op = events_for(&events, &id);
    assert!(matches!(
        for_op.first(),
        Some(SyncEvent::OperationQueued { .. })
    ));
    assert!(matches!(
        for_op.last(),
        Some(SyncEvent::OperationCompleted { .. })
    ));
}

// ─── Single flight and shutdown ──────────────────────────────────────────────

/// Blocks each call until released
#[derive(Default)]
struct GateProcessor {
    gate: Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl OperationProcessor for GateProcessor {
    async fn process(&self, _operation: &QueuedOperation) -> ApiResult<ProcessResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(ProcessResult::default())
    }
}

#[tokio::test]
async fn test_concurrent_sync_requests_are_single_flight() {
    let gate = Arc::new(GateProcessor::default());
    let mut processors = ProcessorRegistry::new();
    processors.set_fallback(gate.clone());
    let harness = Harness::build(true, test_config(), ScriptedProcessor::new(), |b| {
        b.with_processors(processors)
    })
    .await;
    harness.enqueue_receipt(1).await;
    let coordinator = Arc::new(harness.coordinator);

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.sync_now().await })
    };
    while !coordinator.is_syncing() {
        tokio::task::yield_now().await;
    }

    assert!(coordinator.sync_now().await.unwrap().is_none());

    gate.gate.notify_one();
    let batch = running.await.unwrap().unwrap().unwrap();
    assert_eq!(batch.completed, 1);
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
    assert!(!coordinator.is_syncing());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_triggers() {
    let processor = ScriptedProcessor::new().then(Err(ApiError::network("ECONNRESET", "reset")));
    let harness = Harness::with_processor(true, processor).await;
    harness.coordinator.start().await;
    harness.enqueue_receipt(1).await;
    harness.coordinator.notify_foreground();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The failed operation armed the retry timer
    assert!(harness.coordinator.next_timer().is_some());

    harness.coordinator.shutdown();
    assert!(harness.coordinator.is_shut_down());
    assert!(harness.coordinator.next_timer().is_none());
    assert!(harness.coordinator.sync_now().await.unwrap().is_none());

    harness.clock.advance(Duration::from_secs(60));
    harness.network.set_online(false);
    harness.network.set_online(true);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.processor.call_count(), 1);
}
