//! Common test helpers for fiscal-offline integration tests
//!
//! Provides:
//! - A scripted processor that replays queued responses and records calls
//! - A memory storage whose writes can be made to fail
//! - A harness wiring an in-memory queue, manual clock and manual network
//!   monitor into a coordinator
//! - Event collection helpers

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fiscal_core::clock::ManualClock;
use fiscal_core::error::{ApiError, ApiResult};
use fiscal_core::types::{
    CircuitBreakerConfig, JitterStrategy, QueueConfig, ResilienceConfig, RetryPolicy, SyncConfig,
};
use fiscal_offline::{
    EnqueueOptions, EventBus, ManualNetworkMonitor, MemoryStorage, OperationProcessor,
    OperationQueue, OperationType, ProcessResult, ProcessorRegistry, QueuedOperation, Storage,
    SyncCoordinator, SyncCoordinatorBuilder, SyncEvent,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

// ─── Scripted Processor ──────────────────────────────────────────────────────

/// Replays scripted outcomes in order; succeeds once the script runs out
#[derive(Default)]
pub struct ScriptedProcessor {
    script: Mutex<VecDeque<ApiResult<ProcessResult>>>,
    calls: Mutex<Vec<QueuedOperation>>,
}

impl ScriptedProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue an outcome for the next call
    pub fn then(self: &Arc<Self>, outcome: ApiResult<ProcessResult>) -> Arc<Self> {
        self.script.lock().unwrap().push_back(outcome);
        self.clone()
    }

    /// Queue the same error for the next `times` calls
    pub fn fail_times(self: &Arc<Self>, err: ApiError, times: usize) -> Arc<Self> {
        for _ in 0..times {
            self.then(Err(err.clone()));
        }
        self.clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Operations as they were seen by the processor
    pub fn calls(&self) -> Vec<QueuedOperation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperationProcessor for ScriptedProcessor {
    async fn process(&self, operation: &QueuedOperation) -> ApiResult<ProcessResult> {
        self.calls.lock().unwrap().push(operation.clone());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(ProcessResult {
                result: Some(serde_json::json!({ "id": operation.id })),
                bytes_uploaded: operation.payload.len() as u64,
                bytes_downloaded: 16,
            })
        })
    }
}

// ─── Flaky Storage ───────────────────────────────────────────────────────────

/// Memory storage that counts writes and fails them on demand
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    writes: AtomicUsize,
    failing: AtomicBool,
    fail_on: Mutex<Vec<usize>>,
}

impl FlakyStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every write until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only write number `n`, counted from 1 since creation
    pub fn fail_write(&self, n: usize) {
        self.fail_on.lock().unwrap().push(n);
    }

    /// Writes attempted so far, failed ones included
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get(&self, key: &str) -> ApiResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> ApiResult<()> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) || self.fail_on.lock().unwrap().contains(&n) {
            return Err(ApiError::persistence("disk full"));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> ApiResult<()> {
        self.inner.delete(key).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

/// Deterministic configuration: no jitter, one attempt per pass, short
/// queue backoff
pub fn test_config() -> ResilienceConfig {
    ResilienceConfig {
        retry: RetryPolicy {
            max_attempts: 1,
            jitter: JitterStrategy::None,
            ..RetryPolicy::default()
        },
        circuit_breaker: CircuitBreakerConfig {
            timeout_ms: 0,
            ..CircuitBreakerConfig::default()
        },
        queue: QueueConfig {
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 10_000,
            ..QueueConfig::default()
        },
        sync: SyncConfig {
            processing_interval_ms: 0,
            online_debounce_ms: 1_000,
            ..SyncConfig::default()
        },
        ..ResilienceConfig::default()
    }
}

pub fn receipt_payload(total: u32) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "receipt": "R-1", "total": total })).unwrap()
}

// ─── Harness ─────────────────────────────────────────────────────────────────

pub struct Harness {
    pub queue: Arc<OperationQueue>,
    pub network: Arc<ManualNetworkMonitor>,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
    pub processor: Arc<ScriptedProcessor>,
    pub coordinator: SyncCoordinator,
}

impl Harness {
    pub async fn new(online: bool) -> Self {
        Self::build(online, test_config(), ScriptedProcessor::new(), |b| b).await
    }

    pub async fn with_processor(online: bool, processor: Arc<ScriptedProcessor>) -> Self {
        Self::build(online, test_config(), processor, |b| b).await
    }

    /// Build a harness; `customize` can adjust the coordinator builder
    pub async fn build(
        online: bool,
        config: ResilienceConfig,
        processor: Arc<ScriptedProcessor>,
        customize: impl FnOnce(SyncCoordinatorBuilder) -> SyncCoordinatorBuilder,
    ) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        Self::build_with_storage(online, config, processor, storage, customize).await
    }

    /// Build a harness whose queue persists to `storage`
    pub async fn build_with_storage(
        online: bool,
        config: ResilienceConfig,
        processor: Arc<ScriptedProcessor>,
        storage: Arc<dyn Storage>,
        customize: impl FnOnce(SyncCoordinatorBuilder) -> SyncCoordinatorBuilder,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let events = EventBus::default();
        let queue = Arc::new(
            OperationQueue::open_with_clock(config.queue.clone(), storage, clock.clone())
            .await
            .unwrap()
            .with_events(events.clone()),
        );
        let network = Arc::new(ManualNetworkMonitor::new(online));

        let mut processors = ProcessorRegistry::new();
        processors.set_fallback(processor.clone());

        let builder = SyncCoordinator::builder(queue.clone(), network.clone())
            .with_config(&config)
            .with_processors(processors)
            .with_events(events.clone());
        let coordinator = customize(builder).build();

        Self {
            queue,
            network,
            clock,
            events,
            processor,
            coordinator,
        }
    }

    pub async fn enqueue_receipt(&self, total: u32) -> String {
        self.queue
            .enqueue(
                OperationType::Create,
                "receipts",
                receipt_payload(total),
                EnqueueOptions::default(),
            )
            .await
            .unwrap()
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Everything currently buffered on `receiver`
pub fn drain(receiver: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Events about one operation, in publication order
pub fn events_for<'a>(events: &'a [SyncEvent], id: &str) -> Vec<&'a SyncEvent> {
    events
        .iter()
        .filter(|event| event.operation_id() == Some(id))
        .collect()
}
