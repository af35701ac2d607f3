//! Sync coordinator
//!
//! Drains the operation queue opportunistically: when the network comes
//! back, when the application is foregrounded, on a periodic interval and
//! when the earliest scheduled retry falls due. Only one pass runs at a
//! time; a request that arrives during a pass is a no-op.
//!
//! Each operation is replayed through `RetryExecutor(CircuitBreaker(call))`.
//! Operations inside a batch are processed one after another so the breaker
//! sees the dependency's real failure rate.

use chrono::{DateTime, Utc};
use fiscal_core::circuit::CircuitBreaker;
use fiscal_core::error::{ApiError, ApiResult};
use fiscal_core::retry::{
    backoff_delay, PolicyPredicate, RetryExecutor, RetryExecutorBuilder, TracingObserver,
};
use fiscal_core::types::{
    CircuitBreakerConfig, ConflictStrategyKind, ResilienceConfig, RetryPolicy, SyncConfig,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::batch::Batch;
use crate::conflict::{ConflictAction, ConflictResolver, PayloadMerger};
use crate::events::{EventBus, SyncEvent};
use crate::network::NetworkMonitor;
use crate::operation::{ConflictData, OperationError, OperationStatus, QueuedOperation};
use crate::processor::{ProcessResult, ProcessorRegistry};
use crate::queue::OperationQueue;
use crate::timer::{SyncTimer, SyncTrigger};

/// Growth factor of the cross-pass retry delay
const CROSS_PASS_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Aggregate sync statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Operations that reached an outcome in some pass
    pub total_operations: u64,
    /// Pending operations currently in the queue
    pub pending: usize,
    pub completed: u64,
    pub failed: u64,
    pub conflicted: u64,
    /// Failures rescheduled for a later pass
    pub retried: u64,
    pub sync_passes: u64,
    pub average_sync_duration: Duration,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub last_sync: Option<DateTime<Utc>>,
    pub next_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct StatsState {
    completed: u64,
    failed: u64,
    conflicted: u64,
    retried: u64,
    sync_passes: u64,
    total_duration: Duration,
    bytes_uploaded: u64,
    bytes_downloaded: u64,
    last_sync: Option<DateTime<Utc>>,
    next_sync: Option<DateTime<Utc>>,
}

/// Builder for [`SyncCoordinator`]
pub struct SyncCoordinatorBuilder {
    queue: Arc<OperationQueue>,
    network: Arc<dyn NetworkMonitor>,
    processors: ProcessorRegistry,
    retry_policy: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
    breaker_config: CircuitBreakerConfig,
    sync_config: SyncConfig,
    merger: Option<Arc<dyn PayloadMerger>>,
    events: EventBus,
}

impl SyncCoordinatorBuilder {
    pub fn new(queue: Arc<OperationQueue>, network: Arc<dyn NetworkMonitor>) -> Self {
        let events = queue.events().clone();
        Self {
            queue,
            network,
            processors: ProcessorRegistry::new(),
            retry_policy: RetryPolicy::default(),
            breaker: None,
            breaker_config: CircuitBreakerConfig::default(),
            sync_config: SyncConfig::default(),
            merger: None,
            events,
        }
    }

    /// Take retry, circuit breaker and sync settings from `config`
    pub fn with_config(mut self, config: &ResilienceConfig) -> Self {
        self.retry_policy = config.retry.clone();
        self.breaker_config = config.circuit_breaker.clone();
        self.sync_config = config.sync.clone();
        self
    }

    pub fn with_processors(mut self, processors: ProcessorRegistry) -> Self {
        self.processors = processors;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Share a breaker with other callers of the same dependency
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_sync_config(mut self, config: SyncConfig) -> Self {
        self.sync_config = config;
        self
    }

    pub fn with_merger(mut self, merger: Arc<dyn PayloadMerger>) -> Self {
        self.merger = Some(merger);
        self
    }

    /// Event bus to publish on
    ///
    /// Defaults to the queue's bus, which is where `OperationQueued` is
    /// published. A different bus only sees the coordinator's events.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> SyncCoordinator {
        let breaker = self
            .breaker
            .unwrap_or_else(|| Arc::new(CircuitBreaker::new("fiscal-api", self.breaker_config)));
        let mut resolver = ConflictResolver::new(self.sync_config.conflict_strategy);
        if let Some(merger) = self.merger {
            resolver = resolver.with_merger(merger);
        }
        let retry = RetryExecutorBuilder::new()
            .with_policy(self.retry_policy)
            .with_observer(TracingObserver::new("sync"))
            .build();
        let (sender, receiver) = mpsc::unbounded_channel();

        SyncCoordinator {
            inner: Arc::new(Inner {
                queue: self.queue,
                network: self.network,
                processors: self.processors,
                retry,
                breaker,
                resolver,
                events: self.events,
                config: self.sync_config,
                timer: SyncTimer::new(sender.clone()),
                triggers: sender,
                receiver: Mutex::new(Some(receiver)),
                running: AtomicBool::new(false),
                started: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                failed_passes: AtomicU32::new(0),
                stats: Mutex::new(StatsState::default()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }
}

/// Drives queue drainage
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Arc<OperationQueue>,
    network: Arc<dyn NetworkMonitor>,
    processors: ProcessorRegistry,
    retry: RetryExecutor<PolicyPredicate, TracingObserver>,
    breaker: Arc<CircuitBreaker>,
    resolver: ConflictResolver,
    events: EventBus,
    config: SyncConfig,
    timer: SyncTimer,
    triggers: mpsc::UnboundedSender<SyncTrigger>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<SyncTrigger>>>,
    running: AtomicBool,
    started: AtomicBool,
    shut_down: AtomicBool,
    /// Consecutive passes aborted by a queue error
    failed_passes: AtomicU32,
    stats: Mutex<StatsState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Clears the single-flight flag when a pass ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncCoordinator {
    pub fn builder(
        queue: Arc<OperationQueue>,
        network: Arc<dyn NetworkMonitor>,
    ) -> SyncCoordinatorBuilder {
        SyncCoordinatorBuilder::new(queue, network)
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.inner.queue
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a pass is in progress
    pub fn is_syncing(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// When the retry/debounce timer is due to fire, if armed
    pub fn next_timer(&self) -> Option<Instant> {
        self.inner.timer.due()
    }

    /// Start the background triggers
    ///
    /// Spawns the trigger worker, the network watcher, the periodic
    /// interval and, when configured, the breaker health check. Calling it
    /// again is a no-op.
    pub async fn start(&self) {
        if self.inner.shut_down.load(Ordering::SeqCst)
            || self.inner.started.swap(true, Ordering::SeqCst)
        {
            return;
        }
        let Some(receiver) = self.inner.receiver.lock().unwrap().take() else {
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let mut tasks = vec![
            tokio::spawn(run_worker(weak.clone(), receiver)),
            tokio::spawn(watch_network(weak, self.inner.network.subscribe())),
        ];

        let period = self.inner.config.processing_interval();
        if !period.is_zero() {
            tasks.push(tokio::spawn(run_interval(
                self.inner.triggers.clone(),
                period,
            )));
        }
        if let Some(health_check) = self.inner.breaker.spawn_health_check() {
            tasks.push(health_check);
        }
        self.inner.tasks.lock().unwrap().extend(tasks);

        tracing::info!(
            processing_interval_ms = period.as_millis() as u64,
            online = self.inner.network.is_online(),
            "sync coordinator started"
        );
        self.inner.reschedule().await;
    }

    /// Run a pass now
    ///
    /// Returns `None` without doing anything when a pass is already
    /// running, the network is offline, or the coordinator was shut down.
    pub async fn sync_now(&self) -> ApiResult<Option<Batch>> {
        self.inner.sync_pass(SyncTrigger::Manual).await
    }

    /// Request a pass because the application came to the foreground
    pub fn notify_foreground(&self) {
        self.inner.request(SyncTrigger::Foreground);
    }

    /// Resolve an operation held in `conflict` with an explicit strategy
    ///
    /// Returns the action taken. `Manual` leaves the operation untouched.
    pub async fn resolve_conflict(
        &self,
        id: &str,
        strategy: ConflictStrategyKind,
    ) -> ApiResult<ConflictAction> {
        let operation = self
            .inner
            .queue
            .get(id)
            .await
            .ok_or_else(|| ApiError::not_found(id))?;
        if operation.status != OperationStatus::Conflict {
            return Err(ApiError::InvalidTransition {
                id: id.to_string(),
                from: operation.status.to_string(),
                to: "resolved".to_string(),
            });
        }

        let server_version = operation
            .conflict
            .as_ref()
            .and_then(|c| c.server_version.clone());
        let action =
            self.inner
                .resolver
                .resolve_with(strategy, &operation, server_version.as_ref());
        self.inner
            .apply_conflict_action(&operation, strategy, action.clone(), server_version)
            .await?;

        if !matches!(action, ConflictAction::Hold) {
            self.inner.reschedule().await;
        }
        Ok(action)
    }

    pub async fn stats(&self) -> SyncStats {
        let pending = self.inner.queue.get_stats().await.pending;
        let stats = self.inner.stats.lock().unwrap();
        let average_sync_duration = if stats.sync_passes == 0 {
            Duration::ZERO
        } else {
            stats.total_duration / stats.sync_passes as u32
        };
        SyncStats {
            total_operations: stats.completed + stats.failed + stats.conflicted + stats.retried,
            pending,
            completed: stats.completed,
            failed: stats.failed,
            conflicted: stats.conflicted,
            retried: stats.retried,
            sync_passes: stats.sync_passes,
            average_sync_duration,
            bytes_uploaded: stats.bytes_uploaded,
            bytes_downloaded: stats.bytes_downloaded,
            last_sync: stats.last_sync,
            next_sync: stats.next_sync,
        }
    }

    /// Stop all triggers; a call in flight finishes but its result is
    /// discarded
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.timer.cancel();
        self.inner.abort_tasks();
        self.inner.stats.lock().unwrap().next_sync = None;
        tracing::info!("sync coordinator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

async fn run_worker(inner: Weak<Inner>, mut receiver: mpsc::UnboundedReceiver<SyncTrigger>) {
    while let Some(trigger) = receiver.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.shut_down.load(Ordering::SeqCst) {
            break;
        }
        if let Err(err) = inner.sync_pass(trigger).await {
            tracing::error!(error = %err, ?trigger, "sync pass failed");
        }
    }
}

async fn watch_network(inner: Weak<Inner>, mut status: tokio::sync::watch::Receiver<bool>) {
    while status.changed().await.is_ok() {
        let online = *status.borrow_and_update();
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_network_change(online);
    }
}

async fn run_interval(triggers: mpsc::UnboundedSender<SyncTrigger>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if triggers.send(SyncTrigger::Interval).is_err() {
            break;
        }
    }
}

impl Inner {
    fn request(&self, trigger: SyncTrigger) {
        if !self.started.load(Ordering::SeqCst) || self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.triggers.send(trigger);
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    fn on_network_change(&self, online: bool) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        self.events.publish(SyncEvent::NetworkStatusChanged { online });

        if online {
            let debounce = self.config.online_debounce();
            tracing::info!(
                debounce_ms = debounce.as_millis() as u64,
                "back online, sync scheduled"
            );
            self.timer.schedule(debounce);
        } else {
            tracing::info!("offline, sync timer cancelled");
            self.timer.cancel();
            self.stats.lock().unwrap().next_sync = None;
        }
    }

    async fn sync_pass(&self, trigger: SyncTrigger) -> ApiResult<Option<Batch>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Ok(None);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(?trigger, "sync pass already running");
            return Ok(None);
        }
        let _guard = RunningGuard(&self.running);

        if !self.network.is_online() {
            tracing::debug!(?trigger, "offline, skipping sync pass");
            return Ok(None);
        }

        let result = self.run_batch(trigger).await;
        match &result {
            Ok(_) => {
                self.failed_passes.store(0, Ordering::SeqCst);
                self.reschedule().await;
            }
            Err(err) => self.back_off(err),
        }
        result.map(Some)
    }

    /// Delay the next timer pass after a pass aborted on a queue error
    ///
    /// The delay doubles with each consecutive aborted pass, within the
    /// queue's retry bounds.
    fn back_off(&self, err: &ApiError) {
        let failures = self.failed_passes.fetch_add(1, Ordering::SeqCst) + 1;
        let config = self.queue.config();
        let delay = backoff_delay(
            config.retry_base_delay(),
            CROSS_PASS_BACKOFF_MULTIPLIER,
            config.retry_max_delay(),
            failures,
        );
        tracing::warn!(
            error = %err,
            failures,
            delay_ms = delay.as_millis() as u64,
            "sync pass aborted, backing off"
        );

        if !self.started.load(Ordering::SeqCst)
            || self.shut_down.load(Ordering::SeqCst)
            || !self.network.is_online()
        {
            return;
        }
        self.timer.schedule(delay);
        let next = self.queue.clock().now()
            + chrono::Duration::milliseconds(delay.as_millis() as i64);
        self.stats.lock().unwrap().next_sync = Some(next);
    }

    async fn run_batch(&self, trigger: SyncTrigger) -> ApiResult<Batch> {
        let clock = self.queue.clock().clone();
        let started = Instant::now();
        let operations = self
            .queue
            .get_next_batch(self.queue.config().batch_size)
            .await;
        let ids = operations.iter().map(|op| op.id.clone()).collect();
        let mut batch = Batch::new(ids, clock.now());

        if operations.is_empty() {
            batch.finish(clock.now(), Duration::ZERO);
            return Ok(batch);
        }

        tracing::info!(batch_id = %batch.id, size = batch.total(), ?trigger, "sync pass started");
        self.events.publish(SyncEvent::SyncStarted {
            batch_id: batch.id.clone(),
            size: batch.total(),
        });

        for operation in operations {
            if self.shut_down.load(Ordering::SeqCst) {
                tracing::info!(batch_id = %batch.id, "shutdown requested, abandoning batch");
                break;
            }
            self.process_operation(operation, &mut batch).await?;
        }

        batch.finish(clock.now(), started.elapsed());
        {
            let mut stats = self.stats.lock().unwrap();
            stats.sync_passes += 1;
            stats.total_duration += batch.duration;
            stats.last_sync = batch.finished_at;
        }

        tracing::info!(
            batch_id = %batch.id,
            completed = batch.completed,
            failed = batch.failed,
            conflicts = batch.conflicts,
            retried = batch.retried,
            duration_ms = batch.duration.as_millis() as u64,
            "sync pass finished"
        );
        self.events.publish(SyncEvent::SyncCompleted {
            batch_id: batch.id.clone(),
            completed: batch.completed,
            failed: batch.failed,
            conflicts: batch.conflicts,
            retried: batch.retried,
            duration_ms: batch.duration.as_millis() as u64,
        });
        Ok(batch)
    }

    async fn process_operation(
        &self,
        operation: QueuedOperation,
        batch: &mut Batch,
    ) -> ApiResult<()> {
        let operation = self.queue.mark_processing(&operation.id).await?;
        let started = Instant::now();

        let outcome = match self
            .processors
            .resolve(&operation.target.resource, operation.operation_type)
        {
            Ok(processor) => {
                let label = format!("{} {}", operation.target.method, operation.target.endpoint);
                let operation = &operation;
                let label = label.as_str();
                let breaker = &self.breaker;
                self.retry
                    .execute(|| {
                        let processor = processor.clone();
                        async move {
                            breaker
                                .execute_filtered(
                                    label,
                                    || async move { processor.process(operation).await },
                                    ApiError::is_dependency_failure,
                                )
                                .await
                        }
                    })
                    .await
            }
            Err(err) => Err(err),
        };

        if self.shut_down.load(Ordering::SeqCst) {
            tracing::debug!(operation_id = %operation.id, "discarding result after shutdown");
            self.queue.release(&operation.id).await;
            return Ok(());
        }

        let settled = match outcome {
            Ok(result) => {
                self.complete(&operation, result, started.elapsed(), batch)
                    .await
            }
            Err(err) if err.is_conflict() => self.handle_conflict(&operation, err, batch).await,
            Err(err) => self.handle_failure(&operation, err, batch).await,
        };
        if settled.is_err() {
            // The attempt could not be recorded; keep the operation selectable
            self.queue.release(&operation.id).await;
        }
        settled
    }

    async fn complete(
        &self,
        operation: &QueuedOperation,
        result: ProcessResult,
        elapsed: Duration,
        batch: &mut Batch,
    ) -> ApiResult<()> {
        self.queue.mark_completed(&operation.id).await?;
        self.queue.remove(&operation.id).await?;
        batch.completed += 1;
        {
            let mut stats = self.stats.lock().unwrap();
            stats.completed += 1;
            stats.bytes_uploaded += result.bytes_uploaded;
            stats.bytes_downloaded += result.bytes_downloaded;
        }

        tracing::debug!(operation_id = %operation.id, "operation completed");
        self.events.publish(SyncEvent::OperationCompleted {
            operation_id: operation.id.clone(),
            duration_ms: elapsed.as_millis() as u64,
        });
        Ok(())
    }

    async fn handle_failure(
        &self,
        operation: &QueuedOperation,
        err: ApiError,
        batch: &mut Batch,
    ) -> ApiResult<()> {
        let now = self.queue.clock().now();
        let detail = OperationError::from_api_error(&err, now);
        let attempts = operation.metadata.attempt_count;
        let config = self.queue.config();

        // A missing processor may be registered later; other rejections
        // will not improve by waiting
        let terminal = !err.is_queueable() && !matches!(err, ApiError::ProcessorNotFound { .. });
        if terminal || attempts >= config.max_retries {
            self.queue.mark_failed(&operation.id, detail).await?;
            self.queue.remove(&operation.id).await?;
            batch.failed += 1;
            self.stats.lock().unwrap().failed += 1;

            tracing::warn!(
                operation_id = %operation.id,
                attempts,
                error = %err,
                "operation failed permanently"
            );
            self.events.publish(SyncEvent::OperationFailed {
                operation_id: operation.id.clone(),
                attempts,
                error: err.to_string(),
            });
            return Ok(());
        }

        let mut delay = backoff_delay(
            config.retry_base_delay(),
            CROSS_PASS_BACKOFF_MULTIPLIER,
            config.retry_max_delay(),
            attempts,
        );
        if let ApiError::CircuitOpen { retry_after, .. } = &err {
            delay = delay.max(*retry_after);
        }
        let next_retry = now + chrono::Duration::milliseconds(delay.as_millis() as i64);
        self.queue
            .schedule_retry(&operation.id, detail, next_retry)
            .await?;
        batch.retried += 1;
        self.stats.lock().unwrap().retried += 1;

        tracing::info!(
            operation_id = %operation.id,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "operation retry scheduled"
        );
        self.events.publish(SyncEvent::OperationRetryScheduled {
            operation_id: operation.id.clone(),
            attempt: attempts,
            next_retry,
            error: err.to_string(),
        });
        Ok(())
    }

    async fn handle_conflict(
        &self,
        operation: &QueuedOperation,
        err: ApiError,
        batch: &mut Batch,
    ) -> ApiResult<()> {
        let server_version = match err {
            ApiError::Conflict { server_version, .. } => server_version,
            _ => None,
        };
        let strategy = self.resolver.strategy();
        let mut action = self.resolver.resolve(operation, server_version.as_ref());
        // An overridden resubmission the server still rejects waits for an
        // explicit resolution
        if operation.force_override && action == ConflictAction::ResubmitWithOverride {
            tracing::warn!(operation_id = %operation.id, "override rejected, holding conflict");
            action = ConflictAction::Hold;
        }

        self.apply_conflict_action(operation, strategy, action, server_version)
            .await?;
        batch.conflicts += 1;
        self.stats.lock().unwrap().conflicted += 1;
        Ok(())
    }

    async fn apply_conflict_action(
        &self,
        operation: &QueuedOperation,
        strategy: ConflictStrategyKind,
        action: ConflictAction,
        server_version: Option<serde_json::Value>,
    ) -> ApiResult<()> {
        let id = operation.id.as_str();
        let mut replacement_id = None;
        let accepted = matches!(action, ConflictAction::AcceptServer);

        match action {
            ConflictAction::ResubmitWithOverride => {
                self.queue.requeue_with_override(id).await?;
            }
            ConflictAction::AcceptServer => {
                self.queue.mark_completed(id).await?;
                self.queue.remove(id).await?;
            }
            ConflictAction::Requeue(payload) => {
                replacement_id = Some(self.queue.requeue_merged(id, payload).await?);
            }
            ConflictAction::Hold => {
                if operation.status != OperationStatus::Conflict {
                    self.queue
                        .mark_conflict(
                            id,
                            ConflictData {
                                local_version: operation.payload.clone(),
                                server_version,
                                strategy,
                            },
                        )
                        .await?;
                }
            }
        }

        tracing::info!(operation_id = %id, %strategy, "conflict resolved");
        self.events.publish(SyncEvent::OperationConflict {
            operation_id: id.to_string(),
            strategy,
            replacement_id,
        });
        if accepted {
            self.events.publish(SyncEvent::OperationCompleted {
                operation_id: id.to_string(),
                duration_ms: 0,
            });
        }
        Ok(())
    }

    /// Arm the timer for the earliest due pending operation
    async fn reschedule(&self) {
        if !self.started.load(Ordering::SeqCst)
            || self.shut_down.load(Ordering::SeqCst)
            || !self.network.is_online()
        {
            return;
        }

        let Some(due) = self.queue.next_due().await else {
            self.stats.lock().unwrap().next_sync = None;
            return;
        };
        let now = self.queue.clock().now();
        let delay = (due - now).to_std().unwrap_or(Duration::ZERO);
        self.timer.schedule(delay);
        self.stats.lock().unwrap().next_sync = Some(due.max(now));
    }
}
