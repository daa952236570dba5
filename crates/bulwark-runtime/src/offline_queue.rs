//! Deferred operations replayed when connectivity returns.
//!
//! Operations that need the network are parked here while the host is
//! offline. A drain replays a snapshot of the queue in priority order
//! (`High`, `Normal`, `Low`; FIFO within a tier) through an
//! [`OperationExecutor`], normally the fallback router.
//!
//! Only one drain runs at a time. Enqueue and cancel stay available while a
//! drain is in progress; anything enqueued during a drain waits for the next.

use async_trait::async_trait;
use bulwark_core::config::OfflineQueueConfig;
use bulwark_core::{
    ExecutionError, OfflineCapability, OperationStatus, Priority, QueuedOperation,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::events::{EngineEvent, EventSink, TracingSink};

/// Errors from the offline queue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Operation '{0}' can run offline and is never queued")]
    OfflineCapable(String),

    #[error("No executor configured for the offline queue")]
    NoExecutor,

    #[error("A drain is already in progress")]
    DrainInProgress,
}

/// Replays a queued operation.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute_queued(&self, operation: &QueuedOperation) -> Result<JsonValue, ExecutionError>;
}

/// Request to defer an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub operation: String,
    pub payload: JsonValue,
    pub priority: Priority,
    /// Falls back to the queue's default when absent
    pub max_retries: Option<u32>,
}

impl NewOperation {
    pub fn new(operation: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            operation: operation.into(),
            payload,
            priority: Priority::Normal,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Operations taken from the snapshot and executed
    pub processed: usize,
    pub completed: usize,
    /// Failed but left queued for the next drain
    pub retried: usize,
    /// Failed permanently
    pub failed: usize,
    /// In the snapshot but cancelled before their turn
    pub skipped: usize,
}

/// Counts by status across the active queue and history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    fn count(&mut self, status: OperationStatus) {
        match status {
            OperationStatus::Queued => self.queued += 1,
            OperationStatus::Processing => self.processing += 1,
            OperationStatus::Completed => self.completed += 1,
            OperationStatus::Failed => self.failed += 1,
            OperationStatus::Cancelled => self.cancelled += 1,
        }
    }
}

#[derive(Default)]
struct QueueState {
    /// Queued and processing operations, in arrival order
    active: Vec<QueuedOperation>,
    /// Terminal operations, oldest first
    history: VecDeque<QueuedOperation>,
}

impl QueueState {
    fn retire(&mut self, mut op: QueuedOperation, status: OperationStatus, capacity: usize) {
        op.status = status;
        op.finished_at = Some(Utc::now());
        self.history.push_back(op);
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }

    fn take(&mut self, id: &str) -> Option<QueuedOperation> {
        let index = self.active.iter().position(|op| op.id == id)?;
        Some(self.active.remove(index))
    }
}

/// Clears the in-flight flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Priority queue of operations waiting for connectivity.
pub struct OfflineQueue {
    config: OfflineQueueConfig,
    state: Mutex<QueueState>,
    executor: RwLock<Option<Arc<dyn OperationExecutor>>>,
    draining: AtomicBool,
    next_sequence: AtomicU64,
    events: Arc<dyn EventSink>,
}

impl OfflineQueue {
    /// Create an empty queue with no executor.
    pub fn new(config: OfflineQueueConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            executor: RwLock::new(None),
            draining: AtomicBool::new(false),
            next_sequence: AtomicU64::new(0),
            events,
        }
    }

    /// Set the executor used by [`drain`](Self::drain).
    pub fn set_executor(&self, executor: Arc<dyn OperationExecutor>) {
        *self.executor.write() = Some(executor);
    }

    /// Defer an operation. Returns its id.
    ///
    /// Offline-capable operation types are rejected: they should simply run.
    pub fn enqueue(&self, request: NewOperation) -> Result<String, QueueError> {
        if self.config.capability(&request.operation) == OfflineCapability::OfflineCapable {
            return Err(QueueError::OfflineCapable(request.operation));
        }

        let op = QueuedOperation {
            id: Uuid::new_v4().to_string(),
            operation: request.operation,
            payload: request.payload,
            priority: request.priority,
            queued_at: Utc::now(),
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(self.config.default_max_retries),
            status: OperationStatus::Queued,
            last_error: None,
            finished_at: None,
        };
        let id = op.id.clone();
        let operation = op.operation.clone();
        let priority = op.priority;
        self.state.lock().active.push(op);

        tracing::info!(id = %id, operation = %operation, priority = ?priority, "Operation queued");
        self.events
            .emit(&EngineEvent::operation(&id, &operation, OperationStatus::Queued, 0));

        Ok(id)
    }

    /// Cancel a queued operation. Operations already processing are not cancelled.
    pub fn cancel(&self, id: &str) -> bool {
        let operation = {
            let mut state = self.state.lock();
            let queued = state
                .active
                .iter()
                .any(|op| op.id == id && op.status == OperationStatus::Queued);
            if !queued {
                return false;
            }
            let Some(op) = state.take(id) else {
                return false;
            };
            let operation = op.operation.clone();
            state.retire(op, OperationStatus::Cancelled, self.config.history_capacity);
            operation
        };

        tracing::info!(id = %id, operation = %operation, "Operation cancelled");
        self.events
            .emit(&EngineEvent::operation(id, &operation, OperationStatus::Cancelled, 0));
        true
    }

    /// Current record of an operation, active or finished.
    pub fn status(&self, id: &str) -> Option<QueuedOperation> {
        let state = self.state.lock();
        state
            .active
            .iter()
            .chain(state.history.iter().rev())
            .find(|op| op.id == id)
            .cloned()
    }

    /// Operations waiting for a drain, in drain order.
    pub fn pending(&self) -> Vec<QueuedOperation> {
        let mut pending: Vec<QueuedOperation> = self
            .state
            .lock()
            .active
            .iter()
            .filter(|op| op.status == OperationStatus::Queued)
            .cloned()
            .collect();
        sort_for_drain(&mut pending);
        pending
    }

    /// Number of operations waiting for a drain.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .active
            .iter()
            .filter(|op| op.status == OperationStatus::Queued)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finished operations, oldest first.
    pub fn history(&self) -> Vec<QueuedOperation> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        let mut stats = QueueStats::default();
        for op in state.active.iter().chain(state.history.iter()) {
            stats.count(op.status);
        }
        stats
    }

    /// Drop completed operations from the history. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.history.len();
        state
            .history
            .retain(|op| op.status != OperationStatus::Completed);
        before - state.history.len()
    }

    /// True while a drain is running.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Replay every operation queued at the moment the drain starts.
    pub async fn drain(&self) -> Result<DrainReport, QueueError> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(QueueError::DrainInProgress);
        }
        let _guard = DrainGuard(&self.draining);

        let executor = self.executor.read().clone().ok_or(QueueError::NoExecutor)?;
        let snapshot: Vec<String> = self.pending().into_iter().map(|op| op.id).collect();
        let mut report = DrainReport::default();

        tracing::info!(operations = snapshot.len(), "Draining offline queue");

        for id in snapshot {
            let claimed = {
                let mut state = self.state.lock();
                state
                    .active
                    .iter_mut()
                    .find(|op| op.id == id && op.status == OperationStatus::Queued)
                    .map(|op| {
                        op.status = OperationStatus::Processing;
                        op.clone()
                    })
            };
            let Some(op) = claimed else {
                report.skipped += 1;
                continue;
            };

            report.processed += 1;
            self.events
                .emit(&EngineEvent::operation(&op.id, &op.operation, OperationStatus::Processing, op.retry_count));

            let outcome = executor.execute_queued(&op).await;
            let event = self.settle(&op.id, outcome, &mut report);
            if let Some(event) = event {
                self.events.emit(&event);
            }
        }

        tracing::info!(
            processed = report.processed,
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            "Offline queue drained"
        );
        Ok(report)
    }

    /// Apply an execution outcome to a processing operation.
    fn settle(
        &self,
        id: &str,
        outcome: Result<JsonValue, ExecutionError>,
        report: &mut DrainReport,
    ) -> Option<EngineEvent> {
        let mut state = self.state.lock();
        let mut op = state.take(id)?;

        match outcome {
            Ok(_) => {
                report.completed += 1;
                tracing::info!(id = %id, operation = %op.operation, "Queued operation completed");
                let event = EngineEvent::operation(id, &op.operation, OperationStatus::Completed, op.retry_count);
                state.retire(op, OperationStatus::Completed, self.config.history_capacity);
                Some(event)
            }
            Err(error) => {
                op.retry_count += 1;
                op.last_error = Some(error.to_string());
                let permanent = op.retry_count >= op.max_retries || !error.kind.is_retryable();

                tracing::warn!(
                    id = %id,
                    operation = %op.operation,
                    retry_count = op.retry_count,
                    max_retries = op.max_retries,
                    permanent,
                    error = %error,
                    "Queued operation failed"
                );
                let event = EngineEvent::OperationFailed {
                    id: id.to_string(),
                    operation: op.operation.clone(),
                    retry_count: op.retry_count,
                    permanent,
                };

                if permanent {
                    report.failed += 1;
                    state.retire(op, OperationStatus::Failed, self.config.history_capacity);
                } else {
                    report.retried += 1;
                    op.status = OperationStatus::Queued;
                    // Back to its arrival slot so FIFO order within the tier holds
                    let index = state
                        .active
                        .iter()
                        .position(|other| other.sequence > op.sequence)
                        .unwrap_or(state.active.len());
                    state.active.insert(index, op);
                }
                Some(event)
            }
        }
    }

    pub fn config(&self) -> &OfflineQueueConfig {
        &self.config
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(OfflineQueueConfig::default(), Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("stats", &self.stats())
            .field("draining", &self.is_draining())
            .finish()
    }
}

/// Highest priority first, then arrival order within a tier.
fn sort_for_drain(ops: &mut [QueuedOperation]) {
    ops.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::ErrorKind;
    use proptest::prelude::*;
    use tokio::sync::Notify;

    /// Records execution order and fails operations named "flaky".
    #[derive(Default)]
    struct RecordingExecutor {
        seen: Mutex<Vec<String>>,
        enqueue_during_drain: Mutex<Option<Arc<OfflineQueue>>>,
    }

    #[async_trait]
    impl OperationExecutor for RecordingExecutor {
        async fn execute_queued(&self, op: &QueuedOperation) -> Result<JsonValue, ExecutionError> {
            self.seen.lock().push(op.payload["name"].as_str().unwrap_or("").to_string());

            let queue = self.enqueue_during_drain.lock().take();
            if let Some(queue) = queue {
                queue
                    .enqueue(NewOperation::new("generate", serde_json::json!({"name": "late"})))
                    .unwrap();
            }

            if op.operation == "flaky" {
                Err(ExecutionError::new(ErrorKind::NetworkError, "still offline"))
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        }
    }

    fn queue_with(executor: Arc<RecordingExecutor>) -> Arc<OfflineQueue> {
        let queue = Arc::new(OfflineQueue::default());
        queue.set_executor(executor);
        queue
    }

    fn op(name: &str, priority: Priority) -> NewOperation {
        NewOperation::new("generate", serde_json::json!({ "name": name })).with_priority(priority)
    }

    #[tokio::test]
    async fn test_drain_order_priority_then_fifo() {
        let executor = Arc::new(RecordingExecutor::default());
        let queue = queue_with(executor.clone());

        queue.enqueue(op("low-1", Priority::Low)).unwrap();
        queue.enqueue(op("normal-1", Priority::Normal)).unwrap();
        queue.enqueue(op("high-1", Priority::High)).unwrap();
        queue.enqueue(op("normal-2", Priority::Normal)).unwrap();
        queue.enqueue(op("high-2", Priority::High)).unwrap();

        let report = queue.drain().await.unwrap();

        assert_eq!(report.completed, 5);
        assert_eq!(
            *executor.seen.lock(),
            vec!["high-1", "high-2", "normal-1", "normal-2", "low-1"]
        );
        assert!(queue.is_empty());
        assert_eq!(queue.stats().completed, 5);
    }

    #[tokio::test]
    async fn test_enqueued_during_drain_waits_for_next_drain() {
        let executor = Arc::new(RecordingExecutor::default());
        let queue = queue_with(executor.clone());
        *executor.enqueue_during_drain.lock() = Some(queue.clone());

        queue.enqueue(op("first", Priority::Normal)).unwrap();
        queue.enqueue(op("second", Priority::Normal)).unwrap();

        let report = queue.drain().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(*executor.seen.lock(), vec!["first", "second"]);
        assert_eq!(queue.len(), 1);

        let report = queue.drain().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(executor.seen.lock().last().map(String::as_str), Some("late"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_max_retries_fails_permanently() {
        let executor = Arc::new(RecordingExecutor::default());
        let queue = queue_with(executor.clone());

        let id = queue
            .enqueue(NewOperation::new("flaky", serde_json::json!({"name": "f"})).with_max_retries(2))
            .unwrap();

        let first = queue.drain().await.unwrap();
        assert_eq!(first.retried, 1);
        let record = queue.status(&id).unwrap();
        assert_eq!(record.status, OperationStatus::Queued);
        assert_eq!(record.retry_count, 1);

        let second = queue.drain().await.unwrap();
        assert_eq!(second.failed, 1);
        let record = queue.status(&id).unwrap();
        assert_eq!(record.status, OperationStatus::Failed);
        assert_eq!(record.retry_count, 2);
        assert!(record.finished_at.is_some());

        let third = queue.drain().await.unwrap();
        assert_eq!(third.processed, 0);
        assert_eq!(executor.seen.lock().len(), 2);
        assert_eq!(queue.history().len(), 1);
    }

    #[tokio::test]
    async fn test_retried_operations_keep_arrival_order() {
        let executor = Arc::new(RecordingExecutor::default());
        let queue = queue_with(executor.clone());

        let names: Vec<String> = (0..10).map(|i| format!("f-{}", i)).collect();
        for name in &names {
            queue
                .enqueue(NewOperation::new("flaky", serde_json::json!({ "name": name })))
                .unwrap();
        }

        let report = queue.drain().await.unwrap();
        assert_eq!(report.retried, 10);

        let pending = queue.pending();
        let order: Vec<&str> = pending
            .iter()
            .map(|op| op.payload["name"].as_str().unwrap())
            .collect();
        assert_eq!(order, names.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(pending.windows(2).all(|w| w[0].sequence < w[1].sequence));

        queue.drain().await.unwrap();
        let seen = executor.seen.lock().clone();
        assert_eq!(seen[10..], seen[..10]);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        struct Rejecting;

        #[async_trait]
        impl OperationExecutor for Rejecting {
            async fn execute_queued(&self, _: &QueuedOperation) -> Result<JsonValue, ExecutionError> {
                Err(ExecutionError::new(ErrorKind::ValidationError, "bad params"))
            }
        }

        let queue = OfflineQueue::default();
        queue.set_executor(Arc::new(Rejecting));
        let id = queue.enqueue(op("x", Priority::Normal)).unwrap();

        let report = queue.drain().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(queue.status(&id).unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn test_cancel() {
        let queue = OfflineQueue::default();
        let id = queue.enqueue(op("x", Priority::Normal)).unwrap();

        assert!(queue.cancel(&id));
        assert!(!queue.cancel(&id));
        assert!(!queue.cancel("missing"));
        assert_eq!(queue.status(&id).unwrap().status, OperationStatus::Cancelled);
        assert_eq!(queue.stats().cancelled, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_offline_capable_rejected() {
        let queue = OfflineQueue::default();
        let err = queue
            .enqueue(NewOperation::new("local-save", JsonValue::Null))
            .unwrap_err();
        assert_eq!(err, QueueError::OfflineCapable("local-save".to_string()));
    }

    #[tokio::test]
    async fn test_drain_without_executor() {
        let queue = OfflineQueue::default();
        assert_eq!(queue.drain().await.unwrap_err(), QueueError::NoExecutor);
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn test_clear_completed() {
        let executor = Arc::new(RecordingExecutor::default());
        let queue = queue_with(executor);
        queue.enqueue(op("a", Priority::Normal)).unwrap();
        let cancelled = queue.enqueue(op("b", Priority::Normal)).unwrap();
        queue.cancel(&cancelled);
        queue.drain().await.unwrap();

        assert_eq!(queue.clear_completed(), 1);
        assert_eq!(queue.history().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drain_is_not_reentrant() {
        struct Blocking {
            entered: Notify,
            release: Notify,
        }

        #[async_trait]
        impl OperationExecutor for Blocking {
            async fn execute_queued(&self, _: &QueuedOperation) -> Result<JsonValue, ExecutionError> {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(JsonValue::Null)
            }
        }

        let executor = Arc::new(Blocking {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let queue = Arc::new(OfflineQueue::default());
        queue.set_executor(executor.clone());
        queue.enqueue(op("x", Priority::Normal)).unwrap();

        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.drain().await }
        });
        executor.entered.notified().await;

        assert!(queue.is_draining());
        assert_eq!(queue.drain().await.unwrap_err(), QueueError::DrainInProgress);

        // Enqueue and cancel keep working mid-drain
        let id = queue.enqueue(op("y", Priority::High)).unwrap();
        assert!(queue.cancel(&id));

        executor.release.notify_one();
        let report = first.await.unwrap().unwrap();
        assert_eq!(report.completed, 1);
        assert!(!queue.is_draining());
    }

    proptest! {
        #[test]
        fn test_pending_is_sorted(priorities in proptest::collection::vec(0u8..3, 0..20)) {
            let queue = OfflineQueue::default();
            for (i, p) in priorities.iter().enumerate() {
                let priority = match p {
                    0 => Priority::Low,
                    1 => Priority::Normal,
                    _ => Priority::High,
                };
                queue.enqueue(op(&i.to_string(), priority)).unwrap();
            }

            let pending = queue.pending();
            prop_assert_eq!(pending.len(), priorities.len());
            for pair in pending.windows(2) {
                prop_assert!(pair[0].priority >= pair[1].priority);
                if pair[0].priority == pair[1].priority {
                    let a: usize = pair[0].payload["name"].as_str().unwrap().parse().unwrap();
                    let b: usize = pair[1].payload["name"].as_str().unwrap().parse().unwrap();
                    prop_assert!(a < b);
                }
            }
        }
    }
}
