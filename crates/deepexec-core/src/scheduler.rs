//! Priority scheduling with a dependency gate.
//!
//! One FIFO queue per priority class. Selection is strict priority: a ready
//! `Critical` entry always goes before any `High` entry, with no aging, so a
//! steady stream of urgent work can starve `Background` operations.
//!
//! An operation is ready once every dependency id has a recorded result with
//! status `Completed`. A dependency that failed or was rolled back never
//! becomes ready.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use deepexec_types::error::EngineError;
use deepexec_types::operation::{OperationPriority, OperationResult, OperationStatus};
use deepexec_types::stats::SchedulerStats;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::operation::Operation;

// ---------------------------------------------------------------------------
// Queue entries
// ---------------------------------------------------------------------------

/// Who drives a queued operation to completion.
#[derive(Debug)]
pub enum Dispatch {
    /// The `execute()` caller waits on the dependency gate itself and
    /// withdraws the entry once it proceeds.
    Caller,
    /// The background loop executes the operation and replies here.
    Background(oneshot::Sender<Result<OperationResult, EngineError>>),
}

impl Dispatch {
    pub fn is_background(&self) -> bool {
        matches!(self, Dispatch::Background(_))
    }
}

/// An operation waiting in a priority queue.
#[derive(Debug)]
pub struct ScheduledOperation {
    pub operation: Arc<Operation>,
    /// Resolved context the operation runs in.
    pub context_id: String,
    pub user_id: Option<String>,
    pub dispatch: Dispatch,
    pub enqueued_at: Instant,
}

impl ScheduledOperation {
    pub fn new(
        operation: Arc<Operation>,
        context_id: impl Into<String>,
        user_id: Option<String>,
        dispatch: Dispatch,
    ) -> Self {
        Self {
            operation,
            context_id: context_id.into(),
            user_id,
            dispatch,
            enqueued_at: Instant::now(),
        }
    }

    /// Whether the entry has waited longer than its operation timeout.
    /// A zero timeout means `default_timeout`, as it does for `execute`.
    pub fn is_expired(&self, now: Instant, default_timeout: Duration) -> bool {
        now.saturating_duration_since(self.enqueued_at)
            >= self.operation.effective_timeout(default_timeout)
    }
}

// ---------------------------------------------------------------------------
// OperationScheduler
// ---------------------------------------------------------------------------

pub struct OperationScheduler {
    queues: Mutex<BTreeMap<OperationPriority, VecDeque<ScheduledOperation>>>,
    running: Mutex<HashSet<String>>,
    completed: DashMap<String, OperationResult>,
    total_scheduled: AtomicU64,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
}

impl Default for OperationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationScheduler {
    pub fn new() -> Self {
        let queues = OperationPriority::ALL
            .into_iter()
            .map(|p| (p, VecDeque::new()))
            .collect();
        Self {
            queues: Mutex::new(queues),
            running: Mutex::new(HashSet::new()),
            completed: DashMap::new(),
            total_scheduled: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }

    /// Append an entry to the tail of its priority queue.
    pub fn schedule(&self, entry: ScheduledOperation) {
        let priority = entry.operation.priority;
        tracing::debug!(
            operation_id = %entry.operation.operation_id,
            priority = %priority,
            background = entry.dispatch.is_background(),
            "operation scheduled"
        );
        self.queues
            .lock()
            .expect("scheduler queue lock poisoned")
            .entry(priority)
            .or_default()
            .push_back(entry);
        self.total_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Pop the head of the most urgent non-empty queue, ignoring readiness.
    pub fn get_next(&self) -> Option<ScheduledOperation> {
        let mut queues = self.queues.lock().expect("scheduler queue lock poisoned");
        queues.values_mut().find_map(VecDeque::pop_front)
    }

    /// Remove and return the most urgent background entry whose dependencies
    /// are all complete. Entries that are not ready keep their position.
    pub fn get_next_ready(&self) -> Option<ScheduledOperation> {
        let mut queues = self.queues.lock().expect("scheduler queue lock poisoned");
        for queue in queues.values_mut() {
            let ready = queue
                .iter()
                .position(|e| e.dispatch.is_background() && self.can_execute(&e.operation));
            if let Some(index) = ready {
                return queue.remove(index);
            }
        }
        None
    }

    /// Remove every background entry that has outlived its timeout.
    pub fn take_expired(&self, now: Instant, default_timeout: Duration) -> Vec<ScheduledOperation> {
        let mut queues = self.queues.lock().expect("scheduler queue lock poisoned");
        let mut expired = Vec::new();
        for queue in queues.values_mut() {
            let (gone, kept): (VecDeque<_>, VecDeque<_>) = queue
                .drain(..)
                .partition(|e| e.dispatch.is_background() && e.is_expired(now, default_timeout));
            *queue = kept;
            expired.extend(gone);
        }
        expired
    }

    /// Remove an entry by operation id, wherever it is queued.
    pub fn withdraw(&self, operation_id: &str) -> Option<ScheduledOperation> {
        let mut queues = self.queues.lock().expect("scheduler queue lock poisoned");
        for queue in queues.values_mut() {
            if let Some(index) = queue
                .iter()
                .position(|e| e.operation.operation_id == operation_id)
            {
                return queue.remove(index);
            }
        }
        None
    }

    /// Remove every background entry. Caller entries stay with their callers.
    pub fn drain_background(&self) -> Vec<ScheduledOperation> {
        let mut queues = self.queues.lock().expect("scheduler queue lock poisoned");
        let mut drained = Vec::new();
        for queue in queues.values_mut() {
            let (background, caller): (VecDeque<_>, VecDeque<_>) =
                queue.drain(..).partition(|e| e.dispatch.is_background());
            *queue = caller;
            drained.extend(background);
        }
        drained
    }

    /// Overwrite the status of a recorded result without touching counters.
    pub fn set_completed_status(&self, operation_id: &str, status: OperationStatus) {
        if let Some(mut result) = self.completed.get_mut(operation_id) {
            result.status = status;
        }
    }

    pub fn is_queued(&self, operation_id: &str) -> bool {
        let queues = self.queues.lock().expect("scheduler queue lock poisoned");
        queues
            .values()
            .flatten()
            .any(|e| e.operation.operation_id == operation_id)
    }

    /// True when every dependency has completed successfully.
    pub fn can_execute(&self, operation: &Operation) -> bool {
        operation.dependencies.iter().all(|dep| {
            self.completed
                .get(dep)
                .is_some_and(|r| r.status == OperationStatus::Completed)
        })
    }

    /// Dependencies not yet completed successfully.
    pub fn pending_dependencies(&self, operation: &Operation) -> Vec<String> {
        operation
            .dependencies
            .iter()
            .filter(|dep| {
                !self
                    .completed
                    .get(dep.as_str())
                    .is_some_and(|r| r.status == OperationStatus::Completed)
            })
            .cloned()
            .collect()
    }

    pub fn mark_running(&self, operation_id: &str) {
        self.running
            .lock()
            .expect("scheduler running lock poisoned")
            .insert(operation_id.to_string());
    }

    /// Record the terminal result of an operation.
    pub fn mark_completed(&self, operation_id: &str, result: OperationResult) {
        self.running
            .lock()
            .expect("scheduler running lock poisoned")
            .remove(operation_id);

        if result.status == OperationStatus::Completed {
            self.total_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.completed.insert(operation_id.to_string(), result);
    }

    pub fn completed_result(&self, operation_id: &str) -> Option<OperationResult> {
        self.completed.get(operation_id).map(|r| r.clone())
    }

    pub fn running_count(&self) -> usize {
        self.running
            .lock()
            .expect("scheduler running lock poisoned")
            .len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let queue_sizes = self
            .queues
            .lock()
            .expect("scheduler queue lock poisoned")
            .iter()
            .map(|(p, q)| (*p, q.len()))
            .collect();
        SchedulerStats {
            queue_sizes,
            running: self.running_count(),
            completed: self.completed.len(),
            total_scheduled: self.total_scheduled.load(Ordering::Relaxed),
            total_completed: self.total_completed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }
}
