//! The orchestrator.
//!
//! `DeepExecutionEngine` wires the context store, validator, scheduler, audit
//! logger and rollback manager into a single execution pipeline. Clones are
//! cheap and share all state.
//!
//! There are two ways in:
//! - [`DeepExecutionEngine::execute`] runs the pipeline on the caller's task
//!   and returns the terminal result.
//! - [`DeepExecutionEngine::submit`] queues the operation for the background
//!   loop started by [`DeepExecutionEngine::start`] and hands back an
//!   [`OperationHandle`] to await.
//!
//! Each rollback-capable operation checkpoints its context state. The
//! checkpoint is consumed by a rollback or released by
//! [`DeepExecutionEngine::complete_context`]. Operations run in an implicit
//! `auto-*` context keep theirs until
//! [`RollbackManager::cleanup_old_checkpoints`] is called.

mod pipeline;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use deepexec_types::audit::{AuditEntry, AuditFilter};
use deepexec_types::config::EngineConfig;
use deepexec_types::context::{ExecutionContext, StateEntry, StateMap};
use deepexec_types::error::EngineError;
use deepexec_types::event::ExecutionEvent;
use deepexec_types::operation::{OperationResult, OperationStatus};
use deepexec_types::stats::{EngineStats, SystemStats};
use tokio::sync::{Semaphore, broadcast, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditLogger;
use crate::context::ContextStore;
use crate::event::EventBus;
use crate::operation::{Operation, OperationRequest};
use crate::rollback::RollbackManager;
use crate::scheduler::{Dispatch, OperationScheduler, ScheduledOperation};
use crate::validator::OperationValidator;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    rolled_back: AtomicU64,
}

struct ProcessingLoop {
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub(crate) struct EngineInner {
    config: EngineConfig,
    contexts: ContextStore,
    validator: OperationValidator,
    scheduler: OperationScheduler,
    audit: AuditLogger,
    rollback: RollbackManager,
    events: EventBus,
    /// Bounds concurrent handler invocations.
    permits: Semaphore,
    operations: DashMap<String, Arc<Operation>>,
    counters: Counters,
    running: AtomicBool,
    processing: Mutex<Option<ProcessingLoop>>,
}

// ---------------------------------------------------------------------------
// OperationHandle
// ---------------------------------------------------------------------------

/// Receipt for an operation queued with [`DeepExecutionEngine::submit`].
#[derive(Debug)]
pub struct OperationHandle {
    operation_id: String,
    receiver: oneshot::Receiver<Result<OperationResult, EngineError>>,
}

impl OperationHandle {
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Wait for the terminal result.
    ///
    /// Returns `EngineStopped` if the engine shut down before the operation
    /// was dispatched.
    pub async fn wait(self) -> Result<OperationResult, EngineError> {
        self.receiver.await.map_err(|_| EngineError::EngineStopped)?
    }
}

// ---------------------------------------------------------------------------
// DeepExecutionEngine
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DeepExecutionEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for DeepExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepExecutionEngine")
            .field("name", &self.inner.config.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl DeepExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        let inner = EngineInner {
            contexts: ContextStore::new(config.max_context_depth),
            validator: OperationValidator::new(
                config.max_context_depth,
                config.validation_timeout(),
            ),
            scheduler: OperationScheduler::new(),
            audit: AuditLogger::new(config.audit_retention_count),
            rollback: RollbackManager::new(),
            events: EventBus::new(config.event_channel_capacity),
            permits: Semaphore::new(config.max_concurrent_operations.max(1)),
            operations: DashMap::new(),
            counters: Counters::default(),
            running: AtomicBool::new(false),
            processing: Mutex::new(None),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the background processing loop. Starting twice is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut slot = self
            .inner
            .processing
            .lock()
            .expect("processing loop lock poisoned");
        if slot.is_some() {
            return;
        }

        let token = CancellationToken::new();
        self.inner.running.store(true, Ordering::SeqCst);
        let task = tokio::spawn(Arc::clone(&self.inner).process_loop(token.clone()));
        *slot = Some(ProcessingLoop { token, task });

        tracing::info!(
            name = %self.inner.config.name,
            max_concurrent = self.inner.config.max_concurrent_operations,
            "execution engine started"
        );
    }

    /// Stop the processing loop.
    ///
    /// In-flight background operations run to completion. Background entries
    /// still queued, including any submitted before `start`, are answered
    /// with `EngineStopped`.
    pub async fn stop(&self) {
        let processing = self
            .inner
            .processing
            .lock()
            .expect("processing loop lock poisoned")
            .take();
        if let Some(processing) = processing {
            processing.token.cancel();
            if let Err(e) = processing.task.await {
                tracing::error!(error = %e, "processing loop terminated abnormally");
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);

        let abandoned = self.inner.scheduler.drain_background();
        let count = abandoned.len();
        for entry in abandoned {
            if let Dispatch::Background(reply) = entry.dispatch {
                let _ = reply.send(Err(EngineError::EngineStopped));
            }
        }

        tracing::info!(
            name = %self.inner.config.name,
            abandoned = count,
            "execution engine stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Contexts
    // -----------------------------------------------------------------------

    /// Create a context, at the root or under `parent_id`.
    pub fn create_context(
        &self,
        name: &str,
        parent_id: Option<&str>,
        initial_state: Option<StateMap>,
    ) -> Result<ExecutionContext, EngineError> {
        self.inner.create_context(name, parent_id, initial_state)
    }

    pub fn get_context(&self, context_id: &str) -> Option<ExecutionContext> {
        self.inner.contexts.get(context_id)
    }

    pub fn set_context_state(
        &self,
        context_id: &str,
        key: impl Into<String>,
        entry: StateEntry,
    ) -> Result<(), EngineError> {
        self.inner.contexts.set_state(context_id, key, entry)
    }

    /// Mark a context completed and release the checkpoints its operations
    /// created. Rollback entries still on the context stay usable; their
    /// handlers are then invoked directly.
    pub fn complete_context(&self, context_id: &str) -> Result<ExecutionContext, EngineError> {
        let context = self.inner.contexts.complete(context_id)?;
        let rollback = &self.inner.rollback;
        let released = rollback
            .checkpoints_for_execution(context_id)
            .iter()
            .filter(|checkpoint| rollback.delete_checkpoint(&checkpoint.id))
            .count();
        tracing::debug!(context_id = %context_id, released, "context checkpoints released");
        self.inner.events.publish(ExecutionEvent::ContextCompleted {
            context_id: context.context_id.clone(),
        });
        Ok(context)
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Run an operation to a terminal status on the caller's task.
    ///
    /// Only context resolution fails with `Err`; every execution outcome,
    /// including validation failures and timeouts, comes back as a result.
    pub async fn execute(&self, request: OperationRequest) -> Result<OperationResult, EngineError> {
        let (operation, context_id, user_id) = self.inner.admit(request)?;
        Ok(self
            .inner
            .run(operation, &context_id, user_id.as_deref())
            .await)
    }

    /// Queue an operation for the background loop.
    ///
    /// Entries wait until the loop is running and their dependencies have
    /// completed. An entry that waits longer than its timeout fails with a
    /// dependency timeout.
    pub fn submit(&self, request: OperationRequest) -> Result<OperationHandle, EngineError> {
        let (operation, context_id, user_id) = self.inner.admit(request)?;
        let (reply, receiver) = oneshot::channel();
        let operation_id = operation.operation_id.clone();

        self.inner.events.publish(ExecutionEvent::OperationQueued {
            operation_id: operation_id.clone(),
            name: operation.name.clone(),
            priority: operation.priority,
        });
        self.inner.scheduler.schedule(ScheduledOperation::new(
            operation,
            context_id,
            user_id,
            Dispatch::Background(reply),
        ));

        Ok(OperationHandle {
            operation_id,
            receiver,
        })
    }

    /// Invoke every pending rollback handler of a context, newest first.
    ///
    /// Returns the ids of the operations that were rolled back. Entries whose
    /// handler fails stay on the context's rollback stack.
    pub async fn rollback_context(&self, context_id: &str) -> Result<Vec<String>, EngineError> {
        self.inner.rollback_context(context_id).await
    }

    pub fn get_operation(&self, operation_id: &str) -> Option<Arc<Operation>> {
        self.inner.operations.get(operation_id).map(|op| Arc::clone(&op))
    }

    /// Terminal result of an operation, once it has one.
    pub fn get_result(&self, operation_id: &str) -> Option<OperationResult> {
        self.inner.scheduler.completed_result(operation_id)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Audit entries matching `filter`, most recent first.
    pub fn get_audit_entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.inner.audit.entries(filter)
    }

    pub fn get_stats(&self) -> EngineStats {
        let counters = &self.inner.counters;
        EngineStats {
            system: SystemStats {
                total_operations: counters.total.load(Ordering::Relaxed),
                successful_operations: counters.successful.load(Ordering::Relaxed),
                failed_operations: counters.failed.load(Ordering::Relaxed),
                rolled_back_operations: counters.rolled_back.load(Ordering::Relaxed),
                total_contexts: self.inner.contexts.len(),
                running: self.is_running(),
            },
            validator: self.inner.validator.stats(),
            scheduler: self.inner.scheduler.stats(),
            audit: self.inner.audit.stats(),
            rollback: self.inner.rollback.stats(),
        }
    }

    /// Subscribe to lifecycle events. Slow receivers lag rather than block.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.inner.events.subscribe()
    }

    /// Register custom validators here.
    pub fn validator(&self) -> &OperationValidator {
        &self.inner.validator
    }

    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.inner.rollback
    }

    pub fn scheduler(&self) -> &OperationScheduler {
        &self.inner.scheduler
    }
}

// ---------------------------------------------------------------------------
// EngineInner: admission, contexts and the processing loop
// ---------------------------------------------------------------------------

impl EngineInner {
    fn create_context(
        &self,
        name: &str,
        parent_id: Option<&str>,
        initial_state: Option<StateMap>,
    ) -> Result<ExecutionContext, EngineError> {
        let context = self.contexts.create(name, parent_id, initial_state)?;
        tracing::debug!(
            context_id = %context.context_id,
            name = %context.name,
            depth = context.depth_level,
            "context created"
        );
        self.events.publish(ExecutionEvent::ContextCreated {
            context_id: context.context_id.clone(),
            name: context.name.clone(),
            parent_id: context.parent_id.clone(),
            depth: context.depth_level,
        });
        Ok(context)
    }

    /// Resolve the target context and register the operation.
    ///
    /// Without an explicit context a fresh root context named
    /// `auto-{operation name}` is created.
    fn admit(
        &self,
        request: OperationRequest,
    ) -> Result<(Arc<Operation>, String, Option<String>), EngineError> {
        let context_id = match &request.context_id {
            Some(id) if self.contexts.contains(id) => id.clone(),
            Some(id) => return Err(EngineError::ContextNotFound(id.clone())),
            None => {
                self.create_context(&format!("auto-{}", request.name), None, None)?
                    .context_id
            }
        };
        let user_id = request.user_id.clone();
        let operation = Arc::new(request.build(&self.config));

        self.operations
            .insert(operation.operation_id.clone(), Arc::clone(&operation));
        self.contexts
            .record_operation(&context_id, &operation.operation_id);
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        Ok((operation, context_id, user_id))
    }

    async fn process_loop(self: Arc<Self>, token: CancellationToken) {
        let idle = self.config.loop_idle_interval();
        let default_timeout = self.config.default_timeout();
        let mut tasks = JoinSet::new();

        loop {
            if token.is_cancelled() {
                break;
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "background operation task failed");
                }
            }

            for entry in self.scheduler.take_expired(Instant::now(), default_timeout) {
                let inner = Arc::clone(&self);
                tasks.spawn(async move { inner.expire(entry) });
            }

            if let Some(entry) = self.scheduler.get_next_ready() {
                let inner = Arc::clone(&self);
                tasks.spawn(async move { inner.dispatch(entry).await });
                continue;
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(idle) => {}
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            tracing::debug!(in_flight, "waiting for background operations");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "background operation task failed");
            }
        }
    }

    async fn dispatch(&self, entry: ScheduledOperation) {
        let ScheduledOperation {
            operation,
            context_id,
            user_id,
            dispatch,
            ..
        } = entry;
        let result = self.run(operation, &context_id, user_id.as_deref()).await;
        if let Dispatch::Background(reply) = dispatch {
            let _ = reply.send(Ok(result));
        }
    }

    /// Fail a background entry that outlived its timeout in the queue.
    fn expire(&self, entry: ScheduledOperation) {
        let operation = &entry.operation;
        let error = EngineError::DependencyTimeout {
            waited_ms: entry.enqueued_at.elapsed().as_millis() as u64,
            pending: self.scheduler.pending_dependencies(operation),
        };
        let mut result = OperationResult::new(&operation.operation_id);
        result.fail(error.to_string());

        let result = self.finish(
            operation,
            &entry.context_id,
            entry.user_id.as_deref(),
            result,
            entry.enqueued_at,
        );
        if let Dispatch::Background(reply) = entry.dispatch {
            let _ = reply.send(Ok(result));
        }
    }

    async fn rollback_context(&self, context_id: &str) -> Result<Vec<String>, EngineError> {
        if !self.contexts.contains(context_id) {
            return Err(EngineError::ContextNotFound(context_id.to_string()));
        }

        let mut rolled_back = Vec::new();
        let mut kept = Vec::new();
        for entry in self.contexts.drain_rollback(context_id) {
            match self.compensate(&entry).await {
                Ok(_) => {
                    let operation_id = entry.operation_id.clone();
                    self.scheduler
                        .set_completed_status(&operation_id, OperationStatus::RolledBack);
                    self.contexts.set_result_status(
                        context_id,
                        &operation_id,
                        OperationStatus::RolledBack,
                    );
                    let operation = self.operations.get(&operation_id).map(|op| Arc::clone(&op));
                    if let Some(operation) = operation {
                        let result = self.scheduler.completed_result(&operation_id);
                        self.record_rollback(&operation, context_id, result.as_ref(), None);
                    }
                    rolled_back.push(operation_id);
                }
                Err(error) => {
                    tracing::warn!(
                        context_id = %context_id,
                        operation_id = %entry.operation_id,
                        error = %error,
                        "context rollback step failed"
                    );
                    kept.push(entry);
                }
            }
        }

        // Restore failed entries in their original stack order.
        for entry in kept.into_iter().rev() {
            self.contexts.push_rollback(context_id, entry);
        }

        tracing::info!(
            context_id = %context_id,
            rolled_back = rolled_back.len(),
            remaining = self.contexts.rollback_depth(context_id),
            "context rollback finished"
        );
        Ok(rolled_back)
    }
}
