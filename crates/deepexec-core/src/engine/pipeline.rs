//! The per-operation execution pipeline.
//!
//! dependency gate -> (validate -> execute)* -> auto-rollback -> finish
//!
//! A handler error bumps `retry_count`; the operation runs again while the
//! count is below `max_retries`, so `max_retries` caps the total number of
//! attempts. Validation failures and timeouts are not retried. Every run ends in `finish`, which writes the single
//! `execute_complete` audit entry and records the terminal result.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use deepexec_types::audit::AuditAction;
use deepexec_types::context::ExecutionContext;
use deepexec_types::error::EngineError;
use deepexec_types::event::ExecutionEvent;
use deepexec_types::operation::{OperationResult, OperationStatus};
use deepexec_types::rollback::RollbackStrategy;
use futures_util::FutureExt;
use serde_json::{Value, json};
use tokio::time::Instant;

use super::EngineInner;
use crate::context::RollbackStackEntry;
use crate::handler::BoxHandler;
use crate::operation::Operation;
use crate::rollback::CheckpointRequest;
use crate::scheduler::{Dispatch, ScheduledOperation};
use crate::validator::panic_message;

const MIN_POLL: Duration = Duration::from_millis(1);

impl EngineInner {
    /// Drive one admitted operation to a terminal status.
    pub(super) async fn run(
        &self,
        operation: Arc<Operation>,
        context_id: &str,
        user_id: Option<&str>,
    ) -> OperationResult {
        let started = Instant::now();
        let op = operation.as_ref();
        let mut result = OperationResult::new(&op.operation_id);
        let timeout = op.effective_timeout(self.config.default_timeout());

        if !self.scheduler.can_execute(op) {
            result.status = OperationStatus::Queued;
            if let Err(error) = self
                .await_dependencies(&operation, context_id, user_id, timeout)
                .await
            {
                result.fail(error.to_string());
                return self.finish(op, context_id, user_id, result, started);
            }
        }

        let mut handler_ran = false;
        loop {
            let Some(context) = self.contexts.get(context_id) else {
                result.fail(EngineError::ContextNotFound(context_id.to_string()).to_string());
                break;
            };

            if self.config.enable_deep_validation {
                result.status = OperationStatus::Validating;
                let report = self.validator.validate(op, &context).await;
                let valid = report.valid;
                let summary = report.error_summary();
                result.validation = Some(report);

                if !valid {
                    result.fail(EngineError::ValidationFailed(summary).to_string());
                    if self.config.enable_audit_logging {
                        self.audit.log(
                            op,
                            &context,
                            AuditAction::ValidationFailed,
                            OperationStatus::Failed,
                            Some(&result),
                            user_id,
                        );
                    }
                    break;
                }
            }

            let attempt = op.retry_count() + 1;
            result.status = OperationStatus::Executing;
            self.scheduler.mark_running(&op.operation_id);
            if self.config.enable_audit_logging {
                self.audit.log(
                    op,
                    &context,
                    AuditAction::ExecuteStart,
                    OperationStatus::Executing,
                    None,
                    user_id,
                );
            }
            self.events.publish(ExecutionEvent::OperationStarted {
                operation_id: op.operation_id.clone(),
                name: op.name.clone(),
                context_id: context_id.to_string(),
                attempt,
            });

            if !result.rollback_available {
                if let Some(handler) = &op.rollback_handler {
                    self.register_rollback(op, &context, handler.clone());
                    result.rollback_available = true;
                }
            }

            handler_ran = true;
            match self.invoke(op, timeout).await {
                Ok(output) => {
                    result.status = OperationStatus::Completed;
                    result.output = Some(output);
                    result.error = None;
                    break;
                }
                Err(EngineError::HandlerFailed(message)) => {
                    let retries = op.record_retry();
                    if retries >= op.max_retries {
                        result.fail(EngineError::HandlerFailed(message).to_string());
                        break;
                    }
                    tracing::warn!(
                        operation_id = %op.operation_id,
                        attempt,
                        retries,
                        max_retries = op.max_retries,
                        error = %message,
                        "operation attempt failed, retrying"
                    );
                    result.error = Some(message);
                }
                Err(error) => {
                    result.fail(error.to_string());
                    break;
                }
            }
        }

        if result.status == OperationStatus::Failed
            && handler_ran
            && self.config.enable_auto_rollback
            && op.has_rollback()
        {
            self.auto_rollback(op, context_id, user_id, &mut result).await;
        }

        self.finish(op, context_id, user_id, result, started)
    }

    /// Park the operation in its priority queue and poll the dependency gate
    /// with exponential backoff until it opens or `timeout` elapses.
    async fn await_dependencies(
        &self,
        operation: &Arc<Operation>,
        context_id: &str,
        user_id: Option<&str>,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        self.scheduler.schedule(ScheduledOperation::new(
            Arc::clone(operation),
            context_id,
            user_id.map(str::to_string),
            Dispatch::Caller,
        ));
        self.events.publish(ExecutionEvent::OperationQueued {
            operation_id: operation.operation_id.clone(),
            name: operation.name.clone(),
            priority: operation.priority,
        });

        let factor = self.config.dependency_poll_factor;
        let factor = if factor.is_finite() && factor >= 1.0 {
            factor
        } else {
            1.0
        };
        let ceiling = self.config.dependency_poll_max().max(MIN_POLL);
        let mut delay = self.config.dependency_poll_initial().clamp(MIN_POLL, ceiling);

        let waiting_since = Instant::now();
        let deadline = waiting_since + timeout;
        let outcome = loop {
            if self.scheduler.can_execute(operation) {
                break Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                break Err(EngineError::DependencyTimeout {
                    waited_ms: now.duration_since(waiting_since).as_millis() as u64,
                    pending: self.scheduler.pending_dependencies(operation),
                });
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = delay.mul_f64(factor).min(ceiling);
        };

        self.scheduler.withdraw(&operation.operation_id);
        if let Err(error) = &outcome {
            tracing::warn!(
                operation_id = %operation.operation_id,
                error = %error,
                "dependencies did not complete in time"
            );
        }
        outcome
    }

    /// Invoke the handler under a concurrency permit and the timeout.
    async fn invoke(&self, op: &Operation, timeout: Duration) -> Result<Value, EngineError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EngineError::EngineStopped)?;

        let call = AssertUnwindSafe(op.handler.invoke(op.args.clone())).catch_unwind();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(EngineError::HandlerFailed(e.to_string())),
            Ok(Err(panic)) => Err(EngineError::HandlerFailed(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(EngineError::ExecutionTimeout {
                timeout_secs: timeout.as_secs_f64(),
            }),
        }
    }

    /// Checkpoint the context state and push the compensating action.
    fn register_rollback(&self, op: &Operation, context: &ExecutionContext, handler: BoxHandler) {
        let checkpoint = self.rollback.create_checkpoint(
            CheckpointRequest::new(format!("before {}", op.name), context.state.clone())
                .description(format!(
                    "State of {} before {}",
                    context.context_id, op.operation_id
                ))
                .execution(&context.context_id)
                .step(&op.operation_id)
                .handler(handler.clone(), op.args.clone()),
        );
        self.contexts.push_rollback(
            &context.context_id,
            RollbackStackEntry {
                operation_id: op.operation_id.clone(),
                handler,
                args: op.args.clone(),
                checkpoint_id: Some(checkpoint.id),
            },
        );
    }

    async fn auto_rollback(
        &self,
        op: &Operation,
        context_id: &str,
        user_id: Option<&str>,
        result: &mut OperationResult,
    ) {
        let Some(entry) = self.contexts.remove_rollback(context_id, &op.operation_id) else {
            return;
        };

        match self.compensate(&entry).await {
            Ok(plan_id) => {
                result.status = OperationStatus::RolledBack;
                if let Some(plan_id) = plan_id {
                    result
                        .metadata
                        .insert("rollback_plan_id".to_string(), json!(plan_id));
                }
                tracing::info!(
                    operation_id = %op.operation_id,
                    context_id = %context_id,
                    "operation rolled back"
                );
                self.record_rollback(op, context_id, Some(&*result), user_id);
            }
            Err(error) => {
                tracing::warn!(
                    operation_id = %op.operation_id,
                    context_id = %context_id,
                    error = %error,
                    "automatic rollback failed"
                );
                self.contexts.push_rollback(context_id, entry);
            }
        }
    }

    /// Run a compensating action.
    ///
    /// Goes through the rollback manager when the entry's checkpoint still
    /// exists, returning the plan id, and calls the handler directly
    /// otherwise. The checkpoint is deleted once it has been applied.
    pub(super) async fn compensate(
        &self,
        entry: &RollbackStackEntry,
    ) -> Result<Option<String>, EngineError> {
        if let Some(checkpoint_id) = &entry.checkpoint_id {
            if self.rollback.get_checkpoint(checkpoint_id).is_some() {
                let plan = self
                    .rollback
                    .rollback_to_checkpoint(checkpoint_id, RollbackStrategy::Compensating)
                    .await;
                if !plan.is_success() {
                    return Err(EngineError::RollbackFailed(plan.errors.join("; ")));
                }
                self.rollback.delete_checkpoint(checkpoint_id);
                return Ok(Some(plan.id));
            }
        }

        let call = AssertUnwindSafe(entry.handler.invoke(entry.args.clone())).catch_unwind();
        match call.await {
            Ok(Ok(_)) => Ok(None),
            Ok(Err(e)) => Err(EngineError::RollbackFailed(e.to_string())),
            Err(panic) => Err(EngineError::RollbackFailed(format!(
                "rollback handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Audit, count and announce a successful rollback.
    pub(super) fn record_rollback(
        &self,
        op: &Operation,
        context_id: &str,
        result: Option<&OperationResult>,
        user_id: Option<&str>,
    ) {
        if self.config.enable_audit_logging {
            if let Some(context) = self.contexts.get(context_id) {
                self.audit.log(
                    op,
                    &context,
                    AuditAction::Rollback,
                    OperationStatus::RolledBack,
                    result,
                    user_id,
                );
            }
        }
        self.counters.rolled_back.fetch_add(1, Ordering::Relaxed);
        self.events.publish(ExecutionEvent::OperationRolledBack {
            operation_id: op.operation_id.clone(),
            context_id: context_id.to_string(),
        });
    }

    /// Stamp the duration, write the `execute_complete` entry and record the
    /// terminal result everywhere it is looked up.
    pub(super) fn finish(
        &self,
        op: &Operation,
        context_id: &str,
        user_id: Option<&str>,
        mut result: OperationResult,
        started: Instant,
    ) -> OperationResult {
        result.duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        if self.config.enable_audit_logging {
            if let Some(context) = self.contexts.get(context_id) {
                let entry_id = self.audit.log(
                    op,
                    &context,
                    AuditAction::ExecuteComplete,
                    result.status,
                    Some(&result),
                    user_id,
                );
                result.audit_entry_id = Some(entry_id);
            }
        }

        self.scheduler
            .mark_completed(&op.operation_id, result.clone());
        self.contexts.store_result(context_id, result.clone());

        match result.status {
            OperationStatus::Completed => {
                self.counters.successful.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    operation_id = %op.operation_id,
                    name = %op.name,
                    duration_ms = result.duration_ms,
                    retries = op.retry_count(),
                    "operation completed"
                );
                self.events.publish(ExecutionEvent::OperationCompleted {
                    operation_id: op.operation_id.clone(),
                    context_id: context_id.to_string(),
                    duration_ms: result.duration_ms,
                });
            }
            // Counted and announced by `record_rollback`.
            OperationStatus::RolledBack => {}
            _ => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                let error = result.error.clone().unwrap_or_default();
                tracing::warn!(
                    operation_id = %op.operation_id,
                    name = %op.name,
                    duration_ms = result.duration_ms,
                    error = %error,
                    "operation failed"
                );
                self.events.publish(ExecutionEvent::OperationFailed {
                    operation_id: op.operation_id.clone(),
                    context_id: context_id.to_string(),
                    error,
                });
            }
        }

        result
    }
}
