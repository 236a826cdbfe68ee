//! Operations and the request builder used to submit them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use deepexec_types::config::EngineConfig;
use deepexec_types::id;
use deepexec_types::operation::{Args, ExecutionDepth, OperationPriority, ValidationLevel};
use serde_json::Value;

use crate::handler::BoxHandler;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// An executable unit of work.
///
/// Immutable once built, apart from the retry counter.
#[derive(Debug)]
pub struct Operation {
    pub operation_id: String,
    pub name: String,
    pub handler: BoxHandler,
    pub args: Args,
    pub priority: OperationPriority,
    pub validation_level: ValidationLevel,
    pub execution_depth: ExecutionDepth,
    /// Operation ids that must complete successfully first.
    pub dependencies: Vec<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub rollback_handler: Option<BoxHandler>,
    pub created_at: DateTime<Utc>,
    pub metadata: HashMap<String, Value>,
    retry_count: AtomicU32,
}

impl Operation {
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    /// The timeout to enforce. Zero falls back to `default`.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        if self.timeout.is_zero() {
            default
        } else {
            self.timeout
        }
    }

    /// Increment the retry counter, returning the new value.
    pub fn record_retry(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn has_rollback(&self) -> bool {
        self.rollback_handler.is_some()
    }
}

// ---------------------------------------------------------------------------
// OperationRequest
// ---------------------------------------------------------------------------

/// Builder for an operation submission.
///
/// Fields left unset fall back to the engine configuration when the request
/// is turned into an [`Operation`].
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub name: String,
    pub handler: BoxHandler,
    pub operation_id: Option<String>,
    pub args: Args,
    pub context_id: Option<String>,
    pub user_id: Option<String>,
    pub priority: OperationPriority,
    pub validation_level: ValidationLevel,
    pub execution_depth: ExecutionDepth,
    pub dependencies: Vec<String>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub rollback_handler: Option<BoxHandler>,
    pub metadata: HashMap<String, Value>,
}

impl OperationRequest {
    pub fn new(name: impl Into<String>, handler: BoxHandler) -> Self {
        Self {
            name: name.into(),
            handler,
            operation_id: None,
            args: Args::new(),
            context_id: None,
            user_id: None,
            priority: OperationPriority::default(),
            validation_level: ValidationLevel::default(),
            execution_depth: ExecutionDepth::default(),
            dependencies: Vec::new(),
            timeout: None,
            max_retries: None,
            rollback_handler: None,
            metadata: HashMap::new(),
        }
    }

    /// Use a caller-chosen id instead of a generated one.
    pub fn with_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }

    pub fn in_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn priority(mut self, priority: OperationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn validation_level(mut self, level: ValidationLevel) -> Self {
        self.validation_level = level;
        self
    }

    pub fn execution_depth(mut self, depth: ExecutionDepth) -> Self {
        self.execution_depth = depth;
        self
    }

    pub fn depends_on(mut self, operation_id: impl Into<String>) -> Self {
        self.dependencies.push(operation_id.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn rollback(mut self, handler: BoxHandler) -> Self {
        self.rollback_handler = Some(handler);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build the operation, filling unset fields from `config`.
    pub fn build(self, config: &EngineConfig) -> Operation {
        Operation {
            operation_id: self.operation_id.unwrap_or_else(id::operation_id),
            name: self.name,
            handler: self.handler,
            args: self.args,
            priority: self.priority,
            validation_level: self.validation_level,
            execution_depth: self.execution_depth,
            dependencies: self.dependencies,
            timeout: self.timeout.unwrap_or_else(|| config.default_timeout()),
            max_retries: self.max_retries.unwrap_or(config.default_max_retries),
            rollback_handler: self.rollback_handler,
            created_at: Utc::now(),
            metadata: self.metadata,
            retry_count: AtomicU32::new(0),
        }
    }
}
