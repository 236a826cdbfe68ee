use thiserror::Error;

/// Errors raised by the execution engine.
///
/// Only `ContextDepthExceeded`, `ContextNotFound` and `EngineStopped` reach
/// callers as `Err`. The rest are rendered into `OperationResult::error`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Carries the validator errors joined with `"; "`.
    #[error("{0}")]
    ValidationFailed(String),

    #[error("Dependency timeout after {waited_ms}ms waiting on [{}]", .pending.join(", "))]
    DependencyTimeout { waited_ms: u64, pending: Vec<String> },

    #[error("Operation timed out after {timeout_secs}s")]
    ExecutionTimeout { timeout_secs: f64 },

    #[error("{0}")]
    HandlerFailed(String),

    #[error("Max context depth {max} exceeded")]
    ContextDepthExceeded { max: u32 },

    #[error("context not found: {0}")]
    ContextNotFound(String),

    #[error("rollback failed: {0}")]
    RollbackFailed(String),

    #[error("engine stopped")]
    EngineStopped,
}
