//! Execution engine for the deep execution system.
//!
//! Components, leaves first:
//! - [`context::ContextStore`]: tree of execution contexts and their rollback stacks.
//! - [`validator::OperationValidator`]: tiered validation plus built-in checks.
//! - [`scheduler::OperationScheduler`]: per-priority FIFO queues with a dependency gate.
//! - [`audit::AuditLogger`]: bounded, redacted, append-only audit trail.
//! - [`rollback::RollbackManager`]: checkpoints and best-effort rollback plans.
//! - [`engine::DeepExecutionEngine`]: the orchestrator wiring all of the above.
//!
//! This crate depends only on `deepexec-types`; configuration loading and
//! tracing setup live in the infra and observe crates.

pub mod audit;
pub mod context;
pub mod engine;
pub mod event;
pub mod handler;
pub mod operation;
pub mod rollback;
pub mod scheduler;
pub mod validator;
