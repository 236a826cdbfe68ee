//! Checkpoints and rollback plans.
//!
//! A checkpoint snapshots a context's typed state, optionally together with a
//! compensating handler. Rolling back builds a plan of steps from one or more
//! checkpoints and runs them best-effort: a failing step is recorded and the
//! remaining steps still run.

pub mod checkpoint;
pub mod manager;
pub mod plan;

pub use checkpoint::{Checkpoint, CheckpointRequest};
pub use manager::RollbackManager;
pub use plan::{RollbackPlan, RollbackStep, StepDefinition};
