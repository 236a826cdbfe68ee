//! Shared domain types for the deep execution engine.
//!
//! This crate contains the records that flow through the engine: operation
//! status and results, execution contexts, validation reports, audit entries,
//! rollback enums, lifecycle events, statistics and the engine configuration.
//!
//! Zero runtime dependencies -- only serde, uuid, chrono, thiserror.

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod id;
pub mod operation;
pub mod rollback;
pub mod stats;
pub mod validation;
