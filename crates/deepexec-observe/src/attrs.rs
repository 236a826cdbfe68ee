//! Span and event field names.
//!
//! The engine logs with these names as structured fields
//! (`operation_id = %id`). Spans that fill fields after creation declare them
//! as `tracing::field::Empty` and record them through these constants.

/// Operation identifier (`op-…`).
pub const OPERATION_ID: &str = "operation_id";

/// Operation display name.
pub const OPERATION_NAME: &str = "name";

/// Execution context identifier (`ctx-…`).
pub const CONTEXT_ID: &str = "context_id";

/// Terminal or current operation status, snake_case.
pub const STATUS: &str = "status";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Audit entry identifier (`audit-…`).
pub const AUDIT_ENTRY_ID: &str = "entry_id";

/// Rollback plan identifier.
pub const PLAN_ID: &str = "plan_id";

/// Tracer name registered with OpenTelemetry.
pub const TRACER_NAME: &str = "deepexec";
