//! Lifecycle events broadcast by the engine.
//!
//! `ExecutionEvent` is Clone + Send + Sync so it can travel over a tokio
//! broadcast channel to any number of subscribers.

use serde::{Deserialize, Serialize};

use crate::operation::{OperationPriority, OperationStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A context was registered in the store.
    ContextCreated {
        context_id: String,
        name: String,
        parent_id: Option<String>,
        depth: u32,
    },

    /// A context was marked complete.
    ContextCompleted { context_id: String },

    /// An operation entered a scheduler queue.
    OperationQueued {
        operation_id: String,
        name: String,
        priority: OperationPriority,
    },

    /// An attempt entered the handler phase.
    OperationStarted {
        operation_id: String,
        name: String,
        context_id: String,
        attempt: u32,
    },

    /// An operation finished with `Completed`.
    OperationCompleted {
        operation_id: String,
        context_id: String,
        duration_ms: f64,
    },

    /// An operation finished with `Failed`.
    OperationFailed {
        operation_id: String,
        context_id: String,
        error: String,
    },

    /// A rollback handler restored the effects of an operation.
    OperationRolledBack {
        operation_id: String,
        context_id: String,
    },
}

impl ExecutionEvent {
    /// Terminal status implied by this event, if any.
    pub fn terminal_status(&self) -> Option<OperationStatus> {
        match self {
            ExecutionEvent::OperationCompleted { .. } => Some(OperationStatus::Completed),
            ExecutionEvent::OperationFailed { .. } => Some(OperationStatus::Failed),
            ExecutionEvent::OperationRolledBack { .. } => Some(OperationStatus::RolledBack),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ExecutionEvent::OperationQueued {
            operation_id: "op-1".into(),
            name: "migrate".into(),
            priority: OperationPriority::High,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "operation_queued");
        assert_eq!(json["priority"], "high");
    }

    #[test]
    fn test_terminal_status() {
        let event = ExecutionEvent::OperationRolledBack {
            operation_id: "op-1".into(),
            context_id: "ctx-1".into(),
        };
        assert_eq!(event.terminal_status(), Some(OperationStatus::RolledBack));
        let event = ExecutionEvent::ContextCompleted {
            context_id: "ctx-1".into(),
        };
        assert_eq!(event.terminal_status(), None);
    }
}
