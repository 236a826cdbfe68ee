//! Audit trail records.
//!
//! Entries are built once by the audit logger and never mutated afterwards.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::operation::{ExecutionDepth, OperationPriority, OperationStatus, ValidationLevel};

/// Lifecycle point an entry was recorded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ValidationFailed,
    ExecuteStart,
    ExecuteComplete,
    Rollback,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditAction::ValidationFailed => write!(f, "validation_failed"),
            AuditAction::ExecuteStart => write!(f, "execute_start"),
            AuditAction::ExecuteComplete => write!(f, "execute_complete"),
            AuditAction::Rollback => write!(f, "rollback"),
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "validation_failed" => Ok(AuditAction::ValidationFailed),
            "execute_start" => Ok(AuditAction::ExecuteStart),
            "execute_complete" => Ok(AuditAction::ExecuteComplete),
            "rollback" => Ok(AuditAction::Rollback),
            other => Err(format!("invalid audit action: '{other}'")),
        }
    }
}

/// Compact description of an operation result. Never contains the output itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSummary {
    pub status: OperationStatus,
    pub has_output: bool,
    pub has_error: bool,
    pub duration_ms: f64,
}

/// Operation attributes copied into every entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub priority: OperationPriority,
    pub validation_level: ValidationLevel,
    pub execution_depth: ExecutionDepth,
    pub context_depth: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub operation_id: String,
    pub context_id: String,
    pub operation_name: String,
    pub action: AuditAction,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Redacted view of the operation arguments.
    #[serde(default)]
    pub input_summary: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<OutputSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: AuditMetadata,
}

/// Query over the audit log. Every `Some` field must match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditFilter {
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub context_id: Option<String>,
    #[serde(default)]
    pub status: Option<OperationStatus>,
    #[serde(default)]
    pub action: Option<AuditAction>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            operation_id: None,
            context_id: None,
            status: None,
            action: None,
            limit: default_limit(),
        }
    }
}

impl AuditFilter {
    pub fn for_operation(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: Some(operation_id.into()),
            ..Self::default()
        }
    }

    pub fn for_context(context_id: impl Into<String>) -> Self {
        Self {
            context_id: Some(context_id.into()),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_status(mut self, status: OperationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.operation_id
            .as_ref()
            .is_none_or(|id| *id == entry.operation_id)
            && self
                .context_id
                .as_ref()
                .is_none_or(|id| *id == entry.context_id)
            && self.status.is_none_or(|status| status == entry.status)
            && self.action.is_none_or(|action| action == entry.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(operation_id: &str, action: AuditAction, status: OperationStatus) -> AuditEntry {
        AuditEntry {
            entry_id: "audit-000000000001".into(),
            operation_id: operation_id.into(),
            context_id: "ctx-1".into(),
            operation_name: "deploy".into(),
            action,
            status,
            user_id: None,
            input_summary: Map::new(),
            output_summary: None,
            error_details: None,
            duration_ms: 0.0,
            timestamp: Utc::now(),
            metadata: AuditMetadata {
                priority: OperationPriority::Normal,
                validation_level: ValidationLevel::Standard,
                execution_depth: ExecutionDepth::Deep,
                context_depth: 0,
            },
        }
    }

    #[test]
    fn test_audit_action_roundtrip() {
        for action in [
            AuditAction::ValidationFailed,
            AuditAction::ExecuteStart,
            AuditAction::ExecuteComplete,
            AuditAction::Rollback,
        ] {
            let parsed: AuditAction = action.to_string().parse().unwrap();
            assert_eq!(parsed, action);
        }
    }

    #[test]
    fn test_filter_defaults_match_everything() {
        let filter = AuditFilter::default();
        assert_eq!(filter.limit, 100);
        assert!(filter.matches(&entry(
            "op-1",
            AuditAction::ExecuteStart,
            OperationStatus::Executing
        )));
    }

    #[test]
    fn test_filter_combines_fields() {
        let filter = AuditFilter::for_operation("op-1").with_action(AuditAction::ExecuteComplete);
        assert!(filter.matches(&entry(
            "op-1",
            AuditAction::ExecuteComplete,
            OperationStatus::Completed
        )));
        assert!(!filter.matches(&entry(
            "op-1",
            AuditAction::ExecuteStart,
            OperationStatus::Executing
        )));
        assert!(!filter.matches(&entry(
            "op-2",
            AuditAction::ExecuteComplete,
            OperationStatus::Completed
        )));

        let by_status = AuditFilter::default().with_status(OperationStatus::Failed);
        assert!(!by_status.matches(&entry(
            "op-1",
            AuditAction::ExecuteComplete,
            OperationStatus::Completed
        )));
    }
}
