//! Operation lifecycle types.
//!
//! An operation moves through `Pending -> Queued -> Validating -> Executing`
//! and ends in `Completed`, `Failed` or `RolledBack`. `Cancelled` exists in the
//! status set but no engine path produces it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validation::ValidationReport;

/// Keyword arguments passed to an operation handler.
pub type Args = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// OperationStatus
// ---------------------------------------------------------------------------

/// Execution status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Queued,
    Validating,
    Executing,
    Completed,
    Failed,
    /// Reserved. Never set by the engine.
    Cancelled,
    RolledBack,
}

impl OperationStatus {
    /// Whether this status ends the operation's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed
                | OperationStatus::Failed
                | OperationStatus::Cancelled
                | OperationStatus::RolledBack
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Queued => "queued",
            OperationStatus::Validating => "validating",
            OperationStatus::Executing => "executing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
            OperationStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OperationStatus::Pending),
            "queued" => Ok(OperationStatus::Queued),
            "validating" => Ok(OperationStatus::Validating),
            "executing" => Ok(OperationStatus::Executing),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            "cancelled" => Ok(OperationStatus::Cancelled),
            "rolled_back" => Ok(OperationStatus::RolledBack),
            other => Err(format!("invalid operation status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// OperationPriority
// ---------------------------------------------------------------------------

/// Scheduling class. Variant order is urgency order: `Critical` sorts first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OperationPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
    Background,
}

impl OperationPriority {
    /// All classes, most urgent first.
    pub const ALL: [OperationPriority; 5] = [
        OperationPriority::Critical,
        OperationPriority::High,
        OperationPriority::Normal,
        OperationPriority::Low,
        OperationPriority::Background,
    ];

    /// Numeric rank, 1 (critical) through 5 (background).
    pub fn rank(&self) -> u8 {
        match self {
            OperationPriority::Critical => 1,
            OperationPriority::High => 2,
            OperationPriority::Normal => 3,
            OperationPriority::Low => 4,
            OperationPriority::Background => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationPriority::Critical => "critical",
            OperationPriority::High => "high",
            OperationPriority::Normal => "normal",
            OperationPriority::Low => "low",
            OperationPriority::Background => "background",
        }
    }
}

impl fmt::Display for OperationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(OperationPriority::Critical),
            "high" => Ok(OperationPriority::High),
            "normal" => Ok(OperationPriority::Normal),
            "low" => Ok(OperationPriority::Low),
            "background" => Ok(OperationPriority::Background),
            other => Err(format!("invalid operation priority: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationLevel
// ---------------------------------------------------------------------------

/// Validation depth. Levels are cumulative: `Deep` also runs `Shallow` and
/// `Standard` validators.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    /// Basic parameter validation.
    Shallow,
    /// Standard validation with type checking.
    #[default]
    Standard,
    /// Deep validation with dependency checks.
    Deep,
    /// Full validation with external verification.
    Strict,
}

impl ValidationLevel {
    pub const ALL: [ValidationLevel; 4] = [
        ValidationLevel::Shallow,
        ValidationLevel::Standard,
        ValidationLevel::Deep,
        ValidationLevel::Strict,
    ];

    /// Every level at or below `self`, shallowest first.
    pub fn cumulative(self) -> impl Iterator<Item = ValidationLevel> {
        Self::ALL.into_iter().filter(move |level| *level <= self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Shallow => "shallow",
            ValidationLevel::Standard => "standard",
            ValidationLevel::Deep => "deep",
            ValidationLevel::Strict => "strict",
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shallow" => Ok(ValidationLevel::Shallow),
            "standard" => Ok(ValidationLevel::Standard),
            "deep" => Ok(ValidationLevel::Deep),
            "strict" => Ok(ValidationLevel::Strict),
            other => Err(format!("invalid validation level: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionDepth
// ---------------------------------------------------------------------------

/// Execution depth hint carried by an operation and recorded in audit metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionDepth {
    Surface,
    Intermediate,
    #[default]
    Deep,
    Recursive,
}

impl fmt::Display for ExecutionDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionDepth::Surface => write!(f, "surface"),
            ExecutionDepth::Intermediate => write!(f, "intermediate"),
            ExecutionDepth::Deep => write!(f, "deep"),
            ExecutionDepth::Recursive => write!(f, "recursive"),
        }
    }
}

// ---------------------------------------------------------------------------
// OperationResult
// ---------------------------------------------------------------------------

/// Outcome of executing one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: String,
    pub status: OperationStatus,
    /// Handler output, present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: f64,
    /// Diagnostics from the validation phase, when it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    /// Id of the terminal `execute_complete` (or `validation_failed`) entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_entry_id: Option<String>,
    pub rollback_available: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl OperationResult {
    /// A fresh `Pending` result for the given operation.
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            status: OperationStatus::Pending,
            output: None,
            error: None,
            duration_ms: 0.0,
            validation: None,
            audit_entry_id: None,
            rollback_available: false,
            metadata: HashMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Completed
    }

    /// Set a terminal failure with a human-readable message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = OperationStatus::Failed;
        self.output = None;
        self.error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_fromstr_roundtrip() {
        for status in [
            OperationStatus::Pending,
            OperationStatus::Queued,
            OperationStatus::Validating,
            OperationStatus::Executing,
            OperationStatus::Completed,
            OperationStatus::Failed,
            OperationStatus::Cancelled,
            OperationStatus::RolledBack,
        ] {
            let parsed: OperationStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("exploded".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(OperationStatus::Completed.is_terminal());
        assert!(OperationStatus::RolledBack.is_terminal());
        assert!(!OperationStatus::Executing.is_terminal());
        assert!(!OperationStatus::Queued.is_terminal());
    }

    #[test]
    fn priority_orders_critical_first() {
        let mut shuffled = vec![
            OperationPriority::Low,
            OperationPriority::Critical,
            OperationPriority::Background,
            OperationPriority::Normal,
            OperationPriority::High,
        ];
        shuffled.sort();
        assert_eq!(shuffled, OperationPriority::ALL.to_vec());
        assert_eq!(OperationPriority::Critical.rank(), 1);
        assert_eq!(OperationPriority::Background.rank(), 5);
        assert_eq!(OperationPriority::default(), OperationPriority::Normal);
    }

    #[test]
    fn validation_levels_are_cumulative() {
        let shallow: Vec<_> = ValidationLevel::Shallow.cumulative().collect();
        assert_eq!(shallow, vec![ValidationLevel::Shallow]);

        let deep: Vec<_> = ValidationLevel::Deep.cumulative().collect();
        assert_eq!(
            deep,
            vec![
                ValidationLevel::Shallow,
                ValidationLevel::Standard,
                ValidationLevel::Deep
            ]
        );
        assert_eq!(ValidationLevel::Strict.cumulative().count(), 4);
    }

    #[test]
    fn result_serializes_snake_case_status() {
        let mut result = OperationResult::new("op-1");
        result.status = OperationStatus::RolledBack;
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "rolled_back");
        assert!(json.get("output").is_none());
    }

    #[test]
    fn fail_clears_output() {
        let mut result = OperationResult::new("op-1");
        result.output = Some(serde_json::json!(42));
        result.fail("boom");
        assert_eq!(result.status, OperationStatus::Failed);
        assert!(result.output.is_none());
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
