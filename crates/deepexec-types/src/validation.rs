//! Validation report types produced by the operation validator.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::operation::ValidationLevel;

/// Level tag attached to a single check.
///
/// Custom validators are tagged with the level they were registered under;
/// the always-on structural checks are tagged `Builtin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckLevel {
    Shallow,
    Standard,
    Deep,
    Strict,
    Builtin,
}

impl From<ValidationLevel> for CheckLevel {
    fn from(level: ValidationLevel) -> Self {
        match level {
            ValidationLevel::Shallow => CheckLevel::Shallow,
            ValidationLevel::Standard => CheckLevel::Standard,
            ValidationLevel::Deep => CheckLevel::Deep,
            ValidationLevel::Strict => CheckLevel::Strict,
        }
    }
}

impl fmt::Display for CheckLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckLevel::Shallow => write!(f, "shallow"),
            CheckLevel::Standard => write!(f, "standard"),
            CheckLevel::Deep => write!(f, "deep"),
            CheckLevel::Strict => write!(f, "strict"),
            CheckLevel::Builtin => write!(f, "builtin"),
        }
    }
}

/// One recorded check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub level: CheckLevel,
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Verdict returned by a custom validator.
///
/// `name` falls back to the validator's registration index when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckOutcome {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            valid: true,
            name: Some(name.into()),
            error: None,
        }
    }

    pub fn fail(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            name: Some(name.into()),
            error: Some(error.into()),
        }
    }
}

/// Full diagnostics for one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub level: ValidationLevel,
    #[serde(default)]
    pub checks: Vec<ValidationCheck>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// An empty, passing report for `level`.
    pub fn new(level: ValidationLevel) -> Self {
        Self {
            valid: true,
            level,
            checks: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Record a passing check.
    pub fn pass(&mut self, level: CheckLevel, name: impl Into<String>) {
        self.checks.push(ValidationCheck {
            level,
            name: name.into(),
            passed: true,
            error: None,
        });
    }

    /// Record a failing check. Marks the whole report invalid.
    pub fn fail(&mut self, level: CheckLevel, name: impl Into<String>, error: impl Into<String>) {
        let error = error.into();
        self.checks.push(ValidationCheck {
            level,
            name: name.into(),
            passed: false,
            error: Some(error.clone()),
        });
        self.errors.push(error);
        self.valid = false;
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Errors joined with `"; "`, the form used in operation results.
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_marks_report_invalid() {
        let mut report = ValidationReport::new(ValidationLevel::Deep);
        report.pass(CheckLevel::Shallow, "has_args");
        assert!(report.valid);

        report.fail(CheckLevel::Builtin, "context_depth", "too deep");
        report.fail(CheckLevel::Deep, "quota", "over quota");
        assert!(!report.valid);
        assert_eq!(report.checks.len(), 3);
        assert_eq!(report.error_summary(), "too deep; over quota");
    }

    #[test]
    fn test_warnings_do_not_invalidate() {
        let mut report = ValidationReport::new(ValidationLevel::Shallow);
        report.warn("slow validator");
        assert!(report.valid);
        assert_eq!(report.warnings, vec!["slow validator".to_string()]);
    }

    #[test]
    fn test_check_level_from_validation_level() {
        assert_eq!(CheckLevel::from(ValidationLevel::Strict), CheckLevel::Strict);
        assert_eq!(CheckLevel::Builtin.to_string(), "builtin");
    }

    #[test]
    fn test_check_outcome_deserializes_without_name() {
        let outcome: CheckOutcome = serde_json::from_str(r#"{"valid": false}"#).unwrap();
        assert!(!outcome.valid);
        assert!(outcome.name.is_none());
    }
}
