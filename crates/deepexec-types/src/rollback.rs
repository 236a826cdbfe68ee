//! Rollback plan enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status shared by rollback plans and their individual steps.
///
/// `Partial` only applies to plans: some steps succeeded, some failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Partial,
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackStatus::Pending => write!(f, "pending"),
            RollbackStatus::InProgress => write!(f, "in_progress"),
            RollbackStatus::Completed => write!(f, "completed"),
            RollbackStatus::Failed => write!(f, "failed"),
            RollbackStatus::Partial => write!(f, "partial"),
        }
    }
}

/// How much of the recorded state a plan intends to restore.
///
/// The strategy is carried on the plan for callers; step construction does
/// not depend on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStrategy {
    #[default]
    Full,
    Incremental,
    Selective,
    Compensating,
}

impl fmt::Display for RollbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackStrategy::Full => write!(f, "full"),
            RollbackStrategy::Incremental => write!(f, "incremental"),
            RollbackStrategy::Selective => write!(f, "selective"),
            RollbackStrategy::Compensating => write!(f, "compensating"),
        }
    }
}

impl FromStr for RollbackStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(RollbackStrategy::Full),
            "incremental" => Ok(RollbackStrategy::Incremental),
            "selective" => Ok(RollbackStrategy::Selective),
            "compensating" => Ok(RollbackStrategy::Compensating),
            other => Err(format!("invalid rollback strategy: '{other}'")),
        }
    }
}
