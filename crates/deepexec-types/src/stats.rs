//! Statistics snapshots reported by each engine component.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::operation::OperationPriority;

/// Orchestrator-level counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub rolled_back_operations: u64,
    pub total_contexts: usize,
    pub running: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorStats {
    pub validations_performed: u64,
    pub validations_passed: u64,
    pub validations_failed: u64,
    pub registered_validators: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Pending entries per priority class.
    pub queue_sizes: BTreeMap<OperationPriority, usize>,
    pub running: usize,
    pub completed: usize,
    pub total_scheduled: u64,
    pub total_completed: u64,
    pub total_failed: u64,
}

impl SchedulerStats {
    pub fn total_queued(&self) -> usize {
        self.queue_sizes.values().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub entries_logged: u64,
    pub entries_trimmed: u64,
    pub current_entries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStats {
    pub total_checkpoints: usize,
    pub total_rollbacks: u64,
    pub successful_rollbacks: u64,
    pub failed_rollbacks: u64,
}

/// Aggregate returned by `DeepExecutionEngine::get_stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub system: SystemStats,
    pub validator: ValidatorStats,
    pub scheduler: SchedulerStats,
    pub audit: AuditStats,
    pub rollback: RollbackStats,
}
