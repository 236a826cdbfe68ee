//! Engine configuration.
//!
//! `EngineConfig` maps onto `deepexec.toml`. Every field has a default, so an
//! empty file (or no file at all) yields a working engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a `DeepExecutionEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Display name used in logs and the CLI.
    #[serde(default = "default_name")]
    pub name: String,

    /// Permits in the handler pool.
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,

    /// Deepest allowed context level. Roots are level 0.
    #[serde(default = "default_max_context_depth")]
    pub max_context_depth: u32,

    /// Timeout applied to operations that do not set their own.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Invoke rollback handlers when an operation fails after running.
    #[serde(default = "default_true")]
    pub enable_auto_rollback: bool,

    /// Run the validator before each attempt.
    #[serde(default = "default_true")]
    pub enable_deep_validation: bool,

    #[serde(default = "default_true")]
    pub enable_audit_logging: bool,

    /// Maximum audit entries kept in memory.
    #[serde(default = "default_audit_retention_count")]
    pub audit_retention_count: usize,

    /// Bound on each custom validator call.
    #[serde(default = "default_validation_timeout_ms")]
    pub validation_timeout_ms: u64,

    /// First dependency poll delay.
    #[serde(default = "default_dependency_poll_initial_ms")]
    pub dependency_poll_initial_ms: u64,

    /// Growth factor between dependency polls.
    #[serde(default = "default_dependency_poll_factor")]
    pub dependency_poll_factor: f64,

    /// Ceiling on the dependency poll delay.
    #[serde(default = "default_dependency_poll_max_ms")]
    pub dependency_poll_max_ms: u64,

    /// Sleep of the background loop when nothing is ready.
    #[serde(default = "default_loop_idle_interval_ms")]
    pub loop_idle_interval_ms: u64,

    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_name() -> String {
    "deepexec".to_string()
}

fn default_max_concurrent_operations() -> usize {
    20
}

fn default_max_context_depth() -> u32 {
    10
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_audit_retention_count() -> usize {
    10_000
}

fn default_validation_timeout_ms() -> u64 {
    10_000
}

fn default_dependency_poll_initial_ms() -> u64 {
    100
}

fn default_dependency_poll_factor() -> f64 {
    1.5
}

fn default_dependency_poll_max_ms() -> u64 {
    2_000
}

fn default_loop_idle_interval_ms() -> u64 {
    10
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_concurrent_operations: default_max_concurrent_operations(),
            max_context_depth: default_max_context_depth(),
            default_timeout_ms: default_timeout_ms(),
            default_max_retries: default_max_retries(),
            enable_auto_rollback: true,
            enable_deep_validation: true,
            enable_audit_logging: true,
            audit_retention_count: default_audit_retention_count(),
            validation_timeout_ms: default_validation_timeout_ms(),
            dependency_poll_initial_ms: default_dependency_poll_initial_ms(),
            dependency_poll_factor: default_dependency_poll_factor(),
            dependency_poll_max_ms: default_dependency_poll_max_ms(),
            loop_idle_interval_ms: default_loop_idle_interval_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    pub fn dependency_poll_initial(&self) -> Duration {
        Duration::from_millis(self.dependency_poll_initial_ms)
    }

    pub fn dependency_poll_max(&self) -> Duration {
        Duration::from_millis(self.dependency_poll_max_ms)
    }

    pub fn loop_idle_interval(&self) -> Duration {
        Duration::from_millis(self.loop_idle_interval_ms)
    }
}
