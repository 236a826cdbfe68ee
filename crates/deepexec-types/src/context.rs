//! Execution context types.
//!
//! Contexts form a tree. Each one carries a typed state map that rollback
//! checkpoints snapshot, plus the results of operations executed inside it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operation::OperationResult;

/// Resource category of a state entry.
///
/// Rollback routes each non-generic entry to the handler registered for its
/// kind. The kind is declared by the writer; keys are never inspected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    #[default]
    Generic,
    Database,
    File,
    Config,
    Deployment,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Generic => "generic",
            ResourceKind::Database => "database",
            ResourceKind::File => "file",
            ResourceKind::Config => "config",
            ResourceKind::Deployment => "deployment",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generic" => Ok(ResourceKind::Generic),
            "database" => Ok(ResourceKind::Database),
            "file" => Ok(ResourceKind::File),
            "config" => Ok(ResourceKind::Config),
            "deployment" => Ok(ResourceKind::Deployment),
            other => Err(format!("invalid resource kind: '{other}'")),
        }
    }
}

/// A single tagged state value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    #[serde(default)]
    pub kind: ResourceKind,
    pub value: Value,
}

impl StateEntry {
    pub fn new(kind: ResourceKind, value: Value) -> Self {
        Self { kind, value }
    }

    /// Untyped state that rollback ignores.
    pub fn generic(value: Value) -> Self {
        Self::new(ResourceKind::Generic, value)
    }
}

/// Ordered key -> entry map. Ordered so rollback steps come out deterministic.
pub type StateMap = BTreeMap<String, StateEntry>;

/// A node in the execution context tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub context_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Root contexts are depth 0.
    pub depth_level: u32,
    #[serde(default)]
    pub state: StateMap,
    /// Operation ids in execution order.
    #[serde(default)]
    pub operations: Vec<String>,
    #[serde(default)]
    pub results: HashMap<String, OperationResult>,
    #[serde(default)]
    pub children: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(
        context_id: impl Into<String>,
        name: impl Into<String>,
        parent_id: Option<String>,
        depth_level: u32,
        state: StateMap,
    ) -> Self {
        Self {
            context_id: context_id.into(),
            name: name.into(),
            parent_id,
            depth_level,
            state,
            operations: Vec::new(),
            results: HashMap::new(),
            children: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}
