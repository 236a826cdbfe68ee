use std::collections::HashMap;

use chrono::{DateTime, Utc};
use deepexec_types::context::StateMap;
use deepexec_types::operation::Args;
use serde::Serialize;
use serde_json::Value;

use crate::handler::BoxHandler;

/// Immutable snapshot of state, optionally paired with a custom rollback
/// handler and the params bound to it.
#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Creation order. Breaks ties between equal `created_at` values.
    pub sequence: u64,
    pub state: StateMap,
    pub metadata: HashMap<String, Value>,
    pub execution_id: Option<String>,
    pub step_id: Option<String>,
    #[serde(skip)]
    pub rollback_handler: Option<BoxHandler>,
    pub rollback_params: Args,
}

impl Checkpoint {
    pub fn has_custom_handler(&self) -> bool {
        self.rollback_handler.is_some()
    }
}

/// Arguments for `RollbackManager::create_checkpoint`.
#[derive(Debug, Clone, Default)]
pub struct CheckpointRequest {
    pub name: String,
    pub description: String,
    pub state: StateMap,
    pub metadata: HashMap<String, Value>,
    pub execution_id: Option<String>,
    pub step_id: Option<String>,
    pub rollback_handler: Option<BoxHandler>,
    pub rollback_params: Args,
}

impl CheckpointRequest {
    pub fn new(name: impl Into<String>, state: StateMap) -> Self {
        Self {
            name: name.into(),
            state,
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    /// Attach a custom handler, invoked with `params` on rollback.
    pub fn handler(mut self, handler: BoxHandler, params: Args) -> Self {
        self.rollback_handler = Some(handler);
        self.rollback_params = params;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
