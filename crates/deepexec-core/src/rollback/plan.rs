use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Utc};
use deepexec_types::context::ResourceKind;
use deepexec_types::id;
use deepexec_types::operation::Args;
use deepexec_types::rollback::{RollbackStatus, RollbackStrategy};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::handler::BoxHandler;

// ---------------------------------------------------------------------------
// RollbackStep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RollbackStep {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Steps without a handler succeed trivially.
    #[serde(skip)]
    pub handler: Option<BoxHandler>,
    pub params: Args,
    pub status: RollbackStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RollbackStep {
    pub fn new(name: impl Into<String>, handler: Option<BoxHandler>, params: Args) -> Self {
        Self {
            id: id::uuid_string(),
            name: name.into(),
            description: String::new(),
            handler,
            params,
            status: RollbackStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Run the step. Errors and panics are captured on the step, never raised.
    async fn run(&mut self) -> Result<(), String> {
        self.started_at = Some(Utc::now());
        self.status = RollbackStatus::InProgress;

        let outcome = match &self.handler {
            Some(handler) => {
                let call = handler.invoke(self.params.clone());
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("rollback handler panicked".to_string()),
                }
            }
            None => Ok(json!({"success": true})),
        };

        self.completed_at = Some(Utc::now());
        match outcome {
            Ok(value) => {
                self.result = Some(value);
                self.status = RollbackStatus::Completed;
                Ok(())
            }
            Err(error) => {
                self.error = Some(error.clone());
                self.status = RollbackStatus::Failed;
                Err(error)
            }
        }
    }
}

/// Declarative step for `RollbackManager::create_rollback_plan`.
///
/// `handler` names the resource kind whose registered handler runs the step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub handler: Option<ResourceKind>,
    #[serde(default)]
    pub params: Args,
}

// ---------------------------------------------------------------------------
// RollbackPlan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RollbackPlan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub strategy: RollbackStrategy,
    pub target_checkpoint: Option<String>,
    pub steps: Vec<RollbackStep>,
    pub status: RollbackStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub errors: Vec<String>,
}

impl RollbackPlan {
    pub fn new(name: impl Into<String>, strategy: RollbackStrategy) -> Self {
        Self {
            id: id::uuid_string(),
            name: name.into(),
            description: String::new(),
            strategy,
            target_checkpoint: None,
            steps: Vec::new(),
            status: RollbackStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            steps_completed: 0,
            steps_failed: 0,
            errors: Vec::new(),
        }
    }

    /// A plan that failed before any step could be built.
    pub fn failed(
        name: impl Into<String>,
        strategy: RollbackStrategy,
        error: impl Into<String>,
    ) -> Self {
        let mut plan = Self::new(name, strategy);
        plan.status = RollbackStatus::Failed;
        plan.errors.push(error.into());
        plan
    }

    pub fn is_success(&self) -> bool {
        self.status == RollbackStatus::Completed
    }

    /// Run every step in order.
    ///
    /// Final status: `Completed` when nothing failed, `Partial` when some
    /// steps failed and others succeeded, `Failed` when no step succeeded.
    /// An empty plan completes.
    pub async fn execute(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = RollbackStatus::InProgress;

        for step in &mut self.steps {
            match step.run().await {
                Ok(()) => self.steps_completed += 1,
                Err(error) => {
                    tracing::warn!(
                        plan_id = %self.id,
                        step = %step.name,
                        error = %error,
                        "rollback step failed"
                    );
                    self.steps_failed += 1;
                    self.errors
                        .push(format!("Step '{}' failed: {error}", step.name));
                }
            }
        }

        self.status = if self.steps_failed == 0 {
            RollbackStatus::Completed
        } else if self.steps_completed > 0 {
            RollbackStatus::Partial
        } else {
            RollbackStatus::Failed
        };
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::handler::HandlerError;

    fn ok_handler() -> BoxHandler {
        BoxHandler::from_fn(|params| Ok(json!({"undone": params.get("key").cloned()})))
    }

    fn failing_handler() -> BoxHandler {
        BoxHandler::from_fn(|_| Err(HandlerError::failed("disk offline")))
    }

    #[tokio::test]
    async fn all_steps_succeed() {
        let mut plan = RollbackPlan::new("plan", RollbackStrategy::Full);
        plan.steps.push(RollbackStep::new("one", Some(ok_handler()), Args::new()));
        plan.steps.push(RollbackStep::new("two", None, Args::new()));
        plan.execute().await;

        assert_eq!(plan.status, RollbackStatus::Completed);
        assert_eq!(plan.steps_completed, 2);
        assert_eq!(plan.steps[1].result, Some(json!({"success": true})));
        assert!(plan.started_at.is_some() && plan.completed_at.is_some());
    }

    #[tokio::test]
    async fn failing_step_does_not_abort_the_rest() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut plan = RollbackPlan::new("plan", RollbackStrategy::Incremental);
        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            let handler = BoxHandler::from_fn(move |_| {
                order.lock().unwrap().push(name);
                if name == "second" {
                    Err(HandlerError::failed("locked"))
                } else {
                    Ok(Value::Null)
                }
            });
            plan.steps.push(RollbackStep::new(name, Some(handler), Args::new()));
        }
        plan.execute().await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(plan.status, RollbackStatus::Partial);
        assert_eq!(plan.steps_completed, 2);
        assert_eq!(plan.steps_failed, 1);
        assert_eq!(plan.errors, vec!["Step 'second' failed: locked".to_string()]);
        assert_eq!(plan.steps[1].status, RollbackStatus::Failed);
        assert_eq!(plan.steps[1].error.as_deref(), Some("locked"));
    }

    #[tokio::test]
    async fn all_failing_is_failed() {
        let mut plan = RollbackPlan::new("plan", RollbackStrategy::Full);
        plan.steps.push(RollbackStep::new("a", Some(failing_handler()), Args::new()));
        plan.execute().await;
        assert_eq!(plan.status, RollbackStatus::Failed);
        assert!(!plan.is_success());
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let mut plan = RollbackPlan::new("plan", RollbackStrategy::Full);
        plan.steps.push(RollbackStep::new(
            "boom",
            Some(BoxHandler::from_fn(|_| panic!("corrupt"))),
            Args::new(),
        ));
        plan.steps.push(RollbackStep::new("after", None, Args::new()));
        plan.execute().await;
        assert_eq!(plan.status, RollbackStatus::Partial);
        assert_eq!(plan.steps[1].status, RollbackStatus::Completed);
    }

    #[tokio::test]
    async fn empty_plan_completes() {
        let mut plan = RollbackPlan::new("noop", RollbackStrategy::Selective);
        plan.execute().await;
        assert!(plan.is_success());
    }

    #[test]
    fn plan_serializes_without_handlers() {
        let mut plan = RollbackPlan::new("plan", RollbackStrategy::Full);
        plan.steps.push(RollbackStep::new("one", Some(ok_handler()), Args::new()));
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json["steps"][0].get("handler").is_none());
    }
}
