use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use deepexec_types::context::ResourceKind;
use deepexec_types::id;
use deepexec_types::operation::Args;
use deepexec_types::rollback::RollbackStrategy;
use deepexec_types::stats::RollbackStats;
use serde_json::{Value, json};

use super::checkpoint::{Checkpoint, CheckpointRequest};
use super::plan::{RollbackPlan, RollbackStep, StepDefinition};
use crate::handler::BoxHandler;

/// Executed plans kept for `history`.
const HISTORY_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// RollbackManager
// ---------------------------------------------------------------------------

/// Owns checkpoints, the per-kind rollback handlers and the plan history.
pub struct RollbackManager {
    checkpoints: DashMap<String, Checkpoint>,
    /// execution id -> checkpoint ids in creation order.
    execution_index: DashMap<String, Vec<String>>,
    handlers: RwLock<HashMap<ResourceKind, BoxHandler>>,
    history: Mutex<VecDeque<RollbackPlan>>,
    sequence: AtomicU64,
    checkpoints_created: AtomicUsize,
    total_rollbacks: AtomicU64,
    successful_rollbacks: AtomicU64,
    failed_rollbacks: AtomicU64,
}

impl Default for RollbackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RollbackManager {
    /// Create a manager with default handlers for every non-generic kind.
    pub fn new() -> Self {
        let handlers = [
            ResourceKind::Database,
            ResourceKind::File,
            ResourceKind::Config,
            ResourceKind::Deployment,
        ]
        .into_iter()
        .map(|kind| (kind, default_handler(kind)))
        .collect();

        Self {
            checkpoints: DashMap::new(),
            execution_index: DashMap::new(),
            handlers: RwLock::new(handlers),
            history: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
            checkpoints_created: AtomicUsize::new(0),
            total_rollbacks: AtomicU64::new(0),
            successful_rollbacks: AtomicU64::new(0),
            failed_rollbacks: AtomicU64::new(0),
        }
    }

    /// Replace the handler used for state entries of `kind`.
    pub fn register_handler(&self, kind: ResourceKind, handler: BoxHandler) {
        self.handlers
            .write()
            .expect("rollback handler lock poisoned")
            .insert(kind, handler);
    }

    fn handler_for(&self, kind: ResourceKind) -> Option<BoxHandler> {
        self.handlers
            .read()
            .expect("rollback handler lock poisoned")
            .get(&kind)
            .cloned()
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    pub fn create_checkpoint(&self, request: CheckpointRequest) -> Checkpoint {
        let checkpoint = Checkpoint {
            id: id::uuid_string(),
            name: request.name,
            description: request.description,
            created_at: Utc::now(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            state: request.state,
            metadata: request.metadata,
            execution_id: request.execution_id,
            step_id: request.step_id,
            rollback_handler: request.rollback_handler,
            rollback_params: request.rollback_params,
        };

        if let Some(execution_id) = &checkpoint.execution_id {
            self.execution_index
                .entry(execution_id.clone())
                .or_default()
                .push(checkpoint.id.clone());
        }
        self.checkpoints
            .insert(checkpoint.id.clone(), checkpoint.clone());
        self.checkpoints_created.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            checkpoint_id = %checkpoint.id,
            execution_id = ?checkpoint.execution_id,
            step_id = ?checkpoint.step_id,
            entries = checkpoint.state.len(),
            "created checkpoint"
        );

        checkpoint
    }

    pub fn get_checkpoint(&self, checkpoint_id: &str) -> Option<Checkpoint> {
        self.checkpoints.get(checkpoint_id).map(|c| c.clone())
    }

    /// Checkpoints of an execution in creation order.
    pub fn checkpoints_for_execution(&self, execution_id: &str) -> Vec<Checkpoint> {
        let ids = self
            .execution_index
            .get(execution_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.get_checkpoint(id))
            .collect()
    }

    pub fn delete_checkpoint(&self, checkpoint_id: &str) -> bool {
        let Some((_, checkpoint)) = self.checkpoints.remove(checkpoint_id) else {
            return false;
        };
        if let Some(execution_id) = &checkpoint.execution_id {
            if let Some(mut ids) = self.execution_index.get_mut(execution_id) {
                ids.retain(|id| id != checkpoint_id);
            }
        }
        true
    }

    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.len()
    }

    /// Delete, oldest first, every checkpoint older than `max_age`, and keep
    /// deleting while more than `max_count` remain. Returns the number deleted.
    pub fn cleanup_old_checkpoints(&self, max_age: Duration, max_count: usize) -> usize {
        let now = Utc::now();

        let mut candidates: Vec<_> = self
            .checkpoints
            .iter()
            .map(|c| (c.created_at, c.sequence, c.id.clone()))
            .collect();
        candidates.sort();

        let mut deleted = 0;
        for (created_at, _, id) in candidates {
            let age = (now - created_at).to_std().unwrap_or(Duration::ZERO);
            let too_old = age > max_age;
            if (too_old || self.checkpoints.len() > max_count) && self.delete_checkpoint(&id) {
                deleted += 1;
            }
        }

        if deleted > 0 {
            tracing::debug!(deleted, remaining = self.checkpoints.len(), "cleaned up checkpoints");
        }
        deleted
    }

    // -----------------------------------------------------------------------
    // Rollback
    // -----------------------------------------------------------------------

    /// Steps restoring one checkpoint: its custom handler if it has one,
    /// otherwise one step per non-generic state entry.
    fn build_steps(&self, checkpoint: &Checkpoint) -> Vec<RollbackStep> {
        if let Some(handler) = &checkpoint.rollback_handler {
            let step = RollbackStep::new(
                format!("Rollback {}", checkpoint.name),
                Some(handler.clone()),
                checkpoint.rollback_params.clone(),
            )
            .with_description(format!("Custom rollback for checkpoint {}", checkpoint.id));
            return vec![step];
        }

        checkpoint
            .state
            .iter()
            .filter(|(_, entry)| entry.kind != ResourceKind::Generic)
            .map(|(key, entry)| {
                let mut params = Args::new();
                params.insert("key".to_string(), Value::String(key.clone()));
                params.insert("value".to_string(), entry.value.clone());
                RollbackStep::new(
                    format!("Rollback {} state: {key}", entry.kind),
                    self.handler_for(entry.kind),
                    params,
                )
            })
            .collect()
    }

    pub async fn rollback_to_checkpoint(
        &self,
        checkpoint_id: &str,
        strategy: RollbackStrategy,
    ) -> RollbackPlan {
        let Some(checkpoint) = self.get_checkpoint(checkpoint_id) else {
            return RollbackPlan::failed(
                format!("Rollback to {checkpoint_id}"),
                strategy,
                format!("Checkpoint not found: {checkpoint_id}"),
            );
        };

        let mut plan = RollbackPlan::new(format!("Rollback to {}", checkpoint.name), strategy);
        plan.target_checkpoint = Some(checkpoint.id.clone());
        plan.steps = self.build_steps(&checkpoint);
        self.execute_plan(plan).await
    }

    /// Roll back every checkpoint of an execution, newest first.
    pub async fn rollback_execution(
        &self,
        execution_id: &str,
        strategy: RollbackStrategy,
    ) -> RollbackPlan {
        let name = format!("Rollback execution {execution_id}");
        let mut checkpoints = self.checkpoints_for_execution(execution_id);
        if checkpoints.is_empty() {
            return RollbackPlan::failed(
                name,
                strategy,
                format!("No checkpoints found for execution: {execution_id}"),
            );
        }

        checkpoints.sort_by(|a, b| {
            (b.created_at, b.sequence).cmp(&(a.created_at, a.sequence))
        });

        let mut plan = RollbackPlan::new(name, strategy);
        plan.steps = checkpoints
            .iter()
            .flat_map(|c| self.build_steps(c))
            .collect();
        self.execute_plan(plan).await
    }

    /// Build an unexecuted plan from step definitions. Handlers are looked up
    /// by resource kind; unknown or absent kinds leave the step handler-less.
    pub fn create_rollback_plan(
        &self,
        name: impl Into<String>,
        steps: Vec<StepDefinition>,
        strategy: RollbackStrategy,
    ) -> RollbackPlan {
        let mut plan = RollbackPlan::new(name, strategy);
        plan.steps = steps
            .into_iter()
            .map(|def| {
                let handler = def.handler.and_then(|kind| self.handler_for(kind));
                RollbackStep::new(def.name, handler, def.params).with_description(def.description)
            })
            .collect();
        plan
    }

    /// Execute a plan, record it in the history and update the counters.
    pub async fn execute_plan(&self, mut plan: RollbackPlan) -> RollbackPlan {
        plan.execute().await;

        self.total_rollbacks.fetch_add(1, Ordering::Relaxed);
        if plan.is_success() {
            self.successful_rollbacks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_rollbacks.fetch_add(1, Ordering::Relaxed);
        }

        tracing::info!(
            plan_id = %plan.id,
            name = %plan.name,
            status = %plan.status,
            steps_completed = plan.steps_completed,
            steps_failed = plan.steps_failed,
            "rollback plan finished"
        );

        let mut history = self.history.lock().expect("rollback history lock poisoned");
        history.push_back(plan.clone());
        while history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }
        plan
    }

    /// The most recent `limit` executed plans, oldest first.
    pub fn history(&self, limit: usize) -> Vec<RollbackPlan> {
        let history = self.history.lock().expect("rollback history lock poisoned");
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self) -> RollbackStats {
        RollbackStats {
            total_checkpoints: self.checkpoints_created.load(Ordering::Relaxed),
            total_rollbacks: self.total_rollbacks.load(Ordering::Relaxed),
            successful_rollbacks: self.successful_rollbacks.load(Ordering::Relaxed),
            failed_rollbacks: self.failed_rollbacks.load(Ordering::Relaxed),
        }
    }
}

fn default_handler(kind: ResourceKind) -> BoxHandler {
    BoxHandler::from_fn(move |params| {
        Ok(json!({
            "rolled_back": true,
            "type": kind.as_str(),
            "key": params.get("key").cloned().unwrap_or(Value::Null),
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    use deepexec_types::context::{StateEntry, StateMap};
    use deepexec_types::rollback::RollbackStatus;

    use crate::handler::HandlerError;

    fn state(entries: &[(&str, ResourceKind)]) -> StateMap {
        entries
            .iter()
            .map(|(k, kind)| (k.to_string(), StateEntry::new(*kind, json!(format!("{k}-v")))))
            .collect()
    }

    #[test]
    fn checkpoint_state_is_a_copy() {
        let manager = RollbackManager::new();
        let mut live = state(&[("users", ResourceKind::Database)]);
        let cp = manager.create_checkpoint(CheckpointRequest::new("before", live.clone()));
        live.insert("later".into(), StateEntry::generic(json!(1)));

        let stored = manager.get_checkpoint(&cp.id).unwrap();
        assert_eq!(stored.state.len(), 1);
        assert_eq!(manager.stats().total_checkpoints, 1);
    }

    #[test]
    fn execution_index_tracks_create_and_delete() {
        let manager = RollbackManager::new();
        let a = manager.create_checkpoint(CheckpointRequest::new("a", StateMap::new()).execution("exec-1"));
        let b = manager.create_checkpoint(CheckpointRequest::new("b", StateMap::new()).execution("exec-1"));
        manager.create_checkpoint(CheckpointRequest::new("c", StateMap::new()).execution("exec-2"));

        let ids: Vec<_> = manager
            .checkpoints_for_execution("exec-1")
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![a.id.clone(), b.id.clone()]);

        assert!(manager.delete_checkpoint(&a.id));
        assert!(!manager.delete_checkpoint(&a.id));
        assert_eq!(manager.checkpoints_for_execution("exec-1").len(), 1);
        assert!(b.sequence > a.sequence);
    }

    #[tokio::test]
    async fn rollback_routes_entries_by_kind() {
        let manager = RollbackManager::new();
        let cp = manager.create_checkpoint(CheckpointRequest::new(
            "deploy",
            state(&[
                ("app_config", ResourceKind::Config),
                ("cache_hits", ResourceKind::Generic),
                ("orders", ResourceKind::Database),
                ("release", ResourceKind::Deployment),
            ]),
        ));

        let plan = manager
            .rollback_to_checkpoint(&cp.id, RollbackStrategy::Full)
            .await;

        assert_eq!(plan.status, RollbackStatus::Completed);
        assert_eq!(plan.target_checkpoint.as_deref(), Some(cp.id.as_str()));
        let names: Vec<_> = plan.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Rollback config state: app_config",
                "Rollback database state: orders",
                "Rollback deployment state: release",
            ]
        );
        assert_eq!(
            plan.steps[1].result,
            Some(json!({"rolled_back": true, "type": "database", "key": "orders"}))
        );
    }

    #[tokio::test]
    async fn custom_handler_receives_bound_params() {
        let manager = RollbackManager::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_in = Arc::clone(&seen);
        let handler = BoxHandler::from_fn(move |params| {
            *seen_in.lock().unwrap() = Some(params);
            Ok(Value::Null)
        });
        let mut params = Args::new();
        params.insert("table".into(), json!("users"));

        let cp = manager.create_checkpoint(
            CheckpointRequest::new("migrate", state(&[("users", ResourceKind::Database)]))
                .handler(handler, params.clone()),
        );
        let plan = manager
            .rollback_to_checkpoint(&cp.id, RollbackStrategy::Compensating)
            .await;

        assert!(plan.is_success());
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].name, "Rollback migrate");
        assert_eq!(seen.lock().unwrap().as_ref(), Some(&params));
    }

    #[tokio::test]
    async fn unknown_checkpoint_yields_failed_plan() {
        let manager = RollbackManager::new();
        let plan = manager
            .rollback_to_checkpoint("nope", RollbackStrategy::Full)
            .await;
        assert_eq!(plan.status, RollbackStatus::Failed);
        assert_eq!(plan.errors, vec!["Checkpoint not found: nope".to_string()]);
        assert!(plan.steps.is_empty());
        assert_eq!(manager.stats().total_rollbacks, 0);
    }

    #[tokio::test]
    async fn rollback_execution_runs_newest_first() {
        let manager = RollbackManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            let handler = BoxHandler::from_fn(move |_| {
                order.lock().unwrap().push(name);
                Ok(Value::Null)
            });
            manager.create_checkpoint(
                CheckpointRequest::new(name, StateMap::new())
                    .execution("exec-1")
                    .handler(handler, Args::new()),
            );
        }

        let plan = manager
            .rollback_execution("exec-1", RollbackStrategy::Incremental)
            .await;
        assert!(plan.is_success());
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);

        let missing = manager
            .rollback_execution("exec-404", RollbackStrategy::Incremental)
            .await;
        assert_eq!(
            missing.errors,
            vec!["No checkpoints found for execution: exec-404".to_string()]
        );
    }

    #[tokio::test]
    async fn registered_handler_replaces_default() {
        let manager = RollbackManager::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        manager.register_handler(
            ResourceKind::File,
            BoxHandler::from_fn(move |_| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::failed("read-only filesystem"))
            }),
        );

        let cp = manager.create_checkpoint(CheckpointRequest::new(
            "files",
            state(&[("a.txt", ResourceKind::File), ("db", ResourceKind::Database)]),
        ));
        let plan = manager
            .rollback_to_checkpoint(&cp.id, RollbackStrategy::Selective)
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(plan.status, RollbackStatus::Partial);
        let stats = manager.stats();
        assert_eq!(stats.total_rollbacks, 1);
        assert_eq!(stats.failed_rollbacks, 1);
    }

    #[tokio::test]
    async fn create_rollback_plan_then_execute() {
        let manager = RollbackManager::new();
        let steps = vec![
            StepDefinition {
                name: "restore config".into(),
                handler: Some(ResourceKind::Config),
                params: [("key".to_string(), json!("feature_flags"))].into_iter().collect(),
                ..StepDefinition::default()
            },
            StepDefinition {
                name: "notify".into(),
                ..StepDefinition::default()
            },
        ];
        let plan = manager.create_rollback_plan("manual", steps, RollbackStrategy::Compensating);
        assert_eq!(plan.status, RollbackStatus::Pending);
        assert!(plan.steps[0].handler.is_some());
        assert!(plan.steps[1].handler.is_none());

        let plan = manager.execute_plan(plan).await;
        assert!(plan.is_success());
        assert_eq!(plan.steps[0].result.as_ref().unwrap()["key"], "feature_flags");
        assert_eq!(manager.history(10).len(), 1);
    }

    #[test]
    fn cleanup_respects_age_and_count() {
        let manager = RollbackManager::new();
        let ids: Vec<_> = (0..5)
            .map(|i| {
                manager
                    .create_checkpoint(CheckpointRequest::new(format!("cp-{i}"), StateMap::new()))
                    .id
            })
            .collect();

        assert_eq!(manager.cleanup_old_checkpoints(Duration::from_secs(3600), 10), 0);

        let deleted = manager.cleanup_old_checkpoints(Duration::from_secs(3600), 2);
        assert_eq!(deleted, 3);
        assert!(manager.get_checkpoint(&ids[0]).is_none());
        assert!(manager.get_checkpoint(&ids[3]).is_some());
        assert!(manager.get_checkpoint(&ids[4]).is_some());

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(manager.cleanup_old_checkpoints(Duration::ZERO, 100), 2);
        assert_eq!(manager.checkpoint_count(), 0);
    }

    #[tokio::test]
    async fn history_returns_most_recent() {
        let manager = RollbackManager::new();
        for name in ["a", "b", "c"] {
            let plan = RollbackPlan::new(name, RollbackStrategy::Full);
            manager.execute_plan(plan).await;
        }
        let names: Vec<_> = manager.history(2).into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }
}
