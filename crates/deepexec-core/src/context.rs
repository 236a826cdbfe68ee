//! Execution context store.
//!
//! Holds the context tree and, alongside every context, its rollback stack:
//! the compensating actions registered by operations that ran inside it,
//! newest last.

use chrono::Utc;
use dashmap::DashMap;
use deepexec_types::context::{ExecutionContext, StateEntry, StateMap};
use deepexec_types::error::EngineError;
use deepexec_types::id;
use deepexec_types::operation::{Args, OperationResult, OperationStatus};

use crate::handler::BoxHandler;

/// A compensating action registered by an operation with a rollback handler.
#[derive(Debug, Clone)]
pub struct RollbackStackEntry {
    pub operation_id: String,
    pub handler: BoxHandler,
    /// The original operation arguments, replayed into the handler.
    pub args: Args,
    pub checkpoint_id: Option<String>,
}

/// Concurrent store of execution contexts.
pub struct ContextStore {
    contexts: DashMap<String, ExecutionContext>,
    rollback_stacks: DashMap<String, Vec<RollbackStackEntry>>,
    max_depth: u32,
}

impl ContextStore {
    pub fn new(max_depth: u32) -> Self {
        Self {
            contexts: DashMap::new(),
            rollback_stacks: DashMap::new(),
            max_depth,
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Create a context, optionally under `parent_id`.
    ///
    /// Fails without registering anything when the parent is unknown or the
    /// new depth would exceed the maximum.
    pub fn create(
        &self,
        name: &str,
        parent_id: Option<&str>,
        initial_state: Option<StateMap>,
    ) -> Result<ExecutionContext, EngineError> {
        let depth = match parent_id {
            Some(pid) => {
                let parent = self
                    .contexts
                    .get(pid)
                    .ok_or_else(|| EngineError::ContextNotFound(pid.to_string()))?;
                parent.depth_level + 1
            }
            None => 0,
        };

        if depth > self.max_depth {
            return Err(EngineError::ContextDepthExceeded {
                max: self.max_depth,
            });
        }

        let context = ExecutionContext::new(
            id::context_id(),
            name,
            parent_id.map(str::to_string),
            depth,
            initial_state.unwrap_or_default(),
        );
        let context_id = context.context_id.clone();

        self.contexts.insert(context_id.clone(), context.clone());
        self.rollback_stacks.insert(context_id.clone(), Vec::new());

        if let Some(pid) = parent_id {
            if let Some(mut parent) = self.contexts.get_mut(pid) {
                parent.children.push(context_id.clone());
            }
        }

        tracing::debug!(
            context_id = %context_id,
            parent_id = ?parent_id,
            depth,
            "created execution context"
        );

        Ok(context)
    }

    /// Snapshot of a context.
    pub fn get(&self, context_id: &str) -> Option<ExecutionContext> {
        self.contexts.get(context_id).map(|c| c.clone())
    }

    pub fn contains(&self, context_id: &str) -> bool {
        self.contexts.contains_key(context_id)
    }

    pub fn set_state(
        &self,
        context_id: &str,
        key: impl Into<String>,
        entry: StateEntry,
    ) -> Result<(), EngineError> {
        let mut context = self
            .contexts
            .get_mut(context_id)
            .ok_or_else(|| EngineError::ContextNotFound(context_id.to_string()))?;
        context.state.insert(key.into(), entry);
        Ok(())
    }

    /// Deep copy of a context's state.
    pub fn state_snapshot(&self, context_id: &str) -> Option<StateMap> {
        self.contexts.get(context_id).map(|c| c.state.clone())
    }

    pub fn children(&self, context_id: &str) -> Vec<String> {
        self.contexts
            .get(context_id)
            .map(|c| c.children.clone())
            .unwrap_or_default()
    }

    /// Note that `operation_id` is executing inside the context.
    pub fn record_operation(&self, context_id: &str, operation_id: &str) {
        if let Some(mut context) = self.contexts.get_mut(context_id) {
            if !context.operations.iter().any(|id| id == operation_id) {
                context.operations.push(operation_id.to_string());
            }
        }
    }

    pub fn store_result(&self, context_id: &str, result: OperationResult) {
        if let Some(mut context) = self.contexts.get_mut(context_id) {
            context
                .results
                .insert(result.operation_id.clone(), result);
        }
    }

    /// Rewrite the status of a stored result, e.g. after a later rollback.
    pub fn set_result_status(&self, context_id: &str, operation_id: &str, status: OperationStatus) {
        if let Some(mut context) = self.contexts.get_mut(context_id) {
            if let Some(result) = context.results.get_mut(operation_id) {
                result.status = status;
            }
        }
    }

    /// Stamp `completed_at`. Completing twice keeps the first timestamp.
    pub fn complete(&self, context_id: &str) -> Result<ExecutionContext, EngineError> {
        let mut context = self
            .contexts
            .get_mut(context_id)
            .ok_or_else(|| EngineError::ContextNotFound(context_id.to_string()))?;
        if context.completed_at.is_none() {
            context.completed_at = Some(Utc::now());
        }
        Ok(context.clone())
    }

    // -----------------------------------------------------------------------
    // Rollback stacks
    // -----------------------------------------------------------------------

    pub fn push_rollback(&self, context_id: &str, entry: RollbackStackEntry) {
        self.rollback_stacks
            .entry(context_id.to_string())
            .or_default()
            .push(entry);
    }

    /// Remove the entry registered by `operation_id`, if still present.
    pub fn remove_rollback(
        &self,
        context_id: &str,
        operation_id: &str,
    ) -> Option<RollbackStackEntry> {
        let mut stack = self.rollback_stacks.get_mut(context_id)?;
        let index = stack.iter().rposition(|e| e.operation_id == operation_id)?;
        Some(stack.remove(index))
    }

    /// Take every entry, newest first.
    pub fn drain_rollback(&self, context_id: &str) -> Vec<RollbackStackEntry> {
        self.rollback_stacks
            .get_mut(context_id)
            .map(|mut stack| stack.drain(..).rev().collect())
            .unwrap_or_default()
    }

    pub fn rollback_depth(&self, context_id: &str) -> usize {
        self.rollback_stacks
            .get(context_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepexec_types::context::ResourceKind;
    use serde_json::{Value, json};

    fn entry(operation_id: &str) -> RollbackStackEntry {
        RollbackStackEntry {
            operation_id: operation_id.to_string(),
            handler: BoxHandler::from_fn(|_| Ok(Value::Null)),
            args: Args::new(),
            checkpoint_id: None,
        }
    }

    #[test]
    fn child_depth_is_parent_plus_one() {
        let store = ContextStore::new(10);
        let root = store.create("root", None, None).unwrap();
        let child = store.create("child", Some(&root.context_id), None).unwrap();

        assert_eq!(root.depth_level, 0);
        assert_eq!(child.depth_level, 1);
        assert_eq!(child.parent_id.as_deref(), Some(root.context_id.as_str()));
        assert_eq!(store.children(&root.context_id), vec![child.context_id]);
        assert_eq!(store.rollback_depth(&root.context_id), 0);
    }

    #[test]
    fn depth_limit_rejects_without_registering() {
        let store = ContextStore::new(2);
        let c0 = store.create("c0", None, None).unwrap();
        let c1 = store.create("c1", Some(&c0.context_id), None).unwrap();
        let c2 = store.create("c2", Some(&c1.context_id), None).unwrap();
        assert_eq!(c2.depth_level, 2);

        let err = store
            .create("c3", Some(&c2.context_id), None)
            .unwrap_err();
        assert_eq!(err, EngineError::ContextDepthExceeded { max: 2 });
        assert_eq!(store.len(), 3);
        assert!(store.children(&c2.context_id).is_empty());
    }

    #[test]
    fn unknown_parent_is_an_error() {
        let store = ContextStore::new(10);
        let err = store.create("orphan", Some("ctx-missing"), None).unwrap_err();
        assert_eq!(err, EngineError::ContextNotFound("ctx-missing".into()));
        assert!(store.is_empty());
    }

    #[test]
    fn state_is_copied_into_snapshots() {
        let store = ContextStore::new(10);
        let ctx = store.create("stateful", None, None).unwrap();
        store
            .set_state(
                &ctx.context_id,
                "users_table",
                StateEntry::new(ResourceKind::Database, json!({"rows": 10})),
            )
            .unwrap();

        let snapshot = store.state_snapshot(&ctx.context_id).unwrap();
        store
            .set_state(&ctx.context_id, "later", StateEntry::generic(json!(1)))
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["users_table"].kind, ResourceKind::Database);
        assert_eq!(store.get(&ctx.context_id).unwrap().state.len(), 2);
    }

    #[test]
    fn complete_is_idempotent() {
        let store = ContextStore::new(10);
        let ctx = store.create("job", None, None).unwrap();
        let first = store.complete(&ctx.context_id).unwrap().completed_at;
        let second = store.complete(&ctx.context_id).unwrap().completed_at;
        assert!(first.is_some());
        assert_eq!(first, second);
        assert!(store.complete("ctx-nope").is_err());
    }

    #[test]
    fn rollback_stack_drains_newest_first() {
        let store = ContextStore::new(10);
        let ctx = store.create("rb", None, None).unwrap();
        for id in ["op-a", "op-b", "op-c"] {
            store.push_rollback(&ctx.context_id, entry(id));
        }

        let removed = store.remove_rollback(&ctx.context_id, "op-b").unwrap();
        assert_eq!(removed.operation_id, "op-b");
        assert!(store.remove_rollback(&ctx.context_id, "op-b").is_none());

        let drained: Vec<_> = store
            .drain_rollback(&ctx.context_id)
            .into_iter()
            .map(|e| e.operation_id)
            .collect();
        assert_eq!(drained, vec!["op-c", "op-a"]);
        assert_eq!(store.rollback_depth(&ctx.context_id), 0);
    }

    #[test]
    fn record_operation_deduplicates() {
        let store = ContextStore::new(10);
        let ctx = store.create("ops", None, None).unwrap();
        store.record_operation(&ctx.context_id, "op-1");
        store.record_operation(&ctx.context_id, "op-1");
        assert_eq!(store.get(&ctx.context_id).unwrap().operations, vec!["op-1"]);
    }
}
