//! Append-only audit trail with bounded retention.
//!
//! Every entry carries a redacted summary of the operation arguments: values
//! under sensitive keys become `[REDACTED]`, scalars pass through, and arrays
//! or objects collapse to an item count. Outputs are never recorded, only
//! whether one existed.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use deepexec_types::audit::{AuditAction, AuditEntry, AuditFilter, AuditMetadata, OutputSummary};
use deepexec_types::context::ExecutionContext;
use deepexec_types::id;
use deepexec_types::operation::{Args, OperationResult, OperationStatus};
use deepexec_types::stats::AuditStats;
use serde_json::{Map, Value};

use crate::operation::Operation;

/// Key suffixes whose values are never written to the audit trail.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "passphrase",
    "secret",
    "api_token",
    "access_token",
    "refresh_token",
    "auth_token",
    "api_key",
    "private_key",
    "secret_key",
    "encryption_key",
    "credential",
    "credentials",
    "bearer",
];

const REDACTED: &str = "[REDACTED]";

pub struct AuditLogger {
    entries: Mutex<VecDeque<AuditEntry>>,
    retention_count: usize,
    logged: AtomicU64,
    trimmed: AtomicU64,
}

impl AuditLogger {
    pub fn new(retention_count: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            retention_count: retention_count.max(1),
            logged: AtomicU64::new(0),
            trimmed: AtomicU64::new(0),
        }
    }

    /// Append an entry and return its id.
    pub fn log(
        &self,
        operation: &Operation,
        context: &ExecutionContext,
        action: AuditAction,
        status: OperationStatus,
        result: Option<&OperationResult>,
        user_id: Option<&str>,
    ) -> String {
        let mut entries = self.entries.lock().expect("audit log lock poisoned");

        let entry = AuditEntry {
            entry_id: id::audit_entry_id(),
            operation_id: operation.operation_id.clone(),
            context_id: context.context_id.clone(),
            operation_name: operation.name.clone(),
            action,
            status,
            user_id: user_id.map(str::to_string),
            input_summary: summarize_input(&operation.args),
            output_summary: result.map(summarize_output),
            error_details: result.and_then(|r| r.error.clone()),
            duration_ms: result.map(|r| r.duration_ms).unwrap_or(0.0),
            timestamp: Utc::now(),
            metadata: AuditMetadata {
                priority: operation.priority,
                validation_level: operation.validation_level,
                execution_depth: operation.execution_depth,
                context_depth: context.depth_level,
            },
        };
        let entry_id = entry.entry_id.clone();

        tracing::debug!(
            entry_id = %entry_id,
            operation_id = %entry.operation_id,
            context_id = %entry.context_id,
            action = %action,
            status = %status,
            "audit entry"
        );

        entries.push_back(entry);
        self.logged.fetch_add(1, Ordering::Relaxed);

        if entries.len() > self.retention_count {
            let overflow = entries.len() - self.retention_count;
            entries.drain(..overflow);
            self.trimmed.fetch_add(overflow as u64, Ordering::Relaxed);
        }

        entry_id
    }

    /// Matching entries, most recent first.
    pub fn entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let entries = self.entries.lock().expect("audit log lock poisoned");
        entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(filter.limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("audit log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            entries_logged: self.logged.load(Ordering::Relaxed),
            entries_trimmed: self.trimmed.load(Ordering::Relaxed),
            current_entries: self.len(),
        }
    }
}

/// Whether `key` names a credential-like value.
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS
        .iter()
        .any(|pattern| key == *pattern || key.ends_with(pattern))
}

/// Redacted copy of operation arguments for the audit trail.
pub fn summarize_input(args: &Args) -> Map<String, Value> {
    args.iter()
        .map(|(key, value)| {
            let summary = if is_sensitive_key(key) {
                Value::String(REDACTED.to_string())
            } else {
                match value {
                    Value::Array(items) => {
                        Value::String(format!("<array with {} items>", items.len()))
                    }
                    Value::Object(fields) => {
                        Value::String(format!("<object with {} items>", fields.len()))
                    }
                    scalar => scalar.clone(),
                }
            };
            (key.clone(), summary)
        })
        .collect()
}

pub fn summarize_output(result: &OperationResult) -> OutputSummary {
    OutputSummary {
        status: result.status,
        has_output: result.output.is_some(),
        has_error: result.error.is_some(),
        duration_ms: result.duration_ms,
    }
}
