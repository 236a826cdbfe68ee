//! Prefixed identifier generation for engine records.
//!
//! Identifiers are short, human-scannable strings (`op-1a2b3c4d`) built from
//! the random tail of a UUIDv7. The leading bits of a v7 UUID encode the
//! timestamp, so only the trailing (random) hex digits are used.

use uuid::Uuid;

/// Prefix for operation identifiers.
pub const OPERATION_PREFIX: &str = "op";
/// Prefix for execution context identifiers.
pub const CONTEXT_PREFIX: &str = "ctx";
/// Prefix for audit entry identifiers.
pub const AUDIT_PREFIX: &str = "audit";

/// Generate `"{prefix}-{hex}"` with `len` random hex characters (max 12).
pub fn generate(prefix: &str, len: usize) -> String {
    let hex = Uuid::now_v7().simple().to_string();
    let len = len.min(12);
    format!("{prefix}-{}", &hex[hex.len() - len..])
}

/// New operation id, e.g. `op-9f3c21aa`.
pub fn operation_id() -> String {
    generate(OPERATION_PREFIX, 8)
}

/// New context id, e.g. `ctx-04be7d19`.
pub fn context_id() -> String {
    generate(CONTEXT_PREFIX, 8)
}

/// New audit entry id, e.g. `audit-5c0d9e1f2a3b`.
pub fn audit_entry_id() -> String {
    generate(AUDIT_PREFIX, 12)
}

/// Full UUID string, used for checkpoints, plans and rollback steps.
pub fn uuid_string() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn prefixes_and_lengths() {
        let op = operation_id();
        assert!(op.starts_with("op-"));
        assert_eq!(op.len(), "op-".len() + 8);

        let audit = audit_entry_id();
        assert!(audit.starts_with("audit-"));
        assert_eq!(audit.len(), "audit-".len() + 12);

        assert!(context_id().starts_with("ctx-"));
    }

    #[test]
    fn ids_generated_back_to_back_are_distinct() {
        let ids: HashSet<String> = (0..500).map(|_| operation_id()).collect();
        assert_eq!(ids.len(), 500);
    }
}
