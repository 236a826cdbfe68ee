//! Tiered operation validation.
//!
//! Validation levels are cumulative: an operation at `Deep` runs every
//! `Shallow`, `Standard` and `Deep` validator, in registration order. The
//! built-in structural checks run after the custom ones.
//!
//! A custom validator that errors or exceeds the validation timeout only adds
//! a warning. A validator that panics fails the whole report with
//! `Validation error: <message>`.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use deepexec_types::context::ExecutionContext;
use deepexec_types::operation::ValidationLevel;
use deepexec_types::stats::ValidatorStats;
use deepexec_types::validation::{CheckLevel, CheckOutcome, ValidationCheck, ValidationReport};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::operation::Operation;

/// What a custom validator returns. `Ok(None)` means "no opinion".
pub type ValidatorResult = Result<Option<CheckOutcome>, String>;

type ValidatorFn =
    Arc<dyn Fn(&Operation, &ExecutionContext) -> BoxFuture<'static, ValidatorResult> + Send + Sync>;

pub struct OperationValidator {
    validators: RwLock<BTreeMap<ValidationLevel, Vec<ValidatorFn>>>,
    max_context_depth: u32,
    validation_timeout: Duration,
    performed: AtomicU64,
    passed: AtomicU64,
    failed: AtomicU64,
}

impl OperationValidator {
    pub fn new(max_context_depth: u32, validation_timeout: Duration) -> Self {
        Self {
            validators: RwLock::new(BTreeMap::new()),
            max_context_depth,
            validation_timeout,
            performed: AtomicU64::new(0),
            passed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Register a synchronous validator at `level`.
    pub fn add_validator<F>(&self, level: ValidationLevel, validator: F)
    where
        F: Fn(&Operation, &ExecutionContext) -> ValidatorResult + Send + Sync + 'static,
    {
        let wrapped: ValidatorFn = Arc::new(
            move |op: &Operation, ctx: &ExecutionContext| -> BoxFuture<'static, ValidatorResult> {
                Box::pin(std::future::ready(validator(op, ctx)))
            },
        );
        self.register(level, wrapped);
    }

    /// Register an async validator at `level`. Each call is bounded by the
    /// validation timeout.
    pub fn add_async_validator<F, Fut>(&self, level: ValidationLevel, validator: F)
    where
        F: Fn(&Operation, &ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ValidatorResult> + Send + 'static,
    {
        let wrapped: ValidatorFn = Arc::new(
            move |op: &Operation, ctx: &ExecutionContext| -> BoxFuture<'static, ValidatorResult> {
                Box::pin(validator(op, ctx))
            },
        );
        self.register(level, wrapped);
    }

    fn register(&self, level: ValidationLevel, validator: ValidatorFn) {
        self.validators
            .write()
            .expect("validator registry lock poisoned")
            .entry(level)
            .or_default()
            .push(validator);
    }

    /// Validate `operation` inside `context` at the operation's own level.
    pub async fn validate(&self, operation: &Operation, context: &ExecutionContext) -> ValidationReport {
        self.performed.fetch_add(1, Ordering::Relaxed);
        let level = operation.validation_level;

        let outcome = AssertUnwindSafe(self.run(operation, context))
            .catch_unwind()
            .await;

        let report = match outcome {
            Ok(report) => report,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(
                    operation_id = %operation.operation_id,
                    error = %message,
                    "validator panicked"
                );
                let mut report = ValidationReport::new(level);
                report.valid = false;
                report.errors.push(format!("Validation error: {message}"));
                report
            }
        };

        if report.valid {
            self.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        tracing::debug!(
            operation_id = %operation.operation_id,
            level = %level,
            valid = report.valid,
            checks = report.checks.len(),
            warnings = report.warnings.len(),
            "validation finished"
        );

        report
    }

    async fn run(&self, operation: &Operation, context: &ExecutionContext) -> ValidationReport {
        let mut report = ValidationReport::new(operation.validation_level);

        for level in operation.validation_level.cumulative() {
            let validators = self.validators_at(level);
            for validator in validators {
                let call = validator(operation, context);
                match tokio::time::timeout(self.validation_timeout, call).await {
                    Ok(Ok(Some(outcome))) => record_outcome(&mut report, level, outcome),
                    Ok(Ok(None)) => {}
                    Ok(Err(error)) => {
                        report.warn(format!("Validator error at {level}: {error}"));
                    }
                    Err(_) => report.warn(format!("Validator at {level} timed out")),
                }
            }
        }

        self.run_builtin(operation, context, &mut report);
        report
    }

    /// Structural checks. The first failing check stops the rest.
    fn run_builtin(&self, operation: &Operation, context: &ExecutionContext, report: &mut ValidationReport) {
        if !operation.handler.available() {
            report.fail(
                CheckLevel::Builtin,
                "handler_callable",
                "Operation handler is not callable",
            );
            return;
        }
        report.pass(CheckLevel::Builtin, "handler_callable");

        if context.depth_level >= self.max_context_depth {
            report.fail(
                CheckLevel::Builtin,
                "context_depth",
                format!(
                    "Context depth {} exceeds max {}",
                    context.depth_level, self.max_context_depth
                ),
            );
            return;
        }
        report.pass(CheckLevel::Builtin, "context_depth");

        let timeout_valid = !operation.timeout.is_zero();
        if !timeout_valid {
            report.warn("Operation timeout is not positive, using default");
        }
        report.checks.push(ValidationCheck {
            level: CheckLevel::Builtin,
            name: "timeout_valid".to_string(),
            passed: timeout_valid,
            error: None,
        });
    }

    fn validators_at(&self, level: ValidationLevel) -> Vec<ValidatorFn> {
        self.validators
            .read()
            .expect("validator registry lock poisoned")
            .get(&level)
            .cloned()
            .unwrap_or_default()
    }

    pub fn stats(&self) -> ValidatorStats {
        let registered = self
            .validators
            .read()
            .expect("validator registry lock poisoned")
            .values()
            .map(Vec::len)
            .sum();
        ValidatorStats {
            validations_performed: self.performed.load(Ordering::Relaxed),
            validations_passed: self.passed.load(Ordering::Relaxed),
            validations_failed: self.failed.load(Ordering::Relaxed),
            registered_validators: registered,
        }
    }
}

fn record_outcome(report: &mut ValidationReport, level: ValidationLevel, outcome: CheckOutcome) {
    let name = outcome.name.unwrap_or_else(|| "custom".to_string());
    if outcome.valid {
        report.pass(level.into(), name);
    } else {
        let error = outcome
            .error
            .unwrap_or_else(|| "Validation failed".to_string());
        report.fail(level.into(), name, error);
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepexec_types::config::EngineConfig;
    use serde_json::Value;

    use crate::handler::{BoxHandler, HandlerError, HandlerResult, OperationHandler};
    use crate::operation::OperationRequest;
    use deepexec_types::context::StateMap;
    use deepexec_types::operation::Args;

    fn op(level: ValidationLevel) -> Operation {
        OperationRequest::new("test-op", BoxHandler::from_fn(|_| Ok(Value::Null)))
            .validation_level(level)
            .build(&EngineConfig::default())
    }

    fn ctx(depth: u32) -> ExecutionContext {
        ExecutionContext::new("ctx-test", "test", None, depth, StateMap::new())
    }

    fn validator() -> OperationValidator {
        OperationValidator::new(10, Duration::from_millis(200))
    }

    fn names(report: &ValidationReport) -> Vec<&str> {
        report.checks.iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn builtins_pass_for_well_formed_operation() {
        let report = validator().validate(&op(ValidationLevel::Standard), &ctx(0)).await;
        assert!(report.valid);
        assert_eq!(
            names(&report),
            vec!["handler_callable", "context_depth", "timeout_valid"]
        );
        assert!(report.checks.iter().all(|c| c.level == CheckLevel::Builtin));
    }

    #[tokio::test]
    async fn levels_run_cumulatively() {
        let v = validator();
        for level in ValidationLevel::ALL {
            v.add_validator(level, move |_, _| Ok(Some(CheckOutcome::pass(level.as_str()))));
        }

        let report = v.validate(&op(ValidationLevel::Standard), &ctx(0)).await;
        let custom: Vec<_> = report
            .checks
            .iter()
            .filter(|c| c.level != CheckLevel::Builtin)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(custom, vec!["shallow", "standard"]);

        let report = v.validate(&op(ValidationLevel::Strict), &ctx(0)).await;
        assert_eq!(report.checks.len(), 4 + 3);
    }

    #[tokio::test]
    async fn failing_validator_invalidates_with_defaults() {
        let v = validator();
        v.add_validator(ValidationLevel::Shallow, |_, _| {
            Ok(Some(CheckOutcome {
                valid: false,
                name: None,
                error: None,
            }))
        });
        let report = v.validate(&op(ValidationLevel::Shallow), &ctx(0)).await;
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Validation failed".to_string()]);
        assert_eq!(report.checks[0].name, "custom");
        assert!(!report.checks[0].passed);
    }

    #[tokio::test]
    async fn no_opinion_records_nothing() {
        let v = validator();
        v.add_validator(ValidationLevel::Shallow, |_, _| Ok(None));
        let report = v.validate(&op(ValidationLevel::Shallow), &ctx(0)).await;
        assert!(report.valid);
        assert_eq!(report.checks.len(), 3);
    }

    #[tokio::test]
    async fn validator_error_and_timeout_become_warnings() {
        let v = validator();
        v.add_validator(ValidationLevel::Shallow, |_, _| Err("lookup failed".into()));
        v.add_async_validator(ValidationLevel::Standard, |_, _| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(CheckOutcome::pass("slow")))
        });

        let report = v.validate(&op(ValidationLevel::Standard), &ctx(0)).await;
        assert!(report.valid);
        assert_eq!(
            report.warnings,
            vec![
                "Validator error at shallow: lookup failed".to_string(),
                "Validator at standard timed out".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn panicking_validator_is_a_hard_failure() {
        let v = validator();
        v.add_validator(ValidationLevel::Shallow, |_, _| panic!("bad state"));
        let report = v.validate(&op(ValidationLevel::Shallow), &ctx(0)).await;
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Validation error: bad state".to_string()]);
        assert_eq!(v.stats().validations_failed, 1);
    }

    #[tokio::test]
    async fn depth_at_maximum_fails_builtin() {
        let report = validator().validate(&op(ValidationLevel::Shallow), &ctx(10)).await;
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Context depth 10 exceeds max 10".to_string()]);
        // Stops before timeout_valid.
        assert_eq!(names(&report), vec!["handler_callable", "context_depth"]);
    }

    struct Closed;

    impl OperationHandler for Closed {
        async fn invoke(&self, _args: Args) -> HandlerResult {
            Err(HandlerError::Unavailable("closed".into()))
        }

        fn available(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn unavailable_handler_stops_builtins() {
        let op = OperationRequest::new("closed", BoxHandler::new(Closed)).build(&EngineConfig::default());
        let report = validator().validate(&op, &ctx(0)).await;
        assert!(!report.valid);
        assert_eq!(names(&report), vec!["handler_callable"]);
    }

    #[tokio::test]
    async fn zero_timeout_only_warns() {
        let op = OperationRequest::new("instant", BoxHandler::from_fn(|_| Ok(Value::Null)))
            .timeout(Duration::ZERO)
            .build(&EngineConfig::default());
        let report = validator().validate(&op, &ctx(0)).await;
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
        let timeout_check = report.checks.last().unwrap();
        assert_eq!(timeout_check.name, "timeout_valid");
        assert!(!timeout_check.passed);
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_reports() {
        let v = validator();
        v.add_validator(ValidationLevel::Deep, |op, _| {
            if op.args.is_empty() {
                Ok(Some(CheckOutcome::fail("has_args", "no arguments")))
            } else {
                Ok(Some(CheckOutcome::pass("has_args")))
            }
        });
        let operation = op(ValidationLevel::Deep);
        let context = ctx(1);
        let first = v.validate(&operation, &context).await;
        let second = v.validate(&operation, &context).await;
        assert_eq!(first, second);

        let stats = v.stats();
        assert_eq!(stats.validations_performed, 2);
        assert_eq!(stats.validations_failed, 2);
        assert_eq!(stats.registered_validators, 1);
    }
}
