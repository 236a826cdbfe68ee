//! `dexec demo`: drive a three-step release chain through the engine.
//!
//! check-schema -> migrate-db -> deploy-web, all in one `release` context.
//! The migration and the deployment carry rollback handlers, so a failing
//! deployment is rolled back automatically and the rest of the context is
//! unwound afterwards.

use std::time::Duration;

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use deepexec_core::engine::DeepExecutionEngine;
use deepexec_core::handler::{BoxHandler, HandlerError};
use deepexec_core::operation::{Operation, OperationRequest};
use deepexec_observe::attrs;
use deepexec_types::audit::{AuditEntry, AuditFilter};
use deepexec_types::config::EngineConfig;
use deepexec_types::context::{ExecutionContext, ResourceKind, StateEntry, StateMap};
use deepexec_types::id;
use deepexec_types::operation::{OperationPriority, OperationResult, ValidationLevel};
use deepexec_types::stats::EngineStats;
use deepexec_types::validation::CheckOutcome;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::Instrument;

use super::status_cell;

pub struct DemoOptions {
    pub fail_deploy: bool,
    pub background: bool,
}

#[derive(Serialize)]
struct DemoStep {
    name: String,
    #[serde(flatten)]
    result: OperationResult,
}

#[derive(Serialize)]
struct DemoReport {
    context_id: String,
    steps: Vec<DemoStep>,
    /// Operations undone by the context rollback after a failure.
    unwound: Vec<String>,
    audit: Vec<AuditEntry>,
    stats: EngineStats,
}

pub async fn run_demo(config: EngineConfig, options: DemoOptions, json: bool) -> Result<()> {
    let engine = DeepExecutionEngine::new(config);
    register_validators(&engine);

    let span = tracing::info_span!(
        "demo",
        context_id = tracing::field::Empty,
        background = options.background
    );
    let report = drive(&engine, &options, &span).instrument(span.clone()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_report(&report);
    Ok(())
}

fn register_validators(engine: &DeepExecutionEngine) {
    engine.validator().add_validator(
        ValidationLevel::Deep,
        |op: &Operation, _ctx: &ExecutionContext| {
            if op.args.contains_key("from") && !op.args.contains_key("to") {
                return Ok(Some(CheckOutcome::fail(
                    "migration_target",
                    "migration target version is required",
                )));
            }
            Ok(Some(CheckOutcome::pass("migration_target")))
        },
    );
}

async fn drive(
    engine: &DeepExecutionEngine,
    options: &DemoOptions,
    span: &tracing::Span,
) -> Result<DemoReport> {
    let mut state = StateMap::new();
    state.insert(
        "schema_version".into(),
        StateEntry::new(ResourceKind::Database, json!("v1")),
    );
    state.insert(
        "web_release".into(),
        StateEntry::new(ResourceKind::Deployment, json!("2024.1")),
    );
    let ctx = engine.create_context("release", None, Some(state))?;
    span.record(attrs::CONTEXT_ID, ctx.context_id.as_str());

    let requests = release_chain(&ctx.context_id, options.fail_deploy);
    let names: Vec<String> = requests.iter().map(|r| r.name.clone()).collect();

    let mut results = Vec::with_capacity(requests.len());
    if options.background {
        engine.start();
        let handles = requests
            .into_iter()
            .map(|request| engine.submit(request))
            .collect::<Result<Vec<_>, _>>()?;
        for handle in handles {
            results.push(handle.wait().await?);
        }
        engine.stop().await;
    } else {
        for request in requests {
            results.push(engine.execute(request).await?);
        }
    }

    let unwound = if results.iter().any(|r| !r.is_success()) {
        engine.rollback_context(&ctx.context_id).await?
    } else {
        Vec::new()
    };
    engine.complete_context(&ctx.context_id)?;

    Ok(DemoReport {
        context_id: ctx.context_id.clone(),
        steps: names
            .into_iter()
            .zip(results)
            .map(|(name, result)| DemoStep { name, result })
            .collect(),
        unwound,
        audit: engine.get_audit_entries(&AuditFilter::for_context(&ctx.context_id)),
        stats: engine.get_stats(),
    })
}

fn release_chain(context_id: &str, fail_deploy: bool) -> Vec<OperationRequest> {
    let check_id = id::operation_id();
    let migrate_id = id::operation_id();

    let check = OperationRequest::new(
        "check-schema",
        BoxHandler::from_fn(|args| {
            Ok(json!({
                "schema": args.get("expected").cloned().unwrap_or(Value::Null),
                "compatible": true,
            }))
        }),
    )
    .with_id(&check_id)
    .arg("expected", "v1")
    .validation_level(ValidationLevel::Shallow);

    let migrate = OperationRequest::new(
        "migrate-db",
        BoxHandler::from_async(|args| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(json!({ "migrated_to": args.get("to").cloned().unwrap_or(Value::Null) }))
        }),
    )
    .with_id(&migrate_id)
    .depends_on(&check_id)
    .arg("from", "v1")
    .arg("to", "v2")
    .validation_level(ValidationLevel::Deep)
    .rollback(BoxHandler::from_fn(|args| {
        tracing::info!(restored = ?args.get("from"), "schema restored");
        Ok(json!({ "restored": args.get("from").cloned().unwrap_or(Value::Null) }))
    }));

    let deploy = OperationRequest::new(
        "deploy-web",
        BoxHandler::from_fn(move |args| {
            if fail_deploy {
                Err(HandlerError::failed("health check failed on web-2"))
            } else {
                Ok(json!({ "deployed": args.get("release").cloned().unwrap_or(Value::Null) }))
            }
        }),
    )
    .depends_on(&migrate_id)
    .arg("release", "2024.2")
    .arg("api_token", "not-for-the-audit-log")
    .priority(OperationPriority::High)
    .timeout(Duration::from_secs(5))
    .max_retries(1)
    .rollback(BoxHandler::from_fn(|args| {
        Ok(json!({ "reverted": args.get("release").cloned().unwrap_or(Value::Null) }))
    }));

    [check, migrate, deploy]
        .into_iter()
        .map(|request| request.in_context(context_id).user("demo"))
        .collect()
}

fn print_report(report: &DemoReport) {
    println!();
    println!(
        "  {} Release chain in {}",
        style("▶").bold(),
        style(&report.context_id).cyan()
    );
    println!();

    let mut steps = Table::new();
    steps.load_preset(presets::UTF8_FULL_CONDENSED);
    steps.set_content_arrangement(ContentArrangement::Dynamic);
    steps.set_header(vec![
        Cell::new("Operation").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Duration").fg(Color::White),
        Cell::new("Error").fg(Color::White),
    ]);
    for step in &report.steps {
        steps.add_row(vec![
            Cell::new(&step.name).fg(Color::Cyan),
            status_cell(step.result.status),
            Cell::new(format!("{:.1} ms", step.result.duration_ms)),
            Cell::new(step.result.error.as_deref().unwrap_or("")).fg(Color::DarkGrey),
        ]);
    }
    println!("{steps}");

    if !report.unwound.is_empty() {
        println!();
        println!(
            "  {} Context rollback undid {} operation(s): {}",
            style("↺").yellow().bold(),
            report.unwound.len(),
            report.unwound.join(", ")
        );
    }

    println!();
    println!("  {}", style("── Audit trail ──").dim());
    let mut audit = Table::new();
    audit.load_preset(presets::UTF8_FULL_CONDENSED);
    audit.set_content_arrangement(ContentArrangement::Dynamic);
    audit.set_header(vec![
        Cell::new("Time").fg(Color::White),
        Cell::new("Action").fg(Color::White),
        Cell::new("Operation").fg(Color::White),
        Cell::new("Status").fg(Color::White),
    ]);
    for entry in report.audit.iter().rev() {
        audit.add_row(vec![
            Cell::new(entry.timestamp.format("%H:%M:%S%.3f").to_string()).fg(Color::DarkGrey),
            Cell::new(entry.action.to_string()),
            Cell::new(&entry.operation_name).fg(Color::Cyan),
            status_cell(entry.status),
        ]);
    }
    println!("{audit}");

    let system = &report.stats.system;
    println!();
    println!("  {}", style("── Stats ──").dim());
    println!("  Operations:  {}", style(system.total_operations).bold());
    println!("  Completed:   {}", style(system.successful_operations).green());
    if system.failed_operations > 0 {
        println!("  Failed:      {}", style(system.failed_operations).red());
    }
    if system.rolled_back_operations > 0 {
        println!("  Rolled back: {}", style(system.rolled_back_operations).yellow());
    }
    println!(
        "  Checkpoints: {}  Rollback plans: {}",
        report.stats.rollback.total_checkpoints, report.stats.rollback.total_rollbacks
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepexec_types::operation::OperationStatus;

    #[test]
    fn chain_is_linked_by_dependencies() {
        let chain = release_chain("ctx-test", false);
        assert_eq!(chain.len(), 3);
        assert!(chain[0].dependencies.is_empty());
        assert_eq!(chain[1].dependencies, vec![chain[0].operation_id.clone().unwrap()]);
        assert_eq!(chain[2].dependencies, vec![chain[1].operation_id.clone().unwrap()]);
        assert!(chain.iter().all(|r| r.context_id.as_deref() == Some("ctx-test")));
    }

    #[tokio::test]
    async fn demo_succeeds_inline() {
        let engine = DeepExecutionEngine::new(EngineConfig::default());
        register_validators(&engine);
        let options = DemoOptions {
            fail_deploy: false,
            background: false,
        };
        let report = drive(&engine, &options, &tracing::Span::none()).await.unwrap();

        assert!(report.steps.iter().all(|s| s.result.status == OperationStatus::Completed));
        assert!(report.unwound.is_empty());
        assert_eq!(report.stats.system.successful_operations, 3);
        assert!(engine.get_context(&report.context_id).unwrap().is_completed());
    }

    #[tokio::test]
    async fn failed_deploy_rolls_back_and_unwinds() {
        let engine = DeepExecutionEngine::new(EngineConfig::default());
        register_validators(&engine);
        let options = DemoOptions {
            fail_deploy: true,
            background: true,
        };
        let report = drive(&engine, &options, &tracing::Span::none()).await.unwrap();

        assert_eq!(report.steps[2].result.status, OperationStatus::RolledBack);
        assert_eq!(report.unwound, vec![report.steps[1].result.operation_id.clone()]);
        assert!(!engine.is_running());

        // Credentials never reach the audit trail.
        let rendered = serde_json::to_string(&report.audit).unwrap();
        assert!(!rendered.contains("not-for-the-audit-log"));
    }
}
