//! `dexec config`: print the effective engine configuration.

use std::path::Path;

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use deepexec_types::config::EngineConfig;
use serde_json::Value;

pub fn show_config(config: &EngineConfig, path: &Path, json: bool) -> Result<()> {
    let values = serde_json::to_value(config)?;

    if json {
        let out = serde_json::json!({
            "path": path.display().to_string(),
            "exists": path.exists(),
            "config": values,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} v{}",
        style("⚙").bold(),
        style(&config.name).cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    let source = if path.exists() {
        style(path.display().to_string()).dim()
    } else {
        style(format!("{} (not found, defaults)", path.display())).yellow()
    };
    println!("  Config: {source}");
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Setting").fg(Color::White),
        Cell::new("Value").fg(Color::White),
    ]);

    if let Value::Object(fields) = values {
        for (key, value) in fields {
            let cell = match value {
                Value::Bool(true) => Cell::new("yes").fg(Color::Green),
                Value::Bool(false) => Cell::new("no").fg(Color::Yellow),
                Value::String(s) => Cell::new(s),
                other => Cell::new(other.to_string()),
            };
            table.add_row(vec![Cell::new(key).fg(Color::Cyan), cell]);
        }
    }

    println!("{table}");
    println!();
    Ok(())
}
