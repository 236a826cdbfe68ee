//! Deep execution engine command-line driver.
//!
//! Binary name: `dexec`
//!
//! Parses CLI arguments, initializes tracing, loads `deepexec.toml`, then
//! dispatches to the command handler.

mod cli;

use clap::Parser;
use deepexec_infra::config::{default_config_path, load_engine_config};
use deepexec_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let default_filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,deepexec_core=debug",
        _ => "trace",
    };
    init_tracing(&TracingOptions {
        default_filter: default_filter.to_string(),
        json: cli.log_json,
        enable_otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_engine_config(&config_path).await;
    tracing::debug!(path = %config_path.display(), name = %config.name, "configuration loaded");

    let outcome = match cli.command {
        Commands::Demo {
            fail_deploy,
            background,
        } => {
            cli::demo::run_demo(
                config,
                cli::demo::DemoOptions {
                    fail_deploy,
                    background,
                },
                cli.json,
            )
            .await
        }
        Commands::Config => cli::config::show_config(&config, &config_path, cli.json),
    };

    shutdown_tracing();
    outcome
}
