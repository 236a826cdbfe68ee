//! CLI command definitions for the `dexec` binary.

pub mod config;
pub mod demo;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Color};
use deepexec_types::operation::OperationStatus;

/// Drive the deep execution engine from the command line.
#[derive(Parser)]
#[command(name = "dexec", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to deepexec.toml (defaults to the platform config directory).
    #[arg(long, global = true, env = "DEEPEXEC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write log lines as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a sample release chain: schema check, migration, deployment.
    Demo {
        /// Make the deployment step fail so the rollback path runs.
        #[arg(long)]
        fail_deploy: bool,

        /// Queue the chain on the background loop instead of executing inline.
        #[arg(long)]
        background: bool,
    },

    /// Print the effective engine configuration.
    Config,
}

/// Colored status cell shared by the result and audit tables.
pub(crate) fn status_cell(status: OperationStatus) -> Cell {
    match status {
        OperationStatus::Completed => Cell::new("● completed").fg(Color::Green),
        OperationStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
        OperationStatus::RolledBack => Cell::new("↺ rolled_back").fg(Color::Yellow),
        OperationStatus::Cancelled => Cell::new("○ cancelled").fg(Color::DarkGrey),
        other => Cell::new(format!("… {other}")).fg(Color::Blue),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_demo_flags() {
        let cli = Cli::try_parse_from(["dexec", "--json", "demo", "--fail-deploy"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Demo {
                fail_deploy,
                background,
            } => {
                assert!(fail_deploy);
                assert!(!background);
            }
            Commands::Config => panic!("expected demo"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["dexec", "config", "-vv", "--config", "/tmp/x.toml"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
        assert!(matches!(cli.command, Commands::Config));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["dexec"]).is_err());
    }
}
