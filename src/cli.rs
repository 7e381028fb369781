//! CLI argument parsing and command dispatch

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// fwbuild - Incremental firmware builds in reusable workspaces
#[derive(Parser, Debug)]
#[command(name = "fwbuild")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Set log level (error, warn, info, debug, trace)
    ///
    /// RUST_LOG, when set, takes precedence.
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build firmware from an unpacked source tree
    Build(commands::build::BuildArgs),

    /// Print the snapshot of a directory
    Snapshot(commands::snapshot::SnapshotArgs),

    /// Refresh the shared clone of a repository
    Refresh(commands::refresh::RefreshArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<ExitCode> {
        init_logging(&self.log_level);

        match self.command {
            Commands::Build(args) => commands::build::execute(args),
            Commands::Snapshot(args) => commands::snapshot::execute(args),
            Commands::Refresh(args) => commands::refresh::execute(args),
        }
    }
}

fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // Logs go to stderr; stdout is kept for command results.
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}
