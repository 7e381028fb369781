//! # Build Command Implementation
//!
//! This module implements the `build` subcommand, which runs one build
//! request against the volumes root.
//!
//! ## Exit Codes
//!
//! - `0`: the firmware was built
//! - `1`: the build could not be run (bad input, git, filesystem, docker)
//! - `3`: the build ran and the firmware did not compile
//!
//! The workspace directory and context name are printed on stdout in both
//! the success and the compile-failure case, so the caller can collect
//! `build/` and pass `--context` on the next request.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use fwbuild::builder::{BuildOutcome, BuildRequest, BuildStatus, Builder};
use fwbuild::error::Error;
use fwbuild::exit_codes;
use fwbuild::manifest::MANIFEST_FILE;

use super::ConfigArgs;
use crate::suggestions;

/// Build firmware from an unpacked source tree
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Unpacked application sources
    #[arg(long, value_name = "DIR")]
    pub sources: PathBuf,

    /// Manifest to read instead of <SOURCES>/mos.yml
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Context name returned by a previous build, to reuse its workspace
    #[arg(long, value_name = "ID")]
    pub context: Option<String>,

    /// Discard any existing workspace and build from scratch
    #[arg(long)]
    pub clean: bool,

    /// Build target passed to the toolchain
    #[arg(long, value_name = "TARGET", default_value = "all")]
    pub build_target: String,

    /// Prefer prebuilt library binaries over building them from source
    #[arg(long)]
    pub prefer_prebuilt_libs: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Execute the build command
pub fn execute(args: BuildArgs) -> Result<ExitCode> {
    if !args.sources.is_dir() {
        return Err(suggestions::sources_not_found(&args.sources));
    }
    let config = args.config.to_config()?;
    let builder = Builder::new(config);

    let mut request = BuildRequest::new(&args.sources)
        .with_clean(args.clean)
        .with_build_target(args.build_target.as_str())
        .with_prefer_prebuilt_libs(args.prefer_prebuilt_libs);
    if let Some(context) = &args.context {
        request = request.with_context(context.as_str());
    }
    if let Some(manifest) = &args.manifest {
        request = request.with_manifest(manifest);
    }

    let outcome = builder.build(&request).map_err(|e| explain(e, &args))?;
    print_outcome(&outcome, args.json)?;

    Ok(match outcome.status {
        BuildStatus::Succeeded => ExitCode::from(exit_codes::SUCCESS),
        BuildStatus::CompileFailed { .. } => ExitCode::from(exit_codes::BUILD_FAILED),
    })
}

fn explain(error: Error, args: &BuildArgs) -> anyhow::Error {
    match &error {
        Error::Manifest { .. } => {
            let path = args
                .manifest
                .clone()
                .unwrap_or_else(|| args.sources.join(MANIFEST_FILE));
            suggestions::manifest_invalid(&path, &error)
        }
        Error::Container { .. } => suggestions::container_unavailable(&error),
        Error::ContainerTimeout { .. } => suggestions::container_timed_out(&error),
        Error::GitClone { .. } | Error::SharedRepoRepair { .. } => {
            suggestions::repository_unavailable(&error)
        }
        _ => anyhow::Error::new(error).context("Build failed"),
    }
}

fn print_outcome(outcome: &BuildOutcome, json: bool) -> Result<()> {
    let status = match outcome.status {
        BuildStatus::Succeeded => "succeeded".to_string(),
        BuildStatus::CompileFailed { exit_code } => format!("failed (exit code {exit_code})"),
    };

    if json {
        let value = serde_json::json!({
            "workspace": outcome.workspace_dir,
            "context": outcome.context_name,
            "build_dir": outcome.build_dir(),
            "succeeded": outcome.succeeded(),
            "status": status,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Workspace: {}", outcome.workspace_dir.display());
        println!("Context:   {}", outcome.context_name);
        println!("Build:     {}", status);
    }
    Ok(())
}
