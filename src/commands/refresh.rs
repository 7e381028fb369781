//! # Refresh Command Implementation
//!
//! This module implements the `refresh` subcommand, which brings the shared
//! clone of one repository up to date the same way a build would: nothing
//! happens if it was refreshed within the refresh interval, a missing clone
//! is cloned, a stale one is pulled, and a clone that cannot be pulled is
//! re-cloned once.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use fwbuild::exit_codes;
use fwbuild::git::ShellGit;
use fwbuild::lock::LockManager;
use fwbuild::manifest::Dependency;
use fwbuild::repo_cache::{RefreshOutcome, SharedRepoCache};

use super::ConfigArgs;
use crate::suggestions;

/// Refresh the shared clone of a repository
#[derive(Args, Debug)]
pub struct RefreshArgs {
    /// Git URL of the repository
    #[arg(long, value_name = "URL")]
    pub origin: String,

    /// Directory name of the shared clone (defaults to the last URL segment)
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Execute the refresh command
pub fn execute(args: RefreshArgs) -> Result<ExitCode> {
    let config = args.config.to_config()?;
    let name = Dependency {
        origin: args.origin.clone(),
        name: args.name.clone(),
    }
    .name()
    .context("Cannot use this repository name for a shared clone")?;

    let shared_path = config.shared_repo_path(&name);
    std::fs::create_dir_all(&config.volumes_dir).with_context(|| {
        format!(
            "Failed to create volumes directory {}",
            config.volumes_dir.display()
        )
    })?;

    let cache = SharedRepoCache::new(
        Arc::new(ShellGit),
        Arc::new(LockManager::new()),
        config.refresh_interval,
    );
    let outcome = cache
        .ensure_fresh(&args.origin, &shared_path)
        .map_err(|e| suggestions::repository_unavailable(&e))?;

    let what = match outcome {
        RefreshOutcome::Cloned => "cloned",
        RefreshOutcome::Pulled => "pulled",
        RefreshOutcome::Repaired => "re-cloned after a failed pull",
        RefreshOutcome::UpToDate => "up to date",
    };
    println!("{}: {}", shared_path.display(), what);
    Ok(ExitCode::from(exit_codes::SUCCESS))
}
