//! # Snapshot Command Implementation
//!
//! This module implements the `snapshot` subcommand, which prints the
//! content-hash snapshot of a directory in the same JSON layout as the
//! `build_ctx_info.json` sidecar. With `--write` the sidecar is persisted too,
//! which is handy for seeding or inspecting a workspace by hand.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use fwbuild::exit_codes;
use fwbuild::snapshot::{sidecar_path, Snapshot};

/// Print the snapshot of a directory
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Directory to snapshot
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Also store the snapshot as the directory's sidecar file
    #[arg(long)]
    pub write: bool,

    /// Compare the directory against its stored sidecar instead
    #[arg(long, conflicts_with = "write")]
    pub verify: bool,
}

/// Execute the snapshot command
pub fn execute(args: SnapshotArgs) -> Result<ExitCode> {
    if !args.dir.is_dir() {
        anyhow::bail!("Not a directory: {}", args.dir.display());
    }

    if args.verify {
        let recorded = Snapshot::read(&args.dir)?.with_context(|| {
            format!("No sidecar found at {}", sidecar_path(&args.dir).display())
        })?;
        let diverged = recorded.verify(&args.dir)?;
        if diverged.is_empty() {
            println!("{} matches its snapshot", args.dir.display());
            return Ok(ExitCode::from(exit_codes::SUCCESS));
        }
        for path in &diverged {
            println!("diverged: {}", path);
        }
        return Ok(ExitCode::from(exit_codes::ERROR));
    }

    let snapshot = Snapshot::compute(&args.dir)
        .with_context(|| format!("Failed to snapshot {}", args.dir.display()))?;
    if args.write {
        snapshot.write(&args.dir)?;
        log::info!("Wrote {}", sidecar_path(&args.dir).display());
    }
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(ExitCode::from(exit_codes::SUCCESS))
}
