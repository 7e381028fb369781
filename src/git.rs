//! # Git Backend
//!
//! Repository clones and refreshes go through the `GitOperations` trait so
//! that the shared cache and the provisioner can be exercised in tests with
//! a mock that records calls instead of touching the network.
//!
//! `ShellGit` is the production implementation. It shells out to the system
//! `git` binary, which automatically picks up:
//! - SSH keys from ~/.ssh/
//! - Git credential helpers
//! - Any authentication configured in ~/.gitconfig

use std::path::Path;
use std::process::Command;

use log::debug;

use crate::error::{Error, Result};

/// Trait for git operations - allows mocking in tests
pub trait GitOperations: Send + Sync {
    /// Clones `url` into `target_dir`, which must be absent or empty.
    ///
    /// When `reference` is given, the clone borrows objects from that local
    /// repository instead of storing its own copy of the history.
    fn clone_repo(&self, url: &str, target_dir: &Path, reference: Option<&Path>) -> Result<()>;

    /// Pulls the current branch of the working copy at `repo_dir`.
    fn pull(&self, repo_dir: &Path) -> Result<()>;
}

/// `GitOperations` backed by the system `git` command
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellGit;

impl GitOperations for ShellGit {
    fn clone_repo(&self, url: &str, target_dir: &Path, reference: Option<&Path>) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.arg("clone");
        if let Some(reference) = reference {
            cmd.arg("--reference").arg(reference);
        }
        cmd.arg(url).arg(target_dir);
        debug!("Running {:?}", cmd);

        let output = cmd.output().map_err(|e| Error::GitClone {
            url: url.to_string(),
            target: target_dir.display().to_string(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::GitClone {
                url: url.to_string(),
                target: target_dir.display().to_string(),
                message: clone_failure_message(&stderr),
            });
        }

        Ok(())
    }

    fn pull(&self, repo_dir: &Path) -> Result<()> {
        let output = Command::new("git")
            .arg("-C")
            .arg(repo_dir)
            .args(["pull", "--ff-only"])
            .output()
            .map_err(|e| Error::GitCommand {
                command: "pull".to_string(),
                path: repo_dir.display().to_string(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::GitCommand {
                command: "pull".to_string(),
                path: repo_dir.display().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

// Provide a helpful message for the common auth failures.
fn clone_failure_message(stderr: &str) -> String {
    if stderr.contains("Authentication failed")
        || stderr.contains("Permission denied")
        || stderr.contains("Could not read from remote repository")
    {
        format!(
            "Authentication failed. Make sure the build host has access to the repository.\n\
            Error: {}",
            stderr.trim()
        )
    } else {
        stderr.trim().to_string()
    }
}
