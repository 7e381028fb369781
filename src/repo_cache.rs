//! # Shared Repository Cache
//!
//! Each external dependency has one canonical clone under the volumes root,
//! shared by every build workspace. Private clones reference its object
//! store, so it must stay reasonably current and must never be observed
//! half-written.
//!
//! ## Refresh policy
//!
//! - The last refresh time is the mtime of the clone directory, so it survives
//!   process restarts.
//! - An entry younger than the refresh interval is left alone, without taking
//!   the lock or touching the network.
//! - Otherwise, under the path lock:
//!   - a missing clone is cloned into a staged sibling and published with an
//!     atomic rename;
//!   - a stale clone is pulled.
//! - A failed pull is treated as local corruption. The clone is deleted and
//!   cloned again, exactly once. If that second clone fails too, the error is
//!   returned.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::git::GitOperations;
use crate::lock::LockManager;
use crate::stage::{remove_path, StagedDir};

/// What `ensure_fresh` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The clone did not exist and was created.
    Cloned,
    /// The clone was stale and has been pulled.
    Pulled,
    /// Pulling failed; the clone was deleted and cloned from scratch.
    Repaired,
    /// The clone was refreshed recently enough.
    UpToDate,
}

/// Maintains the canonical shared clones
pub struct SharedRepoCache {
    git: Arc<dyn GitOperations>,
    locks: Arc<LockManager>,
    refresh_interval: Duration,
}

impl SharedRepoCache {
    pub fn new(
        git: Arc<dyn GitOperations>,
        locks: Arc<LockManager>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            git,
            locks,
            refresh_interval,
        }
    }

    /// Makes sure `shared_path` holds a clone of `origin` that was refreshed
    /// within the refresh interval.
    pub fn ensure_fresh(&self, origin: &str, shared_path: &Path) -> Result<RefreshOutcome> {
        if self.is_fresh(shared_path)? {
            info!(
                "Repository {} is updated recently enough, don't touch it",
                shared_path.display()
            );
            return Ok(RefreshOutcome::UpToDate);
        }

        if let Some(parent) = shared_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = self.locks.acquire(shared_path)?;
        let _guard = lock.lock()?;

        // Somebody else may have refreshed it while we were waiting.
        match last_refreshed(shared_path)? {
            None => {
                self.clone_into_place(origin, shared_path)?;
                Ok(RefreshOutcome::Cloned)
            }
            Some(at) if !self.is_stale(at) => {
                debug!("{} was refreshed while waiting for the lock", shared_path.display());
                Ok(RefreshOutcome::UpToDate)
            }
            Some(_) => self.pull_or_repair(origin, shared_path),
        }
    }

    /// Check if `shared_path` exists and was refreshed within the interval
    pub fn is_fresh(&self, shared_path: &Path) -> Result<bool> {
        Ok(last_refreshed(shared_path)?.is_some_and(|at| !self.is_stale(at)))
    }

    fn is_stale(&self, refreshed_at: SystemTime) -> bool {
        SystemTime::now()
            .duration_since(refreshed_at)
            .map(|age| age > self.refresh_interval)
            .unwrap_or(false)
    }

    fn pull_or_repair(&self, origin: &str, shared_path: &Path) -> Result<RefreshOutcome> {
        info!("Pulling {}", shared_path.display());
        match self.git.pull(shared_path) {
            Ok(()) => {
                touch(shared_path)?;
                Ok(RefreshOutcome::Pulled)
            }
            Err(pull_err) => {
                warn!(
                    "Pulling {} has FAILED ({}), deleting and cloning a fresh copy",
                    shared_path.display(),
                    pull_err
                );
                remove_path(shared_path)?;
                self.clone_into_place(origin, shared_path)
                    .map_err(|e| Error::SharedRepoRepair {
                        origin: origin.to_string(),
                        path: shared_path.display().to_string(),
                        message: e.to_string(),
                    })?;
                Ok(RefreshOutcome::Repaired)
            }
        }
    }

    fn clone_into_place(&self, origin: &str, shared_path: &Path) -> Result<()> {
        info!(
            "Cloning {} to a shared location {}",
            origin,
            shared_path.display()
        );
        let staged = StagedDir::beside(shared_path)?;
        self.git.clone_repo(origin, staged.path(), None)?;
        staged.publish(shared_path)?;
        touch(shared_path)
    }
}

/// Modification time of `path`, or `None` if it does not exist.
pub fn last_refreshed(path: &Path) -> Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Stamps the current time as the modification time of `path`.
pub fn touch(path: &Path) -> Result<()> {
    filetime::set_file_mtime(path, FileTime::now())?;
    Ok(())
}
