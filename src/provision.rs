//! # Private Repository Provisioning
//!
//! Every build workspace gets its own working clone of each dependency, with
//! its object store pointing at the shared clone (`git clone --reference`)
//! so history is not duplicated on disk.
//!
//! Missing clones are prepared in parallel on a bounded rayon pool. The call
//! returns once every task has finished, reporting the first failure
//! observed. Clones that did succeed are kept, and an existing private path is
//! always skipped, so retrying a failed build only re-attempts the missing
//! ones.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::info;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::git::GitOperations;
use crate::repo_cache::touch;
use crate::stage::StagedDir;

/// One dependency to provision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    pub origin: String,
    pub shared_path: PathBuf,
    pub private_path: PathBuf,
}

/// Ordered set of dependencies, unique by private path
#[derive(Debug, Clone, Default)]
pub struct RepoSet {
    repos: Vec<RepoSpec>,
    private_paths: HashSet<PathBuf>,
}

impl RepoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dependency. Returns `false` if its private path is already taken.
    pub fn add(&mut self, spec: RepoSpec) -> bool {
        if !self.private_paths.insert(spec.private_path.clone()) {
            return false;
        }
        self.repos.push(spec);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &RepoSpec> {
        self.repos.iter()
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}

/// Result of a successful `prepare_all`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Private paths that were cloned by this call
    pub prepared: Vec<PathBuf>,
    /// Private paths that already existed
    pub skipped: Vec<PathBuf>,
}

/// Materializes private clones
pub struct Provisioner {
    git: Arc<dyn GitOperations>,
    max_parallel: usize,
}

impl Provisioner {
    pub fn new(git: Arc<dyn GitOperations>, max_parallel: usize) -> Self {
        Self {
            git,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Clones every dependency of `repos` whose private path does not exist.
    pub fn prepare_all(&self, repos: &RepoSet) -> Result<ProvisionReport> {
        let (missing, existing): (Vec<&RepoSpec>, Vec<&RepoSpec>) =
            repos.iter().partition(|r| !r.private_path.exists());

        let mut report = ProvisionReport {
            skipped: existing.iter().map(|r| r.private_path.clone()).collect(),
            ..Default::default()
        };
        if missing.is_empty() {
            return Ok(report);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_parallel.min(missing.len()))
            .build()?;

        // Errors are pushed in completion order, so the first entry is the
        // first failure observed.
        let errors: Mutex<Vec<Error>> = Mutex::new(Vec::new());
        let prepared: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

        pool.install(|| {
            missing.par_iter().for_each(|repo| match self.prepare_one(repo) {
                Ok(()) => {
                    if let Ok(mut done) = prepared.lock() {
                        done.push(repo.private_path.clone());
                    }
                }
                Err(e) => {
                    if let Ok(mut errs) = errors.lock() {
                        errs.push(e);
                    }
                }
            });
        });

        let collected_errors = errors.into_inner().map_err(|_| Error::LockPoisoned {
            context: "provisioning errors".to_string(),
        })?;
        if let Some(first_error) = collected_errors.into_iter().next() {
            return Err(first_error);
        }

        report.prepared = prepared.into_inner().map_err(|_| Error::LockPoisoned {
            context: "provisioned paths".to_string(),
        })?;
        report.prepared.sort();
        Ok(report)
    }

    fn prepare_one(&self, repo: &RepoSpec) -> Result<()> {
        info!(
            "Cloning {} to a private location {} (referencing shared {})",
            repo.origin,
            repo.private_path.display(),
            repo.shared_path.display()
        );
        let staged = StagedDir::beside(&repo.private_path)?;
        self.git
            .clone_repo(&repo.origin, staged.path(), Some(&repo.shared_path))?;
        staged.publish(&repo.private_path)?;
        // A fresh mtime keeps the in-container tooling from pulling it again.
        touch(&repo.private_path)
    }
}

/// Private clone location of `name` under a workspace subdirectory
pub fn private_path(workspace_subdir: &Path, name: &str) -> PathBuf {
    workspace_subdir.join(name)
}
