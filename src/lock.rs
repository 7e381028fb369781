//! Path-scoped, cross-process advisory locks
//!
//! Every mutation of a build workspace or a shared repository clone happens
//! under an exclusive `flock(2)` held on a sibling lock file
//! (`<path>.fwbuild-lock`). Because the lock lives in the filesystem rather
//! than in memory, several independent `fwbuild` processes on the same host
//! exclude each other.
//!
//! `LockManager` keeps one `PathLock` handle per path. Each call to
//! `PathLock::lock` opens its own file description, so the lock is not
//! reentrant: a second `lock()` on the same handle blocks until the first
//! guard is dropped, whether it comes from this process or another one.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fs2::FileExt;
use log::debug;

use crate::error::{Error, Result};

/// Suffix appended to a locked path to obtain its lock file.
pub const LOCK_SUFFIX: &str = ".fwbuild-lock";

/// Returns the lock file used to guard `path`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Deletes the lock file guarding `path`, if any.
pub fn remove_lock_file(path: &Path) -> Result<()> {
    match fs::remove_file(lock_path_for(path)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Process-wide registry of lock handles, keyed by path.
#[derive(Debug, Default)]
pub struct LockManager {
    handles: Mutex<HashMap<PathBuf, Arc<PathLock>>>,
}

impl LockManager {
    /// Create an empty lock manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock handle for `path`, creating it on first use.
    ///
    /// Concurrent first-time calls for the same path observe the same handle.
    pub fn acquire(&self, path: &Path) -> Result<Arc<PathLock>> {
        let mut handles = self.handles.lock().map_err(|_| Error::LockPoisoned {
            context: "lock handle cache".to_string(),
        })?;
        let handle = handles
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(PathLock::new(path)));
        Ok(Arc::clone(handle))
    }

    /// Number of distinct paths a handle has been created for
    pub fn len(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }

    /// Check if no handle has been created yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An advisory exclusive lock on one filesystem path.
#[derive(Debug)]
pub struct PathLock {
    path: PathBuf,
    lock_file: PathBuf,
}

impl PathLock {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock_file: lock_path_for(path),
        }
    }

    /// The path this lock guards
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The lock file backing this lock
    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// Blocks until the lock is held. The lock is released when the returned
    /// guard is dropped.
    pub fn lock(&self) -> Result<PathLockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_file)
            .map_err(|e| self.error(e))?;

        debug!("Waiting for lock on {}", self.path.display());
        file.lock_exclusive().map_err(|e| self.error(e))?;
        debug!("Locked {}", self.path.display());

        Ok(PathLockGuard {
            file,
            path: self.path.clone(),
        })
    }

    fn error(&self, err: io::Error) -> Error {
        Error::Lock {
            path: self.path.display().to_string(),
            message: format!("{} ({})", err, self.lock_file.display()),
        }
    }
}

/// Holds a `PathLock` until dropped.
#[derive(Debug)]
pub struct PathLockGuard {
    file: File,
    path: PathBuf,
}

impl PathLockGuard {
    /// The path held by this guard
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Unlocking {} failed: {}", self.path.display(), e);
        }
        debug!("Unlocked {}", self.path.display());
    }
}
