//! # Error Handling
//!
//! This module defines the centralized error type for `fwbuild`. It uses the
//! `thiserror` library to build an `Error` enum whose variants name the build
//! phase that failed together with the path or origin involved, so that a
//! failure can be diagnosed from its message alone.
//!
//! ## Key Components
//!
//! - **`Error`**: Every infrastructure failure the library can report. A
//!   compile failure inside the container is *not* an `Error`; it is reported
//!   through `builder::BuildStatus` so that callers never confuse "your code
//!   didn't compile" with "the build system is broken".
//!
//! - **`Result<T>`**: A type alias for `std::result::Result<T, Error>`.

use std::path::Path;

use thiserror::Error;

/// Main error type for fwbuild operations
#[derive(Error, Debug)]
pub enum Error {
    /// The advisory lock file for a path could not be created or locked.
    #[error("Lock error for {path}: {message}")]
    Lock { path: String, message: String },

    /// A workspace snapshot could not be computed, read or written.
    #[error("Snapshot error for {path}: {message}")]
    Snapshot { path: String, message: String },

    /// A filesystem mutation failed while reconciling a workspace.
    #[error("Reconcile error ({action} {path}): {source}")]
    Reconcile {
        action: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The workspace no longer matches its own manifest after reconciliation.
    #[error("Workspace {path} diverged from its manifest: {}", diverged.join(", "))]
    Diverged { path: String, diverged: Vec<String> },

    /// The build workspace could not be allocated or prepared.
    #[error("Workspace error for {path}: {message}")]
    Workspace { path: String, message: String },

    /// An error occurred while cloning a Git repository.
    #[error("Git clone error for {url} into {target}: {message}")]
    GitClone {
        url: String,
        target: String,
        message: String,
    },

    /// An error occurred while executing a Git command.
    #[error("Git command failed in {path}: {command} - {stderr}")]
    GitCommand {
        command: String,
        path: String,
        stderr: String,
    },

    /// A stale shared repository could not be pulled, and re-cloning it from
    /// scratch failed as well.
    #[error("Shared repository {path} ({origin}) could not be repaired: {message}")]
    SharedRepoRepair {
        origin: String,
        path: String,
        message: String,
    },

    /// The container backend could not be started or waited on.
    #[error("Container error: {message}")]
    Container { message: String },

    /// The container exceeded its deadline and was killed.
    #[error("Container timed out after {seconds}s")]
    ContainerTimeout { seconds: u64 },

    /// The application manifest is missing required data or is unsafe.
    #[error("Manifest error: {message}")]
    Manifest { message: String },

    /// The build request itself is invalid.
    #[error("Invalid build request: {message}")]
    InvalidRequest { message: String },

    /// An error indicating that a mutex has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A directory walk error, wrapped from `walkdir::Error`.
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// The clone worker pool could not be created.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    pub(crate) fn snapshot(path: &Path, message: impl Into<String>) -> Self {
        Error::Snapshot {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn workspace(path: &Path, message: impl Into<String>) -> Self {
        Error::Workspace {
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
