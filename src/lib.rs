//! # fwbuild
//!
//! Firmware build orchestration. A build request brings an uploaded source
//! tree, and `fwbuild` turns it into firmware by running the toolchain
//! container against a long-lived workspace. Repeated builds of the same
//! application reuse that workspace and only touch the files that changed,
//! so the toolchain's incremental build stays effective.
//!
//! ## Quick Example
//!
//! ```
//! use fwbuild::reconcile::{plan, ChangeKind};
//! use fwbuild::snapshot::{Snapshot, SnapshotEntry};
//!
//! let mut upload = Snapshot::new();
//! upload.insert("mos.yml", SnapshotEntry::file("h1"));
//! upload.insert("src", SnapshotEntry::dir());
//!
//! let mut workspace = Snapshot::new();
//! workspace.insert("mos.yml", SnapshotEntry::file("h0"));
//!
//! let changes = plan(&upload, &workspace);
//! assert_eq!(changes[0].1.kind(), ChangeKind::Update);
//! assert_eq!(changes[1].1.kind(), ChangeKind::Add);
//! ```
//!
//! ## Core Concepts
//!
//! - **Snapshots (`snapshot`)**: Content hashes of every file of a tree,
//!   stored next to it, so changes are detected without rehashing.
//! - **Reconciliation (`reconcile`)**: Applies the minimal set of file
//!   operations that makes a workspace match an upload.
//! - **Workspaces (`workspace`)**: Allocation, reuse and clean replacement of
//!   build directories, each held under a path lock (`lock`) while in use.
//! - **Repository caching (`repo_cache`, `provision`, `git`)**: One shared,
//!   periodically refreshed clone per dependency, and cheap private clones
//!   referencing it in every workspace.
//! - **Building (`builder`, `container`)**: The request pipeline and the
//!   containerized toolchain run.
//!
//! ## Execution Flow
//!
//! `builder::Builder::build` executes the following steps:
//!
//! 1.  **Staging**: Copy the upload under the volumes root and snapshot it.
//! 2.  **Workspace**: Allocate or reuse the workspace and take its lock.
//! 3.  **Reconcile**: Sync the upload into it, or replace it if that fails.
//! 4.  **Refresh**: Bring stale shared clones up to date.
//! 5.  **Provision**: Clone the missing private repositories in parallel.
//! 6.  **Build**: Run the toolchain container with a deadline.
//! 7.  **Record**: Save the context name and, on failure, the build log.

pub mod builder;
pub mod config;
pub mod container;
pub mod defaults;
pub mod error;
pub mod exit_codes;
pub mod git;
pub mod lock;
pub mod manifest;
pub mod provision;
pub mod reconcile;
pub mod repo_cache;
pub mod snapshot;
pub mod stage;
pub mod workspace;

#[cfg(test)]
mod reconcile_proptest;
