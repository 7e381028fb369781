//! Shared test utilities for integration and E2E tests.
//!
//! This module provides common fixtures and helper functions to reduce
//! duplication across test files.
//!
//! ## Usage
//!
//! Add `mod common;` to your test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new().with_app(manifests::MINIMAL);
//!     // ... test code
//! }
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Re-export commonly used test dependencies for convenience.
#[allow(unused_imports)]
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    pub use predicates::prelude::*;

    pub use super::manifests;
    pub use super::{commit_file, git_available, init_git_repo};
    pub use super::TestFixture;
}

/// Common `mos.yml` contents for testing.
#[allow(dead_code)]
pub mod manifests {
    /// Smallest manifest the build accepts.
    pub const MINIMAL: &str = "name: demo\nplatform: esp32\n";

    /// Manifest using the pre-`platform` key.
    pub const LEGACY_ARCH: &str = "name: demo\narch: cc3200\n";

    /// Manifest without an application name.
    pub const NO_NAME: &str = "platform: esp32\n";
}

/// Check that a `git` binary can be run.
///
/// Tests needing real repositories return early when it cannot.
#[allow(dead_code)]
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[allow(dead_code)]
fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.name=fwbuild",
            "-c",
            "user.email=fwbuild@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .status()
        .expect("Failed to run git");
    assert!(status.success(), "git {:?} failed in {}", args, dir.display());
}

/// Create a git repository at `dir` with one commit containing `files`.
#[allow(dead_code)]
pub fn init_git_repo(dir: &Path, files: &[(&str, &str)]) {
    std::fs::create_dir_all(dir).expect("Failed to create repository dir");
    git(dir, &["init", "--quiet"]);
    for (rel, content) in files {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create dir");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }
    git(dir, &["add", "--all"]);
    git(dir, &["commit", "--quiet", "-m", "initial"]);
}

/// Commit a new version of `file` in the repository at `dir`.
#[allow(dead_code)]
pub fn commit_file(dir: &Path, file: &str, content: &str) {
    std::fs::write(dir.join(file), content).expect("Failed to write file");
    git(dir, &["add", "--all"]);
    git(dir, &["commit", "--quiet", "-m", "update"]);
}

/// A test fixture holding an application upload, a volumes root and
/// stand-ins for git origins and the docker CLI.
///
/// # Example
///
/// ```rust,ignore
/// let fixture = TestFixture::new()
///     .with_app(manifests::MINIMAL)
///     .with_file("src/main.c", "int main(void) { return 0; }");
///
/// let mut cmd = cargo_bin_cmd!("fwbuild");
/// cmd.arg("snapshot").arg(fixture.sources()).assert().success();
/// ```
#[allow(dead_code)]
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

#[allow(dead_code)]
impl TestFixture {
    /// Create a new test fixture with an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Write the upload's `mos.yml`.
    pub fn with_app(self, manifest: &str) -> Self {
        self.temp_dir
            .child("upload/mos.yml")
            .write_str(manifest)
            .expect("Failed to write manifest");
        self
    }

    /// Add a file to the upload.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child("upload")
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    /// Unpacked application sources
    pub fn sources(&self) -> PathBuf {
        self.temp_dir.path().join("upload")
    }

    /// Volumes root handed to the command under test
    pub fn volumes(&self) -> PathBuf {
        self.temp_dir.path().join("volumes")
    }

    /// Create a git origin named `name` and return its `file://` URL.
    pub fn origin(&self, name: &str, files: &[(&str, &str)]) -> String {
        let dir = self.origin_dir(name);
        init_git_repo(&dir, files);
        format!("file://{}", dir.display())
    }

    /// Path of the origin repository created by `origin`.
    pub fn origin_dir(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join("origins").join(name)
    }

    /// Install a stand-in docker CLI running `body` as a shell script.
    ///
    /// The script receives the `docker run ...` arguments unchanged.
    #[cfg(unix)]
    pub fn fake_docker(&self, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let dir = self.temp_dir.path().join("bin");
        std::fs::create_dir_all(&dir).expect("Failed to create bin dir");
        let path = dir.join("docker");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("Failed to write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod script");
        path
    }

    /// Get the path to the temporary directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a child path in the temp directory.
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
