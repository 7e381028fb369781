//! # Error Suggestions
//!
//! This module provides helper functions for generating helpful error
//! messages with hints and suggestions. Following CLI recommendations,
//! errors should tell users what went wrong AND how to fix it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crate::suggestions;
//!
//! // Instead of:
//! anyhow::bail!("Sources directory not found: {}", path.display());
//!
//! // Use:
//! return Err(suggestions::sources_not_found(path));
//! ```

use std::path::Path;

use fwbuild::error::Error;

/// Generate an error for when the sources directory does not exist.
pub fn sources_not_found(path: &Path) -> anyhow::Error {
    anyhow::anyhow!(
        "Sources directory not found: {path}\n\n\
         hint: Pass the unpacked application tree with --sources <DIR>\n\
         hint: The tree must contain the application's mos.yml",
        path = path.display()
    )
}

/// Generate an error for a manifest that cannot be used.
pub fn manifest_invalid(path: &Path, error: &Error) -> anyhow::Error {
    anyhow::anyhow!(
        "Cannot use manifest {path}\n\
         error: {error}\n\n\
         hint: The manifest needs at least 'name' and 'platform' (or legacy 'arch')\n\
         hint: Use --manifest to read it from another location",
        path = path.display()
    )
}

/// Generate an error for when the container backend cannot be used.
pub fn container_unavailable(error: &Error) -> anyhow::Error {
    anyhow::anyhow!(
        "Cannot run the toolchain container\n\
         error: {error}\n\n\
         hint: Check that docker is installed and its daemon is running\n\
         hint: The current user needs access to /var/run/docker.sock"
    )
}

/// Generate an error for a container that ran past its deadline.
pub fn container_timed_out(error: &Error) -> anyhow::Error {
    anyhow::anyhow!(
        "{error}\n\n\
         hint: Raise the deadline with --container-timeout (e.g. '10m')\n\
         hint: Run the build again; shared repositories are cached by now"
    )
}

/// Generate an error for a repository that could not be cloned or repaired.
pub fn repository_unavailable(error: &Error) -> anyhow::Error {
    anyhow::anyhow!(
        "{error}\n\n\
         hint: Check that the origin URL is correct and reachable from this host\n\
         hint: Private repositories need credentials configured for the system git"
    )
}
