//! Default values for fwbuild configuration.
//!
//! This module provides centralized default values used by `BuildConfig` and
//! the CLI, ensuring consistency and avoiding duplication.

use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for the default clone parallelism.
const MAX_DEFAULT_PARALLEL_CLONES: usize = 8;

/// Name of the core firmware repository.
pub const CORE_REPO_NAME: &str = "mongoose-os";

/// Origin of the core firmware repository.
pub const CORE_REPO_ORIGIN: &str = "https://github.com/cesanta/mongoose-os";

/// Toolchain image used for builds.
pub const DEFAULT_IMAGE: &str = "docker.cesanta.com/mos:latest";

/// Docker CLI, looked up in `PATH`.
pub const DEFAULT_DOCKER_BINARY: &str = "docker";

/// Build target passed to the toolchain when none is requested.
pub const DEFAULT_BUILD_TARGET: &str = "all";

/// Returns the default root of all persistent build state.
///
/// This can be overridden by the `--volumes-dir` CLI flag or the
/// `FWBUILD_VOLUMES_DIR` environment variable.
pub fn default_volumes_dir() -> PathBuf {
    PathBuf::from("/var/tmp/fwbuild-volumes")
}

/// How long a shared clone stays fresh after it was last refreshed.
pub fn default_refresh_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

/// Hard deadline of a single container run.
pub fn default_container_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Number of private clones prepared at once: one per CPU, capped.
pub fn default_max_parallel_clones() -> usize {
    num_cpus::get().clamp(1, MAX_DEFAULT_PARALLEL_CLONES)
}
