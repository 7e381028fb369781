//! # Build Configuration
//!
//! `BuildConfig` gathers every tunable of the build pipeline: where persistent
//! state lives, which toolchain image runs the build, and the time and
//! parallelism limits. It starts from the values in `defaults` and is adjusted
//! with builder-style setters, which is how the CLI maps its flags onto it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::defaults;
use crate::error::{Error, Result};

/// The core repository provisioned into every workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreRepo {
    pub name: String,
    pub origin: String,
}

impl Default for CoreRepo {
    fn default() -> Self {
        Self {
            name: defaults::CORE_REPO_NAME.to_string(),
            origin: defaults::CORE_REPO_ORIGIN.to_string(),
        }
    }
}

/// Tunables of the build pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Root of shared clones, staged uploads and app workspaces
    pub volumes_dir: PathBuf,
    /// Toolchain container image
    pub image: String,
    /// Docker-compatible CLI used to run the image
    pub docker_binary: PathBuf,
    /// Minimum time between two refreshes of a shared clone
    pub refresh_interval: Duration,
    /// Deadline of the container run
    pub container_timeout: Duration,
    /// Maximum number of private clones prepared concurrently
    pub max_parallel_clones: usize,
    /// Re-check the workspace against its manifest after reconciling
    pub verify_reconcile: bool,
    pub core_repo: CoreRepo,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            volumes_dir: defaults::default_volumes_dir(),
            image: defaults::DEFAULT_IMAGE.to_string(),
            docker_binary: PathBuf::from(defaults::DEFAULT_DOCKER_BINARY),
            refresh_interval: defaults::default_refresh_interval(),
            container_timeout: defaults::default_container_timeout(),
            max_parallel_clones: defaults::default_max_parallel_clones(),
            verify_reconcile: false,
            core_repo: CoreRepo::default(),
        }
    }
}

impl BuildConfig {
    pub fn with_volumes_dir(mut self, volumes_dir: impl Into<PathBuf>) -> Self {
        self.volumes_dir = volumes_dir.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_docker_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.docker_binary = binary.into();
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_container_timeout(mut self, timeout: Duration) -> Self {
        self.container_timeout = timeout;
        self
    }

    /// Sets the clone parallelism; zero is raised to one.
    pub fn with_max_parallel_clones(mut self, max: usize) -> Self {
        self.max_parallel_clones = max.max(1);
        self
    }

    pub fn with_verify_reconcile(mut self, verify: bool) -> Self {
        self.verify_reconcile = verify;
        self
    }

    pub fn with_core_repo(mut self, name: impl Into<String>, origin: impl Into<String>) -> Self {
        self.core_repo = CoreRepo {
            name: name.into(),
            origin: origin.into(),
        };
        self
    }

    /// Canonical location of the shared clone named `name`
    pub fn shared_repo_path(&self, name: &str) -> PathBuf {
        self.volumes_dir.join(name)
    }

    /// Where uploads are staged before reconciliation
    pub fn staging_root(&self) -> &Path {
        &self.volumes_dir
    }
}

/// Parse a duration string like "30m", "1h", "90s", "1.5h" into a Duration.
///
/// Supported units: s, m, h, d, w (and long forms like "minutes").
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();
    let invalid = |message: String| Error::InvalidRequest { message };

    if duration_str.is_empty() {
        return Err(invalid("Duration string cannot be empty".to_string()));
    }

    // Find the split point between number and unit
    let split_idx = duration_str
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(duration_str.len());

    if split_idx == 0 {
        return Err(invalid("Duration must start with a number".to_string()));
    }

    let number_str = &duration_str[..split_idx];
    let unit_str = &duration_str[split_idx..];

    let number: f64 = number_str
        .parse()
        .map_err(|_| invalid(format!("Invalid number in duration: '{}'", number_str)))?;

    let seconds = match unit_str {
        "" | "s" | "sec" | "second" | "seconds" => number,
        "m" | "min" | "minute" | "minutes" => number * 60.0,
        "h" | "hr" | "hour" | "hours" => number * 3600.0,
        "d" | "day" | "days" => number * 86400.0,
        "w" | "week" | "weeks" => number * 604800.0,
        _ => {
            return Err(invalid(format!(
                "Invalid duration unit: '{}'. Valid units: s, m, h, d, w",
                unit_str
            )));
        }
    };

    Duration::try_from_secs_f64(seconds)
        .map_err(|e| invalid(format!("Duration '{}' is out of range: {}", duration_str, e)))
}
