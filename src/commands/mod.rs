//! # CLI Command Implementations
//!
//! This module contains the implementation for each subcommand of the `fwbuild`
//! command-line tool. Each subcommand is defined in its own file to keep the
//! logic separated and maintainable.
//!
//! ## Structure
//!
//! Each command module typically contains:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`.
//! - An `execute` function that takes the parsed `Args` and performs the
//!   command's logic.
//!
//! Commands that touch the volumes root share the `ConfigArgs` flags, which map
//! onto `fwbuild::config::BuildConfig`.

pub mod build;
pub mod refresh;
pub mod snapshot;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fwbuild::config::{parse_duration, BuildConfig};

/// Flags shared by every command that works on the volumes root
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Root directory of shared clones and build workspaces
    #[arg(long, value_name = "DIR", env = "FWBUILD_VOLUMES_DIR")]
    pub volumes_dir: Option<PathBuf>,

    /// Toolchain container image
    #[arg(long, value_name = "IMAGE", env = "FWBUILD_IMAGE")]
    pub image: Option<String>,

    /// Docker-compatible CLI used to run the image
    #[arg(long, value_name = "PATH", env = "FWBUILD_DOCKER")]
    pub docker: Option<PathBuf>,

    /// Minimum time between refreshes of a shared clone
    ///
    /// Duration format: number followed by unit (s, m, h, d, w)
    /// Examples: "30m", "1h"
    #[arg(long, value_name = "DURATION", env = "FWBUILD_REFRESH_INTERVAL")]
    pub refresh_interval: Option<String>,

    /// Deadline of the toolchain container run (e.g. "5m")
    #[arg(long, value_name = "DURATION", env = "FWBUILD_CONTAINER_TIMEOUT")]
    pub container_timeout: Option<String>,

    /// Maximum number of private clones prepared in parallel
    #[arg(long, value_name = "N", env = "FWBUILD_MAX_PARALLEL_CLONES")]
    pub max_parallel_clones: Option<usize>,

    /// Check the workspace against its snapshot after every incremental sync
    #[arg(long, env = "FWBUILD_VERIFY_RECONCILE")]
    pub verify_reconcile: bool,

    /// Origin of the core repository provisioned into every workspace
    #[arg(long, value_name = "URL", env = "FWBUILD_CORE_REPO")]
    pub core_repo: Option<String>,
}

impl ConfigArgs {
    /// Applies the given flags on top of the defaults.
    pub fn to_config(&self) -> Result<BuildConfig> {
        let mut config = BuildConfig::default().with_verify_reconcile(self.verify_reconcile);

        if let Some(dir) = &self.volumes_dir {
            config = config.with_volumes_dir(dir);
        }
        if let Some(image) = &self.image {
            config = config.with_image(image);
        }
        if let Some(docker) = &self.docker {
            config = config.with_docker_binary(docker);
        }
        if let Some(interval) = &self.refresh_interval {
            let interval = parse_duration(interval)
                .with_context(|| format!("Invalid --refresh-interval '{}'", interval))?;
            config = config.with_refresh_interval(interval);
        }
        if let Some(timeout) = &self.container_timeout {
            let timeout = parse_duration(timeout)
                .with_context(|| format!("Invalid --container-timeout '{}'", timeout))?;
            config = config.with_container_timeout(timeout);
        }
        if let Some(max) = self.max_parallel_clones {
            config = config.with_max_parallel_clones(max);
        }
        if let Some(origin) = &self.core_repo {
            let name = config.core_repo.name.clone();
            config = config.with_core_repo(name, origin);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn empty() -> ConfigArgs {
        ConfigArgs {
            volumes_dir: None,
            image: None,
            docker: None,
            refresh_interval: None,
            container_timeout: None,
            max_parallel_clones: None,
            verify_reconcile: false,
            core_repo: None,
        }
    }

    #[test]
    fn test_defaults_without_flags() {
        assert_eq!(empty().to_config().unwrap(), BuildConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = ConfigArgs {
            volumes_dir: Some(PathBuf::from("/srv/volumes")),
            refresh_interval: Some("10m".to_string()),
            container_timeout: Some("90s".to_string()),
            max_parallel_clones: Some(3),
            verify_reconcile: true,
            ..empty()
        };
        let config = args.to_config().unwrap();

        assert_eq!(config.volumes_dir, PathBuf::from("/srv/volumes"));
        assert_eq!(config.refresh_interval, Duration::from_secs(600));
        assert_eq!(config.container_timeout, Duration::from_secs(90));
        assert_eq!(config.max_parallel_clones, 3);
        assert!(config.verify_reconcile);
    }

    #[test]
    fn test_invalid_duration_names_the_flag() {
        let args = ConfigArgs {
            refresh_interval: Some("soon".to_string()),
            ..empty()
        };
        let err = args.to_config().unwrap_err();
        assert!(err.to_string().contains("--refresh-interval"));
    }

    #[test]
    fn test_overflowing_duration_is_an_error() {
        let args = ConfigArgs {
            container_timeout: Some("99999999999999999999w".to_string()),
            ..empty()
        };
        let err = args.to_config().unwrap_err();
        assert!(err.to_string().contains("--container-timeout"));
    }
}
