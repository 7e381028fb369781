//! # Application Manifest
//!
//! The build system only needs a small slice of an application's `mos.yml`:
//! its name and target platform, which select the workspace location, and
//! the dependency lists, which select the repositories to provision. Every
//! other key is ignored here and left for the in-container tooling.

use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::lock::LOCK_SUFFIX;
use crate::workspace::{APPS_DIR, UPLOAD_PREFIX};

/// File name of the manifest at the root of an application tree
pub const MANIFEST_FILE: &str = "mos.yml";

/// A module or library the application depends on
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Dependency {
    /// Git URL of the dependency
    pub origin: String,
    /// Explicit local name, if different from the one derived from `origin`
    #[serde(default)]
    pub name: Option<String>,
}

impl Dependency {
    /// Local name: the explicit one, or the last path segment of `origin`
    /// without a trailing `.git`. Either must pass `check_repo_name`.
    pub fn name(&self) -> Result<String> {
        if let Some(name) = &self.name {
            check_repo_name(name)?;
            return Ok(name.clone());
        }
        let last_segment = match Url::parse(&self.origin) {
            Ok(url) => url
                .path_segments()
                .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
                .map(str::to_string),
            // Plain paths and scp-like `git@host:org/repo` origins.
            Err(_) => self
                .origin
                .trim_end_matches('/')
                .rsplit(['/', ':'])
                .next()
                .map(str::to_string),
        };
        let name = last_segment
            .map(|s| s.trim_end_matches(".git").to_string())
            .unwrap_or_default();
        if name.is_empty() {
            return Err(Error::Manifest {
                message: format!("cannot derive a name from origin {:?}", self.origin),
            });
        }
        check_repo_name(&name)?;
        Ok(name)
    }
}

/// Checks that `name` can be used as a shared clone directory directly under
/// the volumes root without aliasing anything else stored there.
///
/// A shared clone is deleted and re-cloned after a failed pull, so its name
/// must never alias other content of the volumes root.
pub fn check_repo_name(name: &str) -> Result<()> {
    check_component("dependency name", name)?;
    let reserved = name == APPS_DIR
        || name.starts_with(UPLOAD_PREFIX)
        || name.starts_with('.')
        || name.ends_with(LOCK_SUFFIX);
    if reserved {
        return Err(Error::Manifest {
            message: format!("dependency name {name:?} is reserved by the volumes layout"),
        });
    }
    Ok(())
}

/// The parts of `mos.yml` the build system reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub platform: String,
    /// Pre-`platform` spelling of the same setting
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub modules: Vec<Dependency>,
    #[serde(default)]
    pub libs: Vec<Dependency>,
}

impl Manifest {
    /// Parses and validates a manifest.
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reads `mos.yml` from an application tree.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        Self::from_file(&dir.join(MANIFEST_FILE))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Manifest {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::parse(&content)
    }

    /// Target architecture, falling back to the legacy `arch` key.
    pub fn arch(&self) -> &str {
        if self.platform.is_empty() {
            &self.arch
        } else {
            &self.platform
        }
    }

    /// Checks that the values used as path components cannot escape the
    /// volumes root.
    pub fn validate(&self) -> Result<()> {
        check_component("name", &self.name)?;
        check_component("platform", self.arch())?;
        for dep in self.modules.iter().chain(&self.libs) {
            dep.name()?;
        }
        Ok(())
    }
}

fn check_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Manifest {
            message: format!("{what} is missing"),
        });
    }
    if value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(Error::Manifest {
            message: format!("{what} {value:?} is not a valid path component"),
        });
    }
    Ok(())
}
