//! # Build Orchestration
//!
//! `Builder::build` runs one build request end to end:
//!
//! 1. read the manifest, which decides where the workspace lives
//! 2. stage the uploaded sources and snapshot them
//! 3. open (allocate or reuse) the workspace and reconcile it
//! 4. refresh the shared clone of every dependency that is stale
//! 5. provision the private clones
//! 6. run the toolchain container
//! 7. record the context name, and the build log on failure
//!
//! The workspace lock is held from step 3 until the outcome is recorded.
//!
//! A build that ran but did not compile is a successful call returning
//! `BuildStatus::CompileFailed`; every `Err` is an infrastructure problem.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::config::BuildConfig;
use crate::container::{
    Bind, BindMode, ContainerExit, ContainerInvocation, ContainerRunner, DockerRunner,
};
use crate::defaults::DEFAULT_BUILD_TARGET;
use crate::error::{Error, Result};
use crate::git::{GitOperations, ShellGit};
use crate::lock::LockManager;
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::provision::{private_path, Provisioner, RepoSet, RepoSpec};
use crate::repo_cache::SharedRepoCache;
use crate::workspace::{app_root, build_contexts_root, Preparation, Upload, Workspace, WorkspaceOptions};

/// File in the build directory holding the context name
pub const BUILD_CTX_FILE: &str = "build_ctx.txt";
/// File in the build directory holding the output of a failed build
pub const BUILD_LOG_FILE: &str = "build.log";

const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const DOCKER_BINARY: &str = "/usr/bin/docker";

/// One build request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Unpacked application sources
    pub sources: PathBuf,
    /// Manifest to read instead of `<sources>/mos.yml`
    pub manifest: Option<PathBuf>,
    /// Context name returned by a previous build
    pub context: Option<String>,
    pub clean: bool,
    pub build_target: String,
    pub prefer_prebuilt_libs: bool,
}

impl BuildRequest {
    pub fn new(sources: impl Into<PathBuf>) -> Self {
        Self {
            sources: sources.into(),
            manifest: None,
            context: None,
            clean: false,
            build_target: DEFAULT_BUILD_TARGET.to_string(),
            prefer_prebuilt_libs: false,
        }
    }

    pub fn with_manifest(mut self, manifest: impl Into<PathBuf>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    /// Sets the build target; an empty target means the default one.
    pub fn with_build_target(mut self, target: impl Into<String>) -> Self {
        let target = target.into();
        self.build_target = if target.is_empty() {
            DEFAULT_BUILD_TARGET.to_string()
        } else {
            target
        };
        self
    }

    pub fn with_prefer_prebuilt_libs(mut self, prefer: bool) -> Self {
        self.prefer_prebuilt_libs = prefer;
        self
    }

    fn manifest_path(&self) -> PathBuf {
        self.manifest
            .clone()
            .unwrap_or_else(|| self.sources.join(MANIFEST_FILE))
    }
}

/// Whether the firmware compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Succeeded,
    CompileFailed { exit_code: i32 },
}

/// Result of a build that ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub workspace_dir: PathBuf,
    pub context_name: String,
    pub status: BuildStatus,
    pub preparation: Preparation,
    /// Combined toolchain output
    pub output: Vec<u8>,
}

impl BuildOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == BuildStatus::Succeeded
    }

    /// Directory holding the artifacts
    pub fn build_dir(&self) -> PathBuf {
        self.workspace_dir.join(crate::workspace::BUILD_DIR)
    }
}

/// Runs build requests
pub struct Builder {
    config: BuildConfig,
    git: Arc<dyn GitOperations>,
    runner: Arc<dyn ContainerRunner>,
    locks: Arc<LockManager>,
}

impl Builder {
    /// A builder using the system `git` and `docker`
    pub fn new(config: BuildConfig) -> Self {
        let runner =
            DockerRunner::new(config.container_timeout).with_binary(&config.docker_binary);
        Self::with_parts(config, Arc::new(ShellGit), Arc::new(runner))
    }

    pub fn with_parts(
        config: BuildConfig,
        git: Arc<dyn GitOperations>,
        runner: Arc<dyn ContainerRunner>,
    ) -> Self {
        Self {
            config,
            git,
            runner,
            locks: Arc::new(LockManager::new()),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Shared clone cache using this builder's git backend and locks
    pub fn repo_cache(&self) -> SharedRepoCache {
        SharedRepoCache::new(
            Arc::clone(&self.git),
            Arc::clone(&self.locks),
            self.config.refresh_interval,
        )
    }

    pub fn build(&self, request: &BuildRequest) -> Result<BuildOutcome> {
        let manifest = Manifest::from_file(&request.manifest_path())?;
        self.check_core_name(&manifest)?;
        let volumes = &self.config.volumes_dir;
        fs::create_dir_all(volumes).map_err(|e| Error::workspace(volumes, e.to_string()))?;

        let upload = Upload::stage(&request.sources, self.config.staging_root())?;
        let contexts_root = build_contexts_root(volumes, &manifest.name, manifest.arch());
        let options = WorkspaceOptions {
            context: request.context.clone(),
            clean: request.clean,
            verify: self.config.verify_reconcile,
        };
        let workspace = Workspace::open(&self.locks, &contexts_root, upload, &options)?;
        info!("=== Start building in {}", workspace.dir().display());

        let repos = self.dependencies(&manifest, &workspace)?;
        let cache = self.repo_cache();
        for repo in repos.iter() {
            let outcome = cache.ensure_fresh(&repo.origin, &repo.shared_path)?;
            info!("Shared repository {}: {:?}", repo.shared_path.display(), outcome);
        }
        let report = Provisioner::new(Arc::clone(&self.git), self.config.max_parallel_clones)
            .prepare_all(&repos)?;
        info!(
            "Private repositories: {} cloned, {} already present",
            report.prepared.len(),
            report.skipped.len()
        );

        let invocation = self.invocation(&manifest, &workspace, &repos, request);
        let mut output = Vec::new();
        let status = match self.runner.run(&invocation, &mut output)? {
            ContainerExit::Success => BuildStatus::Succeeded,
            ContainerExit::Failed(exit_code) => BuildStatus::CompileFailed { exit_code },
        };

        record(&workspace, status, &output)?;
        info!("=== Done building in {}", workspace.dir().display());

        Ok(BuildOutcome {
            workspace_dir: workspace.dir().to_path_buf(),
            context_name: workspace.name().to_string(),
            status,
            preparation: workspace.preparation(),
            output,
        })
    }

    /// A dependency may reuse the core repository's name only for the same origin.
    fn check_core_name(&self, manifest: &Manifest) -> Result<()> {
        let core = &self.config.core_repo;
        for dep in manifest.modules.iter().chain(&manifest.libs) {
            if dep.name()? == core.name && dep.origin != core.origin {
                return Err(Error::Manifest {
                    message: format!(
                        "dependency {} from {} would replace the core repository",
                        core.name, dep.origin
                    ),
                });
            }
        }
        Ok(())
    }

    /// The core repository first, then modules and libraries.
    fn dependencies(&self, manifest: &Manifest, workspace: &Workspace) -> Result<RepoSet> {
        let mut repos = RepoSet::new();
        let core = &self.config.core_repo;
        repos.add(RepoSpec {
            origin: core.origin.clone(),
            shared_path: self.config.shared_repo_path(&core.name),
            private_path: private_path(&workspace.modules_dir(), &core.name),
        });

        let groups = [
            (&manifest.modules, workspace.modules_dir()),
            (&manifest.libs, workspace.libs_dir()),
        ];
        for (deps, dir) in groups {
            for dep in deps.iter() {
                let name = dep.name()?;
                let spec = RepoSpec {
                    origin: dep.origin.clone(),
                    shared_path: self.config.shared_repo_path(&name),
                    private_path: private_path(&dir, &name),
                };
                if !repos.add(spec) {
                    info!("Dependency {} is listed more than once, using the first", name);
                }
            }
        }
        Ok(repos)
    }

    fn invocation(
        &self,
        manifest: &Manifest,
        workspace: &Workspace,
        repos: &RepoSet,
        request: &BuildRequest,
    ) -> ContainerInvocation {
        // The toolchain starts sibling containers through the host daemon, so
        // every path is mounted at its host location.
        let mut binds = vec![
            Bind::same_path(DOCKER_SOCKET, BindMode::ReadWrite),
            Bind::same_path(DOCKER_BINARY, BindMode::ReadOnly),
            Bind::same_path(app_root(&self.config.volumes_dir, &manifest.name), BindMode::ReadWrite),
        ];
        binds.extend(
            repos
                .iter()
                .map(|repo| Bind::same_path(&repo.shared_path, BindMode::ReadOnly)),
        );

        let path_arg = |p: &Path| p.display().to_string();
        let args = vec![
            "build".to_string(),
            "--local".to_string(),
            "--verbose".to_string(),
            "--use-shell-git".to_string(),
            "--migrate=false".to_string(),
            "--save-build-stat=false".to_string(),
            format!("--build-target={}", request.build_target),
            "--modules-dir".to_string(),
            path_arg(&workspace.modules_dir()),
            "--libs-dir".to_string(),
            path_arg(&workspace.libs_dir()),
            "--temp-dir".to_string(),
            path_arg(&workspace.tmp_dir()),
            format!("--prefer-prebuilt-libs={}", request.prefer_prebuilt_libs),
        ];

        ContainerInvocation {
            image: self.config.image.clone(),
            binds,
            workdir: workspace.dir().to_path_buf(),
            args,
        }
    }
}

fn record(workspace: &Workspace, status: BuildStatus, output: &[u8]) -> Result<()> {
    let build_dir = workspace.build_dir();
    fs::create_dir_all(&build_dir).map_err(|e| Error::workspace(&build_dir, e.to_string()))?;

    if let BuildStatus::CompileFailed { exit_code } = status {
        info!("Build failed with exit code {}, saving its output", exit_code);
        // The toolchain writes its own build.log, but not for failures that
        // happen before it gets that far.
        fs::write(build_dir.join(BUILD_LOG_FILE), output)?;
    }

    fs::write(build_dir.join(BUILD_CTX_FILE), workspace.name())?;
    Ok(())
}
