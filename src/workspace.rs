//! # Build Workspaces
//!
//! A workspace is the long-lived directory a build runs in. It is identified
//! by an opaque context name handed back to the client, so that the next
//! build of the same application can reuse it and only recompile what
//! changed.
//!
//! ## Layout
//!
//! ```text
//! <volumes>/apps/<app>/<arch>/build_contexts/
//!   build_ctx_Ab12Cd/               # the workspace
//!     build_ctx_info.json           # snapshot sidecar
//!     modules/  libs/  tmp/  build/
//!   build_ctx_Ab12Cd.fwbuild-lock
//! ```
//!
//! ## Lifecycle
//!
//! 1. The requested context is reused if it exists. Otherwise (no name, an
//!    illegal name, an unknown name, or a clean build) a new one is allocated.
//! 2. The workspace lock is taken and held by the returned `Workspace`.
//! 3. The upload is reconciled into it. If that fails, or if the result does
//!    not match its own snapshot when verification is on, the workspace is
//!    replaced wholesale by a fresh copy of the upload.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use regex::Regex;

use crate::error::{Error, Result};
use crate::lock::{remove_lock_file, LockManager, PathLockGuard};
use crate::reconcile::{reconcile, ReconcileStats};
use crate::snapshot::Snapshot;
use crate::stage::{copy_tree, remove_path, StagedDir};

/// Directory of all applications under the volumes root
pub const APPS_DIR: &str = "apps";
/// Directory of the workspaces of one app+arch
pub const BUILD_CONTEXTS_DIR: &str = "build_contexts";
/// Name prefix of allocated workspaces
pub const CONTEXT_PREFIX: &str = "build_ctx_";
/// Name prefix of staged uploads
pub const UPLOAD_PREFIX: &str = "tmp_src_";

pub const MODULES_DIR: &str = "modules";
pub const LIBS_DIR: &str = "libs";
pub const TMP_DIR: &str = "tmp";
pub const BUILD_DIR: &str = "build";

/// Root of everything belonging to application `app`
pub fn app_root(volumes_dir: &Path, app: &str) -> PathBuf {
    volumes_dir.join(APPS_DIR).join(app)
}

/// Directory holding the workspaces of `app` built for `arch`
pub fn build_contexts_root(volumes_dir: &Path, app: &str, arch: &str) -> PathBuf {
    app_root(volumes_dir, app).join(arch).join(BUILD_CONTEXTS_DIR)
}

/// Returns the context name if it is non-empty and legal.
///
/// Illegal names are logged and dropped rather than rejected, so a client
/// with a mangled context id still gets a (fresh) build.
pub fn sanitize_context_name(name: &str) -> Result<Option<String>> {
    let regex = Regex::new(r"^[a-zA-Z0-9_]*$").map_err(Error::Regex)?;
    if !regex.is_match(name) {
        warn!("Illegal build context name {:?}, cleaning up", name);
        return Ok(None);
    }
    Ok(Some(name.to_string()).filter(|n| !n.is_empty()))
}

/// An uploaded source tree, staged under the volumes root
///
/// The staged copy is consumed by reconciliation, so the original sources
/// are kept at hand to stage them again if a clean replacement is needed.
#[derive(Debug)]
pub struct Upload {
    sources: PathBuf,
    staging_root: PathBuf,
    staged: StagedDir,
}

impl Upload {
    /// Copies `sources` into a new stage under `staging_root` and snapshots it.
    pub fn stage(sources: &Path, staging_root: &Path) -> Result<Self> {
        let staged = Self::stage_copy(sources, staging_root)?;
        Ok(Self {
            sources: sources.to_path_buf(),
            staging_root: staging_root.to_path_buf(),
            staged,
        })
    }

    /// Where the upload is staged
    pub fn path(&self) -> &Path {
        self.staged.path()
    }

    /// The snapshot recorded when the upload was staged
    pub fn snapshot(&self) -> Result<Snapshot> {
        Snapshot::load_or_compute(self.staged.path())
    }

    fn restage(&mut self) -> Result<()> {
        self.staged = Self::stage_copy(&self.sources, &self.staging_root)?;
        Ok(())
    }

    fn stage_copy(sources: &Path, staging_root: &Path) -> Result<StagedDir> {
        if !sources.is_dir() {
            return Err(Error::InvalidRequest {
                message: format!("sources directory {} does not exist", sources.display()),
            });
        }
        let staged = StagedDir::new_in(staging_root, UPLOAD_PREFIX)?;
        let files = copy_tree(sources, staged.path())?;
        Snapshot::save(staged.path())?;
        info!(
            "Staged {} files from {} in {}",
            files,
            sources.display(),
            staged.path().display()
        );
        Ok(staged)
    }
}

/// Which workspace to use and how to prepare it
#[derive(Debug, Clone, Default)]
pub struct WorkspaceOptions {
    /// Context name from a previous build, if any
    pub context: Option<String>,
    /// Discard any existing workspace and start from the upload
    pub clean: bool,
    /// Check the reconciled workspace against its snapshot
    pub verify: bool,
}

/// How the workspace content was brought up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preparation {
    /// Only changed files were touched.
    Incremental(ReconcileStats),
    /// A clean build was requested.
    Clean,
    /// Incremental reconciliation failed and the workspace was replaced.
    Recovered,
}

/// A prepared build workspace, locked for as long as it is alive
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    name: String,
    preparation: Preparation,
    _lock: PathLockGuard,
}

impl Workspace {
    /// Allocates or reuses a workspace under `contexts_root` and brings it in
    /// line with `upload`.
    pub fn open(
        locks: &LockManager,
        contexts_root: &Path,
        mut upload: Upload,
        options: &WorkspaceOptions,
    ) -> Result<Self> {
        fs::create_dir_all(contexts_root)
            .map_err(|e| Error::workspace(contexts_root, e.to_string()))?;

        let requested = match options.context.as_deref() {
            Some(name) => sanitize_context_name(name)?,
            None => None,
        };
        let mut existing = match requested {
            Some(name) => find_existing(&contexts_root.join(name))?,
            None => None,
        };

        if options.clean {
            if let Some(old) = existing.take() {
                discard_context(locks, &old)?;
            }
        }

        let dir = match existing {
            Some(dir) => dir,
            None => allocate(contexts_root)?,
        };
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::workspace(&dir, "workspace has no name"))?;

        let lock = locks.acquire(&dir)?.lock()?;
        info!("=== Preparing build context {}", dir.display());

        let preparation = if options.clean {
            upload.staged.replace(&dir)?;
            Preparation::Clean
        } else {
            match sync(upload.path(), &dir, options.verify) {
                Ok(stats) => Preparation::Incremental(stats),
                Err(e) => {
                    warn!(
                        "Couldn't update build context incrementally: {}, resort to clean build",
                        e
                    );
                    upload.restage()?;
                    upload.staged.replace(&dir)?;
                    Preparation::Recovered
                }
            }
        };

        make_world_writable(&dir)?;
        for sub in [MODULES_DIR, LIBS_DIR, TMP_DIR] {
            let path = dir.join(sub);
            fs::create_dir_all(&path).map_err(|e| Error::workspace(&path, e.to_string()))?;
        }

        Ok(Self {
            dir,
            name,
            preparation,
            _lock: lock,
        })
    }

    /// Root of the workspace
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Context name to hand back to the client
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn preparation(&self) -> Preparation {
        self.preparation
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.dir.join(MODULES_DIR)
    }

    pub fn libs_dir(&self) -> PathBuf {
        self.dir.join(LIBS_DIR)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.dir.join(TMP_DIR)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.dir.join(BUILD_DIR)
    }
}

fn find_existing(dir: &Path) -> Result<Option<PathBuf>> {
    match fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(Some(dir.to_path_buf())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Build context {} does not exist, a new one will be created", dir.display());
            Ok(None)
        }
        Err(e) => Err(Error::workspace(dir, e.to_string())),
    }
}

fn discard_context(locks: &LockManager, dir: &Path) -> Result<()> {
    info!("Delete old build context {}", dir.display());
    // Wait for any build still running in it.
    let guard = locks.acquire(dir)?.lock()?;
    remove_path(dir).map_err(|e| Error::workspace(dir, e.to_string()))?;
    remove_lock_file(dir)?;
    drop(guard);
    Ok(())
}

fn allocate(contexts_root: &Path) -> Result<PathBuf> {
    info!("Create a new build context");
    let dir = tempfile::Builder::new()
        .prefix(CONTEXT_PREFIX)
        .rand_bytes(8)
        .tempdir_in(contexts_root)
        .map_err(|e| Error::workspace(contexts_root, format!("cannot allocate: {e}")))?;
    Ok(dir.keep())
}

fn sync(source: &Path, target: &Path, verify: bool) -> Result<ReconcileStats> {
    let stats = reconcile(source, target)?;
    if verify {
        let snapshot = Snapshot::read(target)?.unwrap_or_default();
        let diverged = snapshot.verify(target)?;
        if !diverged.is_empty() {
            return Err(Error::Diverged {
                path: target.display().to_string(),
                diverged,
            });
        }
    }
    Ok(stats)
}

#[cfg(unix)]
fn make_world_writable(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    // The toolchain in the container runs as an unprivileged user.
    fs::set_permissions(dir, fs::Permissions::from_mode(0o777))
        .map_err(|e| Error::workspace(dir, format!("chmod failed: {e}")))
}

#[cfg(not(unix))]
fn make_world_writable(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::lock_path_for;
    use crate::snapshot::SNAPSHOT_FILE;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        temp_dir: TempDir,
        locks: LockManager,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                temp_dir: TempDir::new().unwrap(),
                locks: LockManager::new(),
            }
        }

        fn volumes(&self) -> PathBuf {
            self.temp_dir.path().join("volumes")
        }

        fn contexts_root(&self) -> PathBuf {
            build_contexts_root(&self.volumes(), "demo", "esp32")
        }

        fn sources(&self, files: &[(&str, &str)]) -> PathBuf {
            let dir = self.temp_dir.path().join("upload");
            let _ = fs::remove_dir_all(&dir);
            for (rel, content) in files {
                let path = dir.join(rel);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, content).unwrap();
            }
            dir
        }

        fn open(&self, files: &[(&str, &str)], options: WorkspaceOptions) -> Result<Workspace> {
            let upload = Upload::stage(&self.sources(files), &self.volumes()).unwrap();
            Workspace::open(&self.locks, &self.contexts_root(), upload, &options)
        }
    }

    fn reuse(name: &str) -> WorkspaceOptions {
        WorkspaceOptions {
            context: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_sanitize_context_name() {
        assert_eq!(
            sanitize_context_name("build_ctx_Ab12").unwrap(),
            Some("build_ctx_Ab12".to_string())
        );
        assert_eq!(sanitize_context_name("").unwrap(), None);
        assert_eq!(sanitize_context_name("../etc").unwrap(), None);
        assert_eq!(sanitize_context_name("a b").unwrap(), None);
        assert_eq!(sanitize_context_name("ctx-1").unwrap(), None);
    }

    #[test]
    fn test_layout_paths() {
        let root = build_contexts_root(Path::new("/vol"), "demo", "esp32");
        assert_eq!(root, PathBuf::from("/vol/apps/demo/esp32/build_contexts"));
        assert_eq!(app_root(Path::new("/vol"), "demo"), PathBuf::from("/vol/apps/demo"));
    }

    #[test]
    fn test_upload_missing_sources_is_invalid_request() {
        let fixture = Fixture::new();
        let result = Upload::stage(&fixture.temp_dir.path().join("nope"), &fixture.volumes());
        assert!(matches!(result, Err(Error::InvalidRequest { .. })));
    }

    #[test]
    fn test_new_workspace_is_allocated() {
        let fixture = Fixture::new();
        let ws = fixture
            .open(&[("mos.yml", "name: demo\n")], WorkspaceOptions::default())
            .unwrap();

        assert!(ws.name().starts_with(CONTEXT_PREFIX));
        assert!(sanitize_context_name(ws.name()).unwrap().is_some());
        assert_eq!(ws.dir(), fixture.contexts_root().join(ws.name()));
        assert!(ws.dir().join("mos.yml").exists());
        assert!(ws.modules_dir().is_dir());
        assert!(ws.libs_dir().is_dir());
        assert!(ws.tmp_dir().is_dir());
        assert!(lock_path_for(ws.dir()).exists());
        assert!(matches!(ws.preparation(), Preparation::Incremental(_)));
        // The staged upload is gone.
        let leftovers: Vec<_> = fs::read_dir(fixture.volumes())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(UPLOAD_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_workspace_is_world_writable() {
        use std::os::unix::fs::PermissionsExt;
        let fixture = Fixture::new();
        let ws = fixture
            .open(&[("mos.yml", "name: demo\n")], WorkspaceOptions::default())
            .unwrap();
        let mode = fs::metadata(ws.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
    }

    #[test]
    fn test_existing_workspace_is_reused_incrementally() {
        let fixture = Fixture::new();
        let first = fixture
            .open(
                &[("mos.yml", "name: demo\n"), ("src/main.c", "v1")],
                WorkspaceOptions::default(),
            )
            .unwrap();
        let name = first.name().to_string();
        fs::create_dir_all(first.build_dir()).unwrap();
        fs::write(first.build_dir().join("fw.zip"), "old firmware").unwrap();
        drop(first);

        let second = fixture
            .open(&[("mos.yml", "name: demo\n"), ("src/main.c", "v2")], reuse(&name))
            .unwrap();

        assert_eq!(second.name(), name);
        match second.preparation() {
            Preparation::Incremental(stats) => assert_eq!(stats.updated, 1),
            other => panic!("expected incremental preparation, got {other:?}"),
        }
        assert_eq!(fs::read_to_string(second.dir().join("src/main.c")).unwrap(), "v2");
        assert!(second.build_dir().join("fw.zip").exists());
    }

    #[test]
    fn test_unknown_or_illegal_context_allocates_new() {
        let fixture = Fixture::new();
        let unknown = fixture
            .open(&[("mos.yml", "name: demo\n")], reuse("build_ctx_missing"))
            .unwrap();
        assert_ne!(unknown.name(), "build_ctx_missing");
        drop(unknown);

        let illegal = fixture
            .open(&[("mos.yml", "name: demo\n")], reuse("../../escape"))
            .unwrap();
        assert!(illegal.dir().starts_with(fixture.contexts_root()));
    }

    #[test]
    fn test_clean_build_discards_old_workspace() {
        let fixture = Fixture::new();
        let first = fixture
            .open(&[("mos.yml", "name: demo\n")], WorkspaceOptions::default())
            .unwrap();
        let old_dir = first.dir().to_path_buf();
        fs::create_dir_all(first.modules_dir().join("mongoose-os")).unwrap();
        let name = first.name().to_string();
        drop(first);

        let options = WorkspaceOptions {
            context: Some(name.clone()),
            clean: true,
            ..Default::default()
        };
        let second = fixture.open(&[("mos.yml", "name: demo\n")], options).unwrap();

        assert_ne!(second.name(), name);
        assert!(!old_dir.exists());
        assert!(!lock_path_for(&old_dir).exists());
        assert_eq!(second.preparation(), Preparation::Clean);
        assert!(second.dir().join(SNAPSHOT_FILE).exists());
        assert!(!second.modules_dir().join("mongoose-os").exists());
    }

    #[test]
    fn test_broken_snapshot_falls_back_to_clean_copy() {
        let fixture = Fixture::new();
        let first = fixture
            .open(&[("mos.yml", "name: demo\n")], WorkspaceOptions::default())
            .unwrap();
        let name = first.name().to_string();
        fs::write(first.dir().join(SNAPSHOT_FILE), "{ not json").unwrap();
        fs::write(first.dir().join("stray.o"), "junk").unwrap();
        drop(first);

        let second = fixture
            .open(&[("mos.yml", "name: demo\n"), ("src/main.c", "v1")], reuse(&name))
            .unwrap();

        assert_eq!(second.name(), name);
        assert_eq!(second.preparation(), Preparation::Recovered);
        assert!(second.dir().join("src/main.c").exists());
        assert!(!second.dir().join("stray.o").exists());
        assert_eq!(
            Snapshot::read(second.dir()).unwrap().unwrap(),
            Snapshot::compute(second.dir()).unwrap()
        );
    }

    #[test]
    fn test_verification_catches_hand_edited_workspace() {
        let fixture = Fixture::new();
        let first = fixture
            .open(&[("mos.yml", "name: demo\n")], WorkspaceOptions::default())
            .unwrap();
        let name = first.name().to_string();
        // Edited behind the snapshot's back: the sidecar still records the old hash.
        fs::write(first.dir().join("mos.yml"), "name: tampered\n").unwrap();
        drop(first);

        let mut options = reuse(&name);
        options.verify = true;
        let second = fixture.open(&[("mos.yml", "name: demo\n")], options).unwrap();

        assert_eq!(second.preparation(), Preparation::Recovered);
        assert_eq!(
            fs::read_to_string(second.dir().join("mos.yml")).unwrap(),
            "name: demo\n"
        );
    }

    #[test]
    fn test_same_workspace_is_never_prepared_concurrently() {
        let fixture = Arc::new(Fixture::new());
        let first = fixture
            .open(&[("mos.yml", "name: demo\n")], WorkspaceOptions::default())
            .unwrap();
        let name = first.name().to_string();

        let upload_dir = fixture.temp_dir.path().join("second-upload");
        fs::create_dir_all(&upload_dir).unwrap();
        fs::write(upload_dir.join("mos.yml"), "name: demo\n").unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = {
            let fixture = Arc::clone(&fixture);
            thread::spawn(move || {
                let upload = Upload::stage(&upload_dir, &fixture.volumes()).unwrap();
                let ws = Workspace::open(
                    &fixture.locks,
                    &fixture.contexts_root(),
                    upload,
                    &reuse(&name),
                )
                .unwrap();
                tx.send(ws.name().to_string()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        drop(first);
        let name_seen = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(name_seen.starts_with(CONTEXT_PREFIX));
        handle.join().unwrap();
    }
}
