//! Content-addressed workspace snapshots
//!
//! A `Snapshot` records every file and directory of a tree together with the
//! SHA-256 of its content. It is stored next to the tree as a JSON sidecar
//! (`build_ctx_info.json`) so that the next build can tell which files
//! actually changed without rehashing the workspace.
//!
//! Directories carry an empty sentinel hash: two directories always compare
//! equal, and their children are compared on their own.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// File name of the snapshot sidecar at the root of a tracked tree.
pub const SNAPSHOT_FILE: &str = "build_ctx_info.json";

/// Hash recorded for directories.
pub const DIR_HASH: &str = "";

/// One tracked path of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub hash: String,
    pub is_dir: bool,
}

impl SnapshotEntry {
    /// A file entry with the given content hash
    pub fn file(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            is_dir: false,
        }
    }

    /// A directory entry
    pub fn dir() -> Self {
        Self {
            hash: DIR_HASH.to_string(),
            is_dir: true,
        }
    }
}

/// Mapping of relative path (`/`-separated) to its entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub files: BTreeMap<String, SnapshotEntry>,
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry
    pub fn insert(&mut self, path: impl Into<String>, entry: SnapshotEntry) {
        self.files.insert(path.into(), entry);
    }

    /// Get the entry for a path
    pub fn get(&self, path: &str) -> Option<&SnapshotEntry> {
        self.files.get(path)
    }

    /// Number of tracked paths
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Walks `dir` and hashes every file in it. The sidecar at the root of
    /// `dir` is never part of the snapshot.
    pub fn compute(dir: &Path) -> Result<Self> {
        let mut snapshot = Self::new();

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry?;
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| Error::snapshot(entry.path(), e.to_string()))?;
            if rel == Path::new(SNAPSHOT_FILE) {
                continue;
            }
            let key = relative_key(dir, rel)?;

            let file_type = entry.file_type();
            let item = if file_type.is_dir() {
                SnapshotEntry::dir()
            } else if file_type.is_symlink() {
                let target = fs::read_link(entry.path())?;
                SnapshotEntry::file(hash_bytes(target.as_os_str().as_encoded_bytes()))
            } else {
                SnapshotEntry::file(hash_file(entry.path())?)
            };
            snapshot.insert(key, item);
        }

        Ok(snapshot)
    }

    /// Reads the sidecar of `dir`. Returns `None` if there is none.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = sidecar_path(dir);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::snapshot(&path, e.to_string())),
        };
        let snapshot =
            serde_json::from_slice(&data).map_err(|e| Error::snapshot(&path, e.to_string()))?;
        Ok(Some(snapshot))
    }

    /// Persists this snapshot as the sidecar of `dir`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = sidecar_path(dir);
        let data = serde_json::to_vec_pretty(self)?;

        // Write to a temp file first so a crash never leaves a truncated sidecar.
        let mut tmp = tempfile::Builder::new()
            .prefix(".build_ctx_info.")
            .tempfile_in(dir)
            .map_err(|e| Error::snapshot(&path, e.to_string()))?;
        tmp.write_all(&data)
            .map_err(|e| Error::snapshot(&path, e.to_string()))?;
        tmp.persist(&path)
            .map_err(|e| Error::snapshot(&path, e.error.to_string()))?;
        Ok(())
    }

    /// Computes the snapshot of `dir` and persists it as its sidecar.
    pub fn save(dir: &Path) -> Result<Self> {
        let snapshot = Self::compute(dir)?;
        snapshot.write(dir)?;
        Ok(snapshot)
    }

    /// Reads the sidecar of `dir`, computing and persisting it if absent.
    pub fn load_or_compute(dir: &Path) -> Result<Self> {
        match Self::read(dir)? {
            Some(snapshot) => Ok(snapshot),
            None => Self::save(dir),
        }
    }

    /// Returns the tracked paths whose live state in `dir` no longer matches
    /// this snapshot (missing, wrong kind, or different content).
    pub fn verify(&self, dir: &Path) -> Result<Vec<String>> {
        let mut diverged = Vec::new();
        for (key, entry) in &self.files {
            let path = dir.join(key);
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    diverged.push(key.clone());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let matches = if entry.is_dir {
                meta.is_dir()
            } else if meta.file_type().is_symlink() {
                let target = fs::read_link(&path)?;
                hash_bytes(target.as_os_str().as_encoded_bytes()) == entry.hash
            } else {
                meta.is_file() && hash_file(&path)? == entry.hash
            };
            if !matches {
                diverged.push(key.clone());
            }
        }
        Ok(diverged)
    }
}

/// Path of the snapshot sidecar for `dir`
pub fn sidecar_path(dir: &Path) -> std::path::PathBuf {
    dir.join(SNAPSHOT_FILE)
}

/// Lowercase hex SHA-256 of a file's content
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Lowercase hex SHA-256 of a byte slice
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn relative_key(root: &Path, rel: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                Error::snapshot(&root.join(rel), "path is not valid UTF-8")
            })?),
            _ => return Err(Error::snapshot(&root.join(rel), "unexpected path component")),
        }
    }
    Ok(parts.join("/"))
}
