//! # Workspace Reconciliation
//!
//! Brings a long-lived build workspace in line with a freshly uploaded tree
//! while touching only what actually changed, so that the compiler's own
//! incremental state in the workspace stays valid for unchanged files.
//!
//! Both trees are described by their snapshots. Every path of either snapshot
//! is classified and the corresponding action is applied to the workspace:
//!
//! | State  | Action                                                    |
//! |--------|-----------------------------------------------------------|
//! | ADD    | move the uploaded item in (directories are created empty) |
//! | REMOVE | delete the workspace item                                 |
//! | UPDATE | REMOVE, then ADD                                          |
//! | EQ     | nothing                                                   |
//!
//! Paths are processed in lexicographic order, which puts every directory
//! before its children. Content that neither snapshot tracks, such as the
//! private clones under `modules/`, is never looked at.
//!
//! The upload is consumed: files are renamed out of it, not copied.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use log::info;

use crate::error::{Error, Result};
use crate::snapshot::{sidecar_path, Snapshot, SnapshotEntry};
use crate::stage::remove_path;

/// Classification of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Remove,
    Update,
    Equal,
}

impl ChangeKind {
    fn label(self) -> &'static str {
        match self {
            ChangeKind::Add => "ADD    ",
            ChangeKind::Remove => "REMOVE ",
            ChangeKind::Update => "UPDATE ",
            ChangeKind::Equal => "EQ     ",
        }
    }
}

/// The source and target entries of one path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileEntry {
    pub source: Option<SnapshotEntry>,
    pub target: Option<SnapshotEntry>,
}

impl ReconcileEntry {
    /// Classifies the entry.
    ///
    /// A path always appears in at least one snapshot; an entry with neither
    /// side is reported as `Equal` since there is nothing to do for it.
    pub fn kind(&self) -> ChangeKind {
        match (&self.source, &self.target) {
            (Some(_), None) => ChangeKind::Add,
            (None, Some(_)) => ChangeKind::Remove,
            (Some(src), Some(tgt)) if src.hash != tgt.hash => ChangeKind::Update,
            _ => ChangeKind::Equal,
        }
    }
}

/// Counters returned by `reconcile`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub total: usize,
    pub changed: usize,
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl ReconcileStats {
    fn record(&mut self, kind: ChangeKind) {
        self.total += 1;
        match kind {
            ChangeKind::Add => self.added += 1,
            ChangeKind::Remove => self.removed += 1,
            ChangeKind::Update => self.updated += 1,
            ChangeKind::Equal => self.unchanged += 1,
        }
        if kind != ChangeKind::Equal {
            self.changed += 1;
        }
    }
}

/// Pairs up the entries of both snapshots, ordered by path.
pub fn plan(source: &Snapshot, target: &Snapshot) -> Vec<(String, ReconcileEntry)> {
    let mut entries: BTreeMap<&str, ReconcileEntry> = BTreeMap::new();
    for (path, entry) in &source.files {
        entries.entry(path).or_default().source = Some(entry.clone());
    }
    for (path, entry) in &target.files {
        entries.entry(path).or_default().target = Some(entry.clone());
    }
    entries
        .into_iter()
        .map(|(path, entry)| (path.to_string(), entry))
        .collect()
}

/// Reconciles `target_dir` with the tree at `source_dir`.
///
/// On success the target's snapshot sidecar is the source's snapshot. On
/// error the target may be partially reconciled and must not be built.
pub fn reconcile(source_dir: &Path, target_dir: &Path) -> Result<ReconcileStats> {
    let source = Snapshot::load_or_compute(source_dir)?;
    let target = Snapshot::read(target_dir)?.unwrap_or_default();

    let mut stats = ReconcileStats::default();
    for (path, entry) in plan(&source, &target) {
        let kind = entry.kind();
        info!("{}{}", kind.label(), path);
        match kind {
            ChangeKind::Add => add(source_dir, target_dir, &path, &entry)?,
            ChangeKind::Remove => remove(target_dir, &path)?,
            ChangeKind::Update => {
                remove(target_dir, &path)?;
                add(source_dir, target_dir, &path, &entry)?;
            }
            ChangeKind::Equal => {}
        }
        stats.record(kind);
    }

    replace_sidecar(source_dir, target_dir)?;

    info!(
        "Files processed: {}, files updated: {}",
        stats.total, stats.changed
    );
    Ok(stats)
}

fn add(source_dir: &Path, target_dir: &Path, path: &str, entry: &ReconcileEntry) -> Result<()> {
    let dst = target_dir.join(path);
    let is_dir = entry.source.as_ref().is_some_and(|e| e.is_dir);

    if is_dir {
        // Children are separate entries; an untracked directory already in
        // place keeps its content.
        if !fs::symlink_metadata(&dst).is_ok_and(|m| m.is_dir()) {
            remove_path(&dst).map_err(|e| failed("ADD", &dst, e))?;
            fs::create_dir(&dst).map_err(|e| failed("ADD", &dst, e))?;
        }
        return Ok(());
    }

    remove_path(&dst).map_err(|e| failed("ADD", &dst, e))?;
    fs::rename(source_dir.join(path), &dst).map_err(|e| failed("ADD", &dst, e))
}

fn remove(target_dir: &Path, path: &str) -> Result<()> {
    let dst = target_dir.join(path);
    remove_path(&dst).map_err(|e| failed("REMOVE", &dst, e))
}

fn replace_sidecar(source_dir: &Path, target_dir: &Path) -> Result<()> {
    let src = sidecar_path(source_dir);
    let dst = sidecar_path(target_dir);
    remove_path(&dst).map_err(|e| failed("REMOVE", &dst, e))?;
    fs::rename(&src, &dst).map_err(|e| failed("ADD", &dst, e))
}

fn failed(action: &str, path: &Path, source: io::Error) -> Error {
    Error::Reconcile {
        action: action.to_string(),
        path: path.display().to_string(),
        source,
    }
}
