//! Stage-then-publish directories
//!
//! A `StagedDir` is built in a hidden sibling of its final location and made
//! visible with a single `rename(2)`. Observers of the final path therefore
//! see either the previous state or the complete new one, never a partially
//! written tree. An unpublished stage is removed when dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// A directory under construction
#[derive(Debug)]
pub struct StagedDir {
    dir: TempDir,
}

impl StagedDir {
    /// Creates an empty stage inside `parent`, named `<prefix><random>`.
    pub fn new_in(parent: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(parent)
            .map_err(|e| Error::workspace(parent, format!("cannot create staging dir: {e}")))?;
        Ok(Self { dir })
    }

    /// Creates a stage next to `target`, so publishing is a same-filesystem rename.
    pub fn beside(target: &Path) -> Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| Error::workspace(target, "path has no parent directory"))?;
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new_in(parent, &format!(".{name}.staged-"))
    }

    /// Where the content is being staged
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Publishes the stage at `target`, which must not exist yet.
    pub fn publish(self, target: &Path) -> Result<PathBuf> {
        let staged = self.dir.keep();
        if let Err(e) = fs::rename(&staged, target) {
            discard(&staged);
            return Err(Error::workspace(
                target,
                format!("cannot publish {}: {e}", staged.display()),
            ));
        }
        debug!("Published {} as {}", staged.display(), target.display());
        Ok(target.to_path_buf())
    }

    /// Publishes the stage at `target`, replacing whatever is there.
    ///
    /// The previous content is first renamed aside and deleted only after the
    /// new tree is in place.
    pub fn replace(self, target: &Path) -> Result<PathBuf> {
        let retired = match fs::symlink_metadata(target) {
            Ok(_) => {
                let aside = StagedDir::beside(target)?.dir.keep();
                fs::remove_dir(&aside)?;
                fs::rename(target, &aside).map_err(|e| {
                    Error::workspace(target, format!("cannot move old tree aside: {e}"))
                })?;
                Some(aside)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let published = self.publish(target)?;
        if let Some(aside) = retired {
            discard(&aside);
        }
        Ok(published)
    }
}

/// Removes a file or directory tree, tolerating its absence.
///
/// A path below something that is no longer a directory counts as absent.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
            ) =>
        {
            Ok(())
        }
        other => other,
    }
}

/// Copies the tree at `src` into the existing directory `dst`.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::workspace(entry.path(), e.to_string()))?;
        let out = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&out)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &out)?;
        } else {
            fs::copy(entry.path(), &out)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

fn discard(path: &Path) {
    if let Err(e) = remove_path(path) {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unpublished_stage_is_removed_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let staged = StagedDir::new_in(temp_dir.path(), "tmp_src_").unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("tmp_src_"));

        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn test_publish_moves_stage_into_place() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("mongoose-os");

        let staged = StagedDir::beside(&target).unwrap();
        fs::write(staged.path().join("README.md"), "readme").unwrap();
        assert!(!target.exists());

        staged.publish(&target).unwrap();
        assert_eq!(
            fs::read_to_string(target.join("README.md")).unwrap(),
            "readme"
        );
        // Only the published directory is left behind.
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_publish_refuses_non_empty_target() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("ctx");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("keep.txt"), "old").unwrap();

        let staged = StagedDir::beside(&target).unwrap();
        fs::write(staged.path().join("new.txt"), "new").unwrap();

        assert!(staged.publish(&target).is_err());
        assert!(target.join("keep.txt").exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_replace_swaps_existing_tree() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("ctx");
        fs::create_dir_all(target.join("build")).unwrap();
        fs::write(target.join("build/fw.bin"), "old firmware").unwrap();

        let staged = StagedDir::new_in(temp_dir.path(), "tmp_src_").unwrap();
        fs::write(staged.path().join("mos.yml"), "name: demo").unwrap();
        staged.replace(&target).unwrap();

        assert!(target.join("mos.yml").exists());
        assert!(!target.join("build").exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_replace_with_missing_target() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("ctx");

        let staged = StagedDir::beside(&target).unwrap();
        staged.replace(&target).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn test_remove_path_handles_files_dirs_and_absence() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.txt");
        let dir = temp_dir.path().join("b");
        fs::write(&file, "a").unwrap();
        fs::create_dir_all(dir.join("c")).unwrap();

        remove_path(&file).unwrap();
        remove_path(&dir).unwrap();
        remove_path(&temp_dir.path().join("missing")).unwrap();

        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_copy_tree() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(src.join("lib/empty")).unwrap();
        fs::write(src.join("mos.yml"), "name: demo").unwrap();
        fs::write(src.join("lib/util.c"), "int x;").unwrap();
        fs::create_dir_all(&dst).unwrap();

        let copied = copy_tree(&src, &dst).unwrap();

        assert_eq!(copied, 2);
        assert!(dst.join("lib/empty").is_dir());
        assert_eq!(fs::read_to_string(dst.join("lib/util.c")).unwrap(), "int x;");
    }
}
