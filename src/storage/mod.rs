use crate::error::Result;
use crate::fsutil::{self, hashed_storage_path};
use crate::manifest::{self, Manifest};
use anyhow::Context;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// The shared storage area every package version is unpacked into.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage area.
    pub fn prepare(&self) -> Result<()> {
        fsutil::ensure_dir(&self.root)
            .with_context(|| format!("create storage area {}", self.root.display()))
    }

    /// Delete the entire contents of the storage area, but not the area itself.
    pub fn clean(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).with_context(|| format!("read {}", self.root.display())),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            fsutil::remove_all(&path).with_context(|| format!("remove {}", path.display()))?;
            removed += 1;
        }
        debug!("Removed {} entries from '{}'.", removed, self.root.display());
        Ok(removed)
    }

    /// Where `name` in `version` (a concrete version or a requested range) lives.
    pub fn hashed_path(&self, name: &str, version: &str) -> PathBuf {
        hashed_storage_path(&self.root, name, version)
    }

    pub fn read_manifest(&self, location: &Path) -> Result<Manifest> {
        manifest::load(&location.join("package.json"))
    }

    /// A scratch directory inside the storage area. Downloads land here and
    /// are moved into place with [`Storage::commit`].
    pub fn staging_dir(&self) -> Result<TempDir> {
        tempfile::Builder::new()
            .prefix(".download-")
            .tempdir_in(&self.root)
            .with_context(|| format!("create staging directory in {}", self.root.display()))
    }

    /// Move a staged download to `to`. The staging directory is gone afterwards
    /// whether or not the move succeeded.
    pub fn commit(&self, staged: TempDir, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fsutil::ensure_dir(parent)?;
        }
        let from = staged.keep();
        if let Err(e) = fs::rename(&from, to) {
            if let Err(cleanup) = fsutil::remove_all(&from) {
                warn!("Failed to remove staging directory '{}': {}", from.display(), cleanup);
            }
            return Err(e).with_context(|| format!("move {} to {}", from.display(), to.display()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_keeps_the_storage_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join(".packages"));
        storage.prepare().unwrap();
        fs::create_dir_all(storage.hashed_path("@scope/a", "1.0.0")).unwrap();
        fs::create_dir_all(storage.hashed_path("b", "2.0.0")).unwrap();
        assert_eq!(storage.clean().unwrap(), 2);
        assert!(storage.root().is_dir());
        assert_eq!(fs::read_dir(storage.root()).unwrap().count(), 0);
    }

    #[test]
    fn commit_moves_staged_contents() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let staged = storage.staging_dir().unwrap();
        manifest::write(&Manifest::new("@scope/a", "1.0.0"), &staged.path().join("package.json"))
            .unwrap();
        let target = storage.hashed_path("@scope/a", "1.0.0");
        storage.commit(staged, &target).unwrap();
        assert_eq!(storage.read_manifest(&target).unwrap().version, "1.0.0");
    }

    #[test]
    fn failed_commit_removes_the_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let staged = storage.staging_dir().unwrap();
        let staged_path = staged.path().to_path_buf();
        fs::write(staged_path.join("package.json"), "{}").unwrap();
        let occupied = storage.hashed_path("a", "1.0.0");
        fs::create_dir_all(&occupied).unwrap();
        fs::write(occupied.join("keep"), "").unwrap();

        assert!(storage.commit(staged, &occupied).is_err());
        assert!(!staged_path.exists());
        assert!(occupied.join("keep").is_file());
    }

    #[test]
    fn committed_dir_outlives_the_staging_handle() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let staged = storage.staging_dir().unwrap();
        fs::write(staged.path().join("package.json"), "{}").unwrap();
        let target = storage.hashed_path("b", "1.0.0");
        storage.commit(staged, &target).unwrap();
        assert!(target.join("package.json").is_file());
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".download-"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
