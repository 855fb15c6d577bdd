use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const MKDIR_ATTEMPTS: u32 = 10;
const MAX_BUSY_TRIES: u32 = 20;

/// sha256 of a version string or range, hex encoded.
pub fn version_hash(version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(version.as_bytes());
    hex::encode(hasher.finalize())
}

/// `<storageRoot>/<name>@<sha256(version)>`; scoped names nest under their scope.
pub fn hashed_storage_path(storage_root: &Path, name: &str, version: &str) -> PathBuf {
    let mut p = package_path(storage_root, name);
    let leaf = format!(
        "{}@{}",
        p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        version_hash(version)
    );
    p.set_file_name(leaf);
    p
}

/// Joins a package name below `base`, splitting scoped names into their two levels.
pub fn package_path(base: &Path, name: &str) -> PathBuf {
    let mut p = base.to_path_buf();
    for part in name.split('/') {
        p.push(part);
    }
    p
}

pub fn safe_join(base: &Path, rel: &str) -> Option<PathBuf> {
    if rel.split(['/', '\\']).any(|part| part == "..") {
        return None;
    }
    let mut p = base.to_path_buf();
    for part in rel.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        p.push(part);
    }
    Some(p)
}

/// `create_dir_all`, retrying with backoff while the OS reports a transient
/// permission error (virus scanners and indexers on shared storage).
pub fn ensure_dir(p: &Path) -> io::Result<()> {
    let mut attempt = 0;
    loop {
        match fs::create_dir_all(p) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied && attempt + 1 < MKDIR_ATTEMPTS => {
                attempt += 1;
                warn!("{}: {} - retrying in {}ms", p.display(), e, 100 * attempt);
                thread::sleep(Duration::from_millis(100 * u64::from(attempt)));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Recursive delete that tolerates a missing target and retries while the
/// target is still busy.
pub fn remove_all(p: &Path) -> io::Result<()> {
    let mut tries = 0;
    loop {
        let meta = match fs::symlink_metadata(p) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let result = if meta.file_type().is_symlink() || meta.is_file() {
            remove_link(p)
        } else {
            fs::remove_dir_all(p)
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) if is_busy(&e) && tries < MAX_BUSY_TRIES => {
                tries += 1;
                debug!("{} is busy ({}), retry {}", p.display(), e, tries);
                thread::sleep(Duration::from_millis(100 * u64::from(tries)));
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_busy(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::PermissionDenied | io::ErrorKind::DirectoryNotEmpty)
        || matches!(e.raw_os_error(), Some(16) | Some(32))
}

fn remove_link(p: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        // Junctions and directory symlinks are removed as directories.
        fs::remove_file(p).or_else(|_| fs::remove_dir(p))
    }
    #[cfg(not(windows))]
    {
        fs::remove_file(p)
    }
}

/// Create a directory link at `link` pointing to `target`.
pub fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(windows)]
    {
        symlink_dir_with_junction_fallback(target, link)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (target, link);
        Err(io::Error::new(io::ErrorKind::Unsupported, "directory links are not supported"))
    }
}

#[cfg(windows)]
fn symlink_dir_with_junction_fallback(from: &Path, to: &Path) -> io::Result<()> {
    use std::os::windows::fs::symlink_dir;
    match symlink_dir(from, to) {
        Ok(_) => Ok(()),
        Err(orig_err) => {
            if let Some(1314) = orig_err.raw_os_error() {
                // Lacking the symlink privilege; junctions need no elevation.
                use std::process::{Command, Stdio};
                let output = Command::new("cmd")
                    .arg("/C")
                    .arg("mklink")
                    .arg("/J")
                    .arg(to)
                    .arg(from)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .output()?;
                if output.status.success() {
                    Ok(())
                } else {
                    Err(orig_err)
                }
            } else {
                Err(orig_err)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathStat {
    pub is_symlink: bool,
    pub is_dir: bool,
}

/// Memoised `lstat`. The first lookup of a path is shared by every later
/// caller; concurrent callers of the same path wait on the same lookup.
#[derive(Debug, Default)]
pub struct StatCache {
    entries: Mutex<HashMap<PathBuf, Arc<OnceCell<Option<PathStat>>>>>,
}

impl StatCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lstat(&self, path: &Path) -> Option<PathStat> {
        let cell = self.entries.lock().entry(path.to_path_buf()).or_default().clone();
        *cell.get_or_init(|| {
            fs::symlink_metadata(path).ok().map(|m| PathStat {
                is_symlink: m.file_type().is_symlink(),
                is_dir: m.is_dir(),
            })
        })
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.lstat(path).is_some()
    }

    /// Drop what is known about `path`; the next lookup hits the filesystem.
    pub fn forget(&self, path: &Path) {
        self.entries.lock().remove(path);
    }

    /// Re-stat `path` now, after this process changed it.
    pub fn refresh(&self, path: &Path) -> Option<PathStat> {
        self.forget(path);
        self.lstat(path)
    }

    pub fn absorb(&self, other: StatCache) {
        let theirs = other.entries.into_inner();
        self.entries.lock().extend(theirs);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
