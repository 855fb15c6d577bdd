use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = anyhow::Result<T>;

/// Failures that mean the tree no longer matches the assumptions the engine
/// was built on. These abort the run; per-package resolve/download problems
/// are counted by the downloader instead.
#[derive(Debug, Error)]
pub enum SpodrError {
    #[error("package version '{name}@{tag}' is already in the aggregate cache (possible range-match to a root package)")]
    StorageCollision { name: String, tag: String },

    #[error("unable to pin version '{version}' of '{name}' as that version wasn't found in the tree")]
    MissingPinTarget { name: String, version: String },

    #[error("no package.json present at '{}'", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("'{0}' is not a valid package tag")]
    InvalidTag(String),

    #[error("'{0}' refers to a source spodr can't retrieve")]
    UnsupportedSource(String),

    #[error("peer pattern '{pattern}' for '{package}' is invalid: {reason}")]
    InvalidPeerPattern { package: String, pattern: String, reason: String },

    #[error("version lock for '{tag}' loops back onto itself")]
    LockCycle { tag: String },
}
