pub mod range;
pub mod spec;

use crate::config::VersionLockDirectory;
use crate::error::{Result, SpodrError};
use crate::manifest::{Dist, Manifest, MISSING_SHASUM};
use anyhow::anyhow;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use range::{max_satisfying, satisfies};
pub use spec::{alias_target, parse_tag, GitSpec, PackageSpec};

/// Somewhere packages can be looked up and retrieved from.
pub trait PackageSource: Send + Sync {
    /// The manifest matching `spec` for package `name`, `None` when nothing matches.
    fn manifest(&self, name: &str, spec: &PackageSpec) -> Result<Option<Manifest>>;

    /// Place the unpacked contents of the package described by `manifest` into `dest`.
    fn fetch(&self, manifest: &Manifest, dest: &Path) -> Result<()>;
}

type Resolution = std::result::Result<Option<Manifest>, String>;

/// Resolves `name@range` tags to manifests, applying the configured version locks.
pub struct VersionResolver {
    source: Arc<dyn PackageSource>,
    locks: VersionLockDirectory,
    cache: Mutex<HashMap<String, Arc<OnceCell<Resolution>>>>,
}

impl VersionResolver {
    pub fn new(source: Arc<dyn PackageSource>, locks: VersionLockDirectory) -> Self {
        Self { source, locks, cache: Mutex::new(HashMap::new()) }
    }

    pub fn source(&self) -> &Arc<dyn PackageSource> {
        &self.source
    }

    pub fn locks(&self) -> &VersionLockDirectory {
        &self.locks
    }

    /// The manifest the tag resolves to after locks were applied, `None` if
    /// the source has no matching package.
    pub fn resolve(&self, version_tag: &str) -> Result<Option<Manifest>> {
        let mut visited = HashSet::new();
        self.resolve_guarded(version_tag, &mut visited)
    }

    fn resolve_guarded(
        &self,
        version_tag: &str,
        visited: &mut HashSet<String>,
    ) -> Result<Option<Manifest>> {
        debug!("Resolving '{}'…", version_tag);
        visited.insert(version_tag.to_string());

        let Some(manifest) = self.resolve_raw(version_tag)? else {
            return Ok(None);
        };
        let Some(package_locks) = self.locks.package_locks(&manifest.name) else {
            return Ok(Some(manifest));
        };

        let alternative = package_locks.iter().find(|lock| {
            manifest.version != lock.if_version_matches
                && satisfies(&manifest.version, &lock.if_version_matches)
        });
        let Some(lock) = alternative.filter(|lock| manifest.version != lock.replace_with) else {
            return Ok(Some(manifest));
        };

        let replacement = format!("{}@{}", manifest.name, lock.replace_with);
        if visited.contains(&replacement) {
            warn!(
                "{}; keeping '{}@{}' for '{}'",
                SpodrError::LockCycle { tag: replacement },
                manifest.name,
                manifest.version,
                version_tag
            );
            return Ok(Some(manifest));
        }
        info!(
            "Replacing dependency '{}' with version '{}' because it resolved to '{}' which matches '{}'.",
            version_tag, lock.replace_with, manifest.version, lock.if_version_matches
        );
        self.resolve_guarded(&replacement, visited)
    }

    /// Source lookup for a tag, shared by every caller asking for the same tag.
    fn resolve_raw(&self, version_tag: &str) -> Result<Option<Manifest>> {
        let cell = self.cache.lock().entry(version_tag.to_string()).or_default().clone();
        cell.get_or_init(|| self.query(version_tag).map_err(|e| format!("{e:#}")))
            .clone()
            .map_err(|e| anyhow!(e))
    }

    fn query(&self, version_tag: &str) -> Result<Option<Manifest>> {
        let (name, range) = parse_tag(version_tag)?;
        let (name, range) = match alias_target(&range) {
            Some((target, target_range)) => {
                debug!("'{}' is an alias of '{}@{}'.", version_tag, target, target_range);
                (target, target_range)
            }
            None => (name, range),
        };
        let spec = PackageSpec::parse(&range);
        let tarball = match &spec {
            PackageSpec::Registry { .. } => None,
            PackageSpec::Git(git) => Some(git.tarball_url()),
            PackageSpec::Remote { url } => Some(url.clone()),
        };
        if tarball.is_some() {
            warn!(
                "spodr can't calculate integrity for '{}' yet. Consider using a published package instead.",
                version_tag
            );
        }

        let found = self.source.manifest(&name, &spec)?;
        Ok(found.filter(|m| !m.name.is_empty()).map(|mut manifest| {
            if let Some(tarball) = tarball {
                manifest.dist = Some(Dist {
                    tarball,
                    integrity: None,
                    shasum: Some(MISSING_SHASUM.to_string()),
                });
            }
            manifest
        }))
    }

    /// Drop memoised failures so the next lookup asks the source again.
    pub fn forget_failures(&self) -> usize {
        let mut cache = self.cache.lock();
        let before = cache.len();
        cache.retain(|_, cell| !matches!(cell.get(), Some(Err(_))));
        before - cache.len()
    }
}
