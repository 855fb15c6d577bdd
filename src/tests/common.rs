use crate::config::{InstallOptions, VersionLockDirectory};
use crate::error::Result;
use crate::fsutil::{hashed_storage_path, safe_join};
use crate::manifest::{self, Manifest};
use crate::resolver::{max_satisfying, PackageSource, PackageSpec, VersionResolver};
use anyhow::bail;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry stand-in: published manifests live in memory and `fetch`
/// unpacks just their `package.json` plus any declared binaries.
#[derive(Default)]
pub struct FakeSource {
    packages: Mutex<HashMap<String, Vec<Manifest>>>,
    broken: Mutex<HashSet<String>>,
    queries: Mutex<Vec<String>>,
    fetches: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish(&self, manifest: Manifest) {
        self.packages.lock().entry(manifest.name.clone()).or_default().push(manifest);
    }

    /// Every lookup of `name` errors until [`FakeSource::repair`] is called.
    pub fn break_package(&self, name: &str) {
        self.broken.lock().insert(name.to_string());
    }

    pub fn repair(&self, name: &str) {
        self.broken.lock().remove(name);
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().clone()
    }
}

impl PackageSource for FakeSource {
    fn manifest(&self, name: &str, spec: &PackageSpec) -> Result<Option<Manifest>> {
        self.queries.lock().push(format!("{name}:{spec:?}"));
        if self.broken.lock().contains(name) {
            bail!("registry unavailable for {}", name);
        }
        let packages = self.packages.lock();
        let Some(published) = packages.get(name) else { return Ok(None) };
        let range = match spec {
            PackageSpec::Registry { range } => range.as_str(),
            PackageSpec::Git(_) | PackageSpec::Remote { .. } => "*",
        };
        let best = max_satisfying(published.iter().map(|m| m.version.as_str()), range)?;
        Ok(best.and_then(|v| published.iter().find(|m| m.version == v)).cloned())
    }

    fn fetch(&self, manifest: &Manifest, dest: &Path) -> Result<()> {
        self.fetches.lock().push(manifest.tag());
        fs::create_dir_all(dest)?;
        manifest::write(manifest, &dest.join("package.json"))?;
        for (_, target) in manifest.bin_entries() {
            if let Some(path) = safe_join(dest, &target) {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, "#!/bin/sh\necho ok\n")?;
            }
        }
        Ok(())
    }
}

pub fn package(name: &str, version: &str, dependencies: &[(&str, &str)]) -> Manifest {
    let mut m = Manifest::new(name, version);
    for (dep, range) in dependencies {
        m.dependencies.insert(dep.to_string(), range.to_string());
    }
    m
}

/// Write `manifest` as the `package.json` of `<work_area>/<dir>`.
pub fn write_project(work_area: &Path, dir: &str, manifest: &Manifest) -> PathBuf {
    let project = work_area.join(dir);
    fs::create_dir_all(&project).unwrap();
    manifest::write(manifest, &project.join("package.json")).unwrap();
    project
}

/// Unpack `manifest` into its canonical place in the storage area.
pub fn store_package(storage_root: &Path, manifest: &Manifest) -> PathBuf {
    let location = hashed_storage_path(storage_root, &manifest.name, &manifest.version);
    fs::create_dir_all(&location).unwrap();
    manifest::write(manifest, &location.join("package.json")).unwrap();
    location
}

pub fn resolver(source: Arc<FakeSource>) -> Arc<VersionResolver> {
    resolver_with_locks(source, VersionLockDirectory::default())
}

pub fn resolver_with_locks(source: Arc<FakeSource>, locks: VersionLockDirectory) -> Arc<VersionResolver> {
    Arc::new(VersionResolver::new(source, locks))
}

pub fn options(work_area: &Path) -> InstallOptions {
    let mut options = InstallOptions::for_work_area(work_area);
    options.concurrency = 2;
    options.run_scripts = false;
    options
}
