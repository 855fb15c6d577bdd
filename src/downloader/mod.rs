use crate::dependency::{DependencyTree, DownloaderStatistics, NodeId, Script, ScriptStage};
use crate::error::Result;
use crate::fsutil;
use crate::manifest::Manifest;
use crate::storage::Storage;
use anyhow::{anyhow, Context};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Retrieves the packages a tree still lacks and stores them in the storage area.
pub struct Downloader {
    storage: Storage,
    statistics: DownloaderStatistics,
}

/// What a worker learned about one package name; applied to the tree in order.
#[derive(Debug, Default)]
struct PackageOutcome {
    registrations: Vec<Registration>,
    scripts: Vec<Script>,
}

#[derive(Debug)]
enum Registration {
    /// A package version that isn't in the tree yet.
    Node { manifest: Manifest, location: PathBuf, root_branch: bool },
    /// A requested range that resolved to an already registered version.
    Alias { name: String, tag: String, version: String },
}

struct Stage<'a> {
    tree: &'a DependencyTree,
    storage: &'a Storage,
    statistics: &'a Mutex<DownloaderStatistics>,
    force_resolve: bool,
}

impl Downloader {
    pub fn new(storage: Storage) -> Self {
        Self { storage, statistics: DownloaderStatistics::default() }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn statistics(&self) -> &DownloaderStatistics {
        &self.statistics
    }

    pub fn prepare(&self) -> Result<()> {
        self.storage.prepare()
    }

    pub fn clean(&self) -> Result<usize> {
        self.storage.clean()
    }

    /// One stage: fetch every version in the tree's condensed dependency list.
    /// With `force_resolve`, ranges are resolved again even if storage already
    /// holds a package for them.
    pub fn download(
        &mut self,
        tree: &mut DependencyTree,
        force_resolve: bool,
        concurrency: usize,
    ) -> Result<DownloaderStatistics> {
        self.prepare()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .thread_name(|i| format!("spodr-download-{i}"))
            .build()
            .context("create download pool")?;

        if force_resolve {
            pool.install(|| complete_root_integrity(tree));
        }

        let dependency_list = tree.condensed_dependency_list();
        let total: usize = dependency_list.values().map(|versions| versions.len()).sum();
        if total == 0 {
            info!("Nothing to do at this stage. Tree complete.");
            self.statistics = DownloaderStatistics::default();
            return Ok(self.statistics);
        }
        info!("Resolving {} versions of {} packages…", total, dependency_list.len());

        let mut work: Vec<(String, Vec<String>)> = dependency_list
            .into_iter()
            .map(|(name, versions)| (name, versions.into_iter().collect()))
            .collect();
        work.sort_by(|a, b| b.0.cmp(&a.0));

        let statistics = Mutex::new(DownloaderStatistics::for_total(total));
        let outcomes: Vec<PackageOutcome> = {
            let stage = Stage { tree, storage: &self.storage, statistics: &statistics, force_resolve };
            pool.install(|| {
                work.par_iter()
                    .map(|(name, versions)| {
                        let outcome = stage.download_all_versions_of(name, versions);
                        stage.emit_progress_as_required();
                        outcome
                    })
                    .collect()
            })
        };

        for outcome in outcomes {
            apply(tree, outcome)?;
        }

        self.statistics = statistics.into_inner();
        info!(
            "Downloaded {} of {} ({} already in cache, {} failed).",
            self.statistics.packages_downloaded,
            self.statistics.packages_total,
            self.statistics.packages_already_in_cache,
            self.statistics.packages_failed
        );
        Ok(self.statistics)
    }
}

/// Root projects without distribution metadata are looked up once, so their
/// lock entries carry a tarball and an integrity.
fn complete_root_integrity(tree: &mut DependencyTree) {
    let missing: Vec<(NodeId, String)> = tree
        .root()
        .branches
        .iter()
        .copied()
        .filter(|&id| tree.node(id).integrity.is_none())
        .map(|id| (id, tree.node(id).tag()))
        .collect();
    let resolver = tree.resolver().clone();
    let found: Vec<(NodeId, Option<Manifest>)> = missing
        .par_iter()
        .map(|(id, tag)| match resolver.resolve(tag) {
            Ok(manifest) => (*id, manifest),
            Err(e) => {
                debug!("'{}' failed to resolve. Package possibly not published. ({:#})", tag, e);
                (*id, None)
            }
        })
        .collect();
    for (id, manifest) in found {
        if let Some(manifest) = manifest {
            let node = tree.node_mut(id);
            node.tarball = manifest.tarball();
            node.integrity = manifest.integrity();
        }
    }
}

fn apply(tree: &mut DependencyTree, outcome: PackageOutcome) -> Result<()> {
    for registration in outcome.registrations {
        match registration {
            Registration::Node { manifest, location, root_branch } => {
                if root_branch {
                    tree.branch_from_existing_package(NodeId::ROOT, manifest, location)?;
                } else {
                    let id = tree.make_tree_node(manifest, location);
                    tree.store_in_aggregate_cache(id, None)?;
                }
            }
            Registration::Alias { name, tag, version } => {
                let id = tree.package_from_aggregate_cache(&name, &version).ok_or_else(|| {
                    anyhow!("'{}@{}' points at '{}@{}' which isn't in the tree", name, tag, name, version)
                })?;
                tree.store_in_aggregate_cache(id, Some(&tag))?;
            }
        }
    }
    for script in outcome.scripts {
        tree.register_script(script);
    }
    Ok(())
}

impl Stage<'_> {
    fn count(&self, f: impl FnOnce(&mut DownloaderStatistics)) {
        f(&mut self.statistics.lock());
    }

    fn emit_progress_as_required(&self) {
        if let Some(line) = self.statistics.lock().progress_update() {
            info!("{}", line);
        }
    }

    /// Versions of one package are handled strictly one after the other.
    fn download_all_versions_of(&self, name: &str, versions: &[String]) -> PackageOutcome {
        let mut outcome = PackageOutcome::default();
        let mut pending = HashSet::new();
        for version in versions {
            let version_tag = format!("{name}@{version}");
            if let Err(e) = self.download_version(name, version, &version_tag, &mut pending, &mut outcome) {
                error!("Failed to store '{}'! ({:#})", version_tag, e);
                self.count(|s| s.packages_failed += 1);
            }
        }
        outcome
    }

    fn is_tagged(&self, name: &str, tag: &str, pending: &HashSet<String>) -> bool {
        pending.contains(tag) || self.tree.package_from_aggregate_cache(name, tag).is_some()
    }

    fn download_version(
        &self,
        name: &str,
        version: &str,
        version_tag: &str,
        pending: &mut HashSet<String>,
        outcome: &mut PackageOutcome,
    ) -> Result<()> {
        if self.is_tagged(name, version, pending) {
            debug!("Package '{}' is already tagged in the tree.", version_tag);
            self.count(|s| s.packages_already_in_cache += 1);
            return Ok(());
        }

        let requested_path = self.storage.hashed_path(name, version);
        if !self.force_resolve && self.tree.lstat(&requested_path).is_some() {
            debug!("Package '{}' is already tagged in the cache. Tagging it in the tree.", version_tag);
            let stored = self.storage.read_manifest(&requested_path)?;
            let canonical = self.storage.hashed_path(name, &stored.version);
            let location =
                if self.tree.lstat(&canonical).is_some() { canonical } else { requested_path };
            self.register(name, version, stored, location, false, pending, outcome);
            self.count(|s| s.packages_already_in_cache += 1);
            return Ok(());
        }

        let Some(manifest) = self.tree.resolver().resolve(version_tag)? else {
            warn!("Package '{}' could not be resolved. Possibly not a package in the registry.", version_tag);
            self.count(|s| s.packages_failed += 1);
            return Ok(());
        };
        let resolved_tag = format!("{}@{}", name, manifest.version);
        debug!("'{}' resolved to '{}'.", version_tag, resolved_tag);

        let resolved_path = self.storage.hashed_path(name, &manifest.version);
        if self.tree.lstat(&resolved_path).is_some() {
            debug!("Package '{}' is already in the cache.", resolved_tag);
            self.count(|s| s.packages_already_in_cache += 1);
            self.register(name, version, manifest, resolved_path.clone(), false, pending, outcome);
        } else {
            self.download_and_move(&manifest, &resolved_tag, &resolved_path, outcome)?;
            self.register(name, version, manifest, resolved_path.clone(), true, pending, outcome);
        }

        if requested_path != resolved_path && self.tree.lstat(&requested_path).is_none() {
            debug!("Linking '{}' → '{}'…", requested_path.display(), resolved_path.display());
            link_alias(&resolved_path, &requested_path)?;
            self.tree.stat_cache().refresh(&requested_path);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn register(
        &self,
        name: &str,
        tag: &str,
        mut manifest: Manifest,
        location: PathBuf,
        root_branch: bool,
        pending: &mut HashSet<String>,
        outcome: &mut PackageOutcome,
    ) {
        if manifest.name != name {
            debug!("'{}' is published as '{}'; storing it as '{}'.", name, manifest.name, name);
            manifest.name = name.to_string();
        }
        let version = manifest.version.clone();
        if !self.is_tagged(name, &version, pending) {
            pending.insert(version.clone());
            outcome.registrations.push(Registration::Node { manifest, location, root_branch });
        }
        if tag != version {
            pending.insert(tag.to_string());
            outcome.registrations.push(Registration::Alias {
                name: name.to_string(),
                tag: tag.to_string(),
                version,
            });
        }
    }

    fn download_and_move(
        &self,
        manifest: &Manifest,
        version_tag: &str,
        to: &Path,
        outcome: &mut PackageOutcome,
    ) -> Result<()> {
        info!("Downloading '{}'…", version_tag);
        self.statistics.lock().unblock();

        let staged = self.storage.staging_dir()?;
        self.tree.resolver().source().fetch(manifest, staged.path())?;
        self.register_scripts(manifest, version_tag, to, &[ScriptStage::Preinstall], outcome);

        self.storage.commit(staged, to)?;
        debug!("Stored '{}' as '{}'.", version_tag, to.display());
        self.count(|s| s.packages_downloaded += 1);

        self.register_scripts(
            manifest,
            version_tag,
            to,
            &[ScriptStage::Install, ScriptStage::Postinstall],
            outcome,
        );
        self.tree.stat_cache().refresh(to);
        Ok(())
    }

    fn register_scripts(
        &self,
        manifest: &Manifest,
        version_tag: &str,
        location: &Path,
        stages: &[ScriptStage],
        outcome: &mut PackageOutcome,
    ) {
        for &stage in stages {
            if manifest.scripts.contains_key(stage.as_str()) {
                info!("Registering '{}' script for '{}'…", stage, version_tag);
                outcome.scripts.push(Script::new(version_tag, stage, location));
            }
        }
    }
}

fn link_alias(canonical: &Path, alias: &Path) -> Result<()> {
    if let Some(parent) = alias.parent() {
        fsutil::ensure_dir(parent)?;
    }
    match fsutil::symlink_dir(canonical, alias) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e).with_context(|| format!("link {} to {}", alias.display(), canonical.display())),
    }
}
