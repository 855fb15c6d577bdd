pub mod bin;

use crate::dependency::{DependencyTree, ModulesGeneratorStatistics, NodeId};
use crate::error::Result;
use crate::fsutil::{self, package_path, safe_join};
use anyhow::Context;
use bin::{platform_shim, EntryPointShim};
use rayon::prelude::*;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Rebuilds the `node_modules` symlink farm of every package in a tree.
pub struct ModulesGenerator {
    shim: Box<dyn EntryPointShim>,
    pub statistics: ModulesGeneratorStatistics,
}

impl Default for ModulesGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ModulesGenerator {
    pub fn new() -> Self {
        Self::with_shim(platform_shim())
    }

    pub fn with_shim(shim: Box<dyn EntryPointShim>) -> Self {
        Self { shim, statistics: ModulesGeneratorStatistics::default() }
    }

    /// Clears and relinks `node_modules` (and `.bin`) below every cached node.
    pub fn sync_directories(
        &mut self,
        tree: &DependencyTree,
        concurrency: usize,
    ) -> Result<ModulesGeneratorStatistics> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .thread_name(|i| format!("spodr-link-{i}"))
            .build()
            .context("create link pool")?;

        let parents: Vec<(NodeId, PathBuf)> = tree
            .cached_nodes()
            .into_iter()
            .filter_map(|id| tree.node(id).storage_location.clone().map(|loc| (id, loc)))
            .collect();

        pool.install(|| {
            parents.par_iter().try_for_each(|(_, location)| {
                let node_modules = location.join("node_modules");
                fsutil::remove_all(&node_modules)
                    .with_context(|| format!("clear {}", node_modules.display()))
            })
        })?;

        let links = AtomicUsize::new(0);
        let binaries = AtomicUsize::new(0);
        for (id, location) in &parents {
            let node_modules = location.join("node_modules");
            pool.install(|| {
                tree.node(*id).branches.par_iter().try_for_each(|&branch| {
                    if link_branch(tree, &node_modules, branch)? {
                        links.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok::<_, anyhow::Error>(())
                })
            })?;
            let created = self.create_binary_links(tree, *id, &node_modules)?;
            binaries.fetch_add(created, Ordering::Relaxed);
        }

        self.statistics.links_created += links.into_inner();
        self.statistics.links_created_bin += binaries.into_inner();
        Ok(self.statistics)
    }

    fn create_binary_links(&self, tree: &DependencyTree, parent: NodeId, node_modules: &Path) -> Result<usize> {
        let bin_dir = node_modules.join(".bin");
        let mut created = 0;
        for &branch in &tree.node(parent).branches {
            let dependency = tree.node(branch);
            let Some(location) = dependency.storage_location.as_deref() else { continue };
            let entries = dependency.manifest.bin_entries();
            if entries.is_empty() {
                continue;
            }
            debug!(
                "Creating {} .bin entries for '{}' in '{}'…",
                entries.len(),
                dependency,
                tree.node(parent)
            );
            for (bin_name, bin_target) in entries {
                let Some(source) = safe_join(location, &bin_target) else { continue };
                let shim = bin_dir.join(&bin_name);
                // Whatever is there was made by this run and already points at the right binary.
                if std::fs::symlink_metadata(&shim).is_ok() {
                    continue;
                }
                fsutil::ensure_dir(&bin_dir)?;
                self.shim
                    .create(&source, &shim)
                    .with_context(|| format!("create {}", shim.display()))?;
                debug!("Linked '{}' ← '{}'.", shim.display(), source.display());
                created += 1;
            }
        }
        Ok(created)
    }
}

/// Link `branch` into `node_modules`. Losing a race against another writer
/// of the same link counts as done; returns whether this call made the link.
fn link_branch(tree: &DependencyTree, node_modules: &Path, branch: NodeId) -> Result<bool> {
    let node = tree.node(branch);
    let Some(source) = node.storage_location.as_deref() else { return Ok(false) };
    let target = package_path(node_modules, &node.name);
    if let Some(parent) = target.parent() {
        fsutil::ensure_dir(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fsutil::remove_all(&target).with_context(|| format!("remove {}", target.display()))?;
    place_link(source, &target)
}

/// An existing `target` was put there by a concurrent writer and counts as linked.
fn place_link(source: &Path, target: &Path) -> Result<bool> {
    match fsutil::symlink_dir(source, target) {
        Ok(()) => {
            debug!("Linked '{}' ← '{}'.", target.display(), source.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e).with_context(|| format!("link {} to {}", target.display(), source.display())),
    }
}
