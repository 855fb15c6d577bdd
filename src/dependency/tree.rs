use super::node::{NodeId, TreeNode};
use super::script::Script;
use crate::error::{Result, SpodrError};
use crate::fsutil::{PathStat, StatCache};
use crate::manifest::{self, Manifest};
use crate::resolver::VersionResolver;
use anyhow::Context;
use indexmap::{IndexMap, IndexSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Every resolved package of a work area, with the aggregate cache mapping
/// `name -> version tag -> node`.
///
/// Nodes live in an arena and reference each other by [`NodeId`], so the same
/// package version can be a branch of any number of parents.
pub struct DependencyTree {
    nodes: Vec<TreeNode>,
    aggregate_cache: IndexMap<String, IndexMap<String, NodeId>>,
    /// Do development dependencies of root projects take part in resolution?
    pub considers_dev_dependencies: bool,
    stat_cache: StatCache,
    resolver: Arc<VersionResolver>,
    scripts: Vec<Script>,
}

impl DependencyTree {
    pub fn new(resolver: Arc<VersionResolver>, considers_dev_dependencies: bool) -> Self {
        Self {
            nodes: vec![TreeNode::root()],
            aggregate_cache: IndexMap::new(),
            considers_dev_dependencies,
            stat_cache: StatCache::new(),
            resolver,
            scripts: Vec::new(),
        }
    }

    /// Build a tree from the `package.json` files of the given projects.
    pub fn from_package_paths(
        resolver: Arc<VersionResolver>,
        paths: &[PathBuf],
        with_dev_dependencies: bool,
        pin_roots: bool,
    ) -> Result<Self> {
        let mut tree = Self::new(resolver, with_dev_dependencies);
        for path in paths {
            tree.branch_from_existing_package_path(NodeId::ROOT, path)?;
        }
        let projects = tree.node(NodeId::ROOT).branches.clone();
        if pin_roots {
            for &id in &projects {
                let (name, version) = {
                    let node = tree.node(id);
                    (node.name.clone(), node.version.clone())
                };
                tree.pin_version(&name, &version)?;
            }
        }
        for &id in &projects {
            tree.node_mut(id).is_root_project = true;
        }
        tree.assemble();
        Ok(tree)
    }

    /// Build a tree from the packages already unpacked in a storage area.
    /// Symlinked entries are aliases of real directories and are skipped.
    pub fn from_storage_root(
        resolver: Arc<VersionResolver>,
        storage_root: &Path,
        with_dev_dependencies: bool,
    ) -> Result<Self> {
        info!("Generating dependency tree from '{}'…", storage_root.display());
        let helper = StatCache::new();
        let mut candidates = Vec::new();
        for entry in read_dir_sorted(storage_root)? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if name.starts_with('@') && helper.lstat(&entry).is_some_and(|s| s.is_dir && !s.is_symlink) {
                candidates.extend(read_dir_sorted(&entry)?);
            } else {
                candidates.push(entry);
            }
        }

        let mut tree = Self::new(resolver, with_dev_dependencies);
        for path in candidates {
            match helper.lstat(&path) {
                Some(PathStat { is_symlink: false, is_dir: true }) => {}
                _ => continue,
            }
            let manifest_path = path.join("package.json");
            match manifest::load(&manifest_path) {
                Ok(mut manifest) => {
                    // Aliased packages are stored under the name they were requested as.
                    if let Some(stored) = stored_name(storage_root, &path) {
                        if stored != manifest.name {
                            debug!("'{}' is stored as '{}'.", manifest.name, stored);
                            manifest.name = stored;
                        }
                    }
                    tree.branch_from_existing_package(NodeId::ROOT, manifest, path)?;
                }
                Err(e) => warn!("Skipping '{}': {:#}", path.display(), e),
            }
        }
        tree.stat_cache.absorb(helper);
        tree.assemble();
        Ok(tree)
    }

    pub fn root(&self) -> &TreeNode {
        self.node(NodeId::ROOT)
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id.0]
    }

    pub fn resolver(&self) -> &Arc<VersionResolver> {
        &self.resolver
    }

    pub fn stat_cache(&self) -> &StatCache {
        &self.stat_cache
    }

    /// Memoised `lstat` shared by every user of this tree.
    pub fn lstat(&self, path: &Path) -> Option<PathStat> {
        self.stat_cache.lstat(path)
    }

    /// Add a node to the arena without registering it anywhere.
    pub fn make_tree_node(&mut self, manifest: Manifest, storage_location: PathBuf) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(TreeNode::from_manifest(manifest, storage_location));
        id
    }

    /// Register `id` under `version_tag`, or under its own version when no tag is given.
    pub fn store_in_aggregate_cache(&mut self, id: NodeId, version_tag: Option<&str>) -> Result<()> {
        let node = &self.nodes[id.0];
        let tag = version_tag.unwrap_or(&node.version).to_string();
        let versions = self.aggregate_cache.entry(node.name.clone()).or_default();
        if versions.contains_key(&tag) {
            return Err(SpodrError::StorageCollision { name: node.name.clone(), tag }.into());
        }
        versions.insert(tag, id);
        Ok(())
    }

    pub fn package_from_aggregate_cache(&self, name: &str, version_tag: &str) -> Option<NodeId> {
        self.aggregate_cache.get(name)?.get(version_tag).copied()
    }

    pub fn has_package(&self, name: &str) -> bool {
        self.aggregate_cache.contains_key(name)
    }

    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.aggregate_cache.keys().map(String::as_str)
    }

    /// Every node in the aggregate cache once, in registration order.
    pub fn cached_nodes(&self) -> Vec<NodeId> {
        let unique: IndexSet<NodeId> =
            self.aggregate_cache.values().flat_map(|versions| versions.values().copied()).collect();
        unique.into_iter().collect()
    }

    /// Number of distinct package names.
    pub fn package_count(&self) -> usize {
        self.aggregate_cache.len()
    }

    /// Number of distinct package versions.
    pub fn version_count(&self) -> usize {
        self.cached_nodes().len()
    }

    pub fn root_projects(&self) -> Vec<NodeId> {
        self.root().branches.iter().copied().filter(|&id| self.node(id).is_root_project).collect()
    }

    pub fn branch_from_existing_package(
        &mut self,
        parent: NodeId,
        manifest: Manifest,
        storage_location: PathBuf,
    ) -> Result<NodeId> {
        let id = self.make_tree_node(manifest, storage_location);
        self.node_mut(parent).branches.push(id);
        self.store_in_aggregate_cache(id, None)?;
        Ok(id)
    }

    pub fn branch_from_existing_package_path(
        &mut self,
        parent: NodeId,
        package_path: &Path,
    ) -> Result<NodeId> {
        let manifest = manifest::load(package_path)?;
        let location = package_path
            .parent()
            .map(Path::to_path_buf)
            .with_context(|| format!("{} has no parent directory", package_path.display()))?;
        self.branch_from_existing_package(parent, manifest, location)
    }

    pub fn branch_by_name(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.node(id).branches.iter().copied().find(|&b| self.node(b).name == name)
    }

    pub fn has_branch_for(&self, id: NodeId, name: &str) -> bool {
        self.branch_by_name(id, name).is_some()
    }

    /// Every cached node that has a branch named `name`.
    pub fn find_dependants(&self, name: &str) -> Vec<NodeId> {
        self.cached_nodes().into_iter().filter(|&id| self.has_branch_for(id, name)).collect()
    }

    pub fn register_script(&mut self, script: Script) {
        self.scripts.push(script);
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    fn dependency_is_considered(&self, id: NodeId, is_development_dependency: bool) -> bool {
        !is_development_dependency
            || (self.considers_dev_dependencies && self.node(id).is_root_project)
    }

    /// Every `(name, requested range)` not yet satisfied by a branch, grouped by name.
    pub fn condensed_dependency_list(&self) -> IndexMap<String, IndexSet<String>> {
        let mut list: IndexMap<String, IndexSet<String>> = IndexMap::new();
        for id in self.cached_nodes() {
            for dependency in &self.node(id).dependencies {
                if !self.dependency_is_considered(id, dependency.is_development_dependency) {
                    continue;
                }
                list.entry(dependency.name.clone())
                    .or_default()
                    .insert(dependency.requested_version.clone());
            }
        }
        list
    }

    /// Resolve pending dependencies of every cached node against pinned roots
    /// and the aggregate cache.
    pub fn assemble(&mut self) -> &mut Self {
        for id in self.cached_nodes() {
            self.resolve_dependencies(id);
        }
        self
    }

    fn resolve_dependencies(&mut self, id: NodeId) {
        let pending = std::mem::take(&mut self.nodes[id.0].dependencies);
        let mut unresolved = Vec::new();
        let mut resolved = Vec::new();

        for mut dependency in pending {
            if !self.dependency_is_considered(id, dependency.is_development_dependency) {
                unresolved.push(dependency);
                continue;
            }

            let pinned = self
                .root()
                .pinned_versions
                .iter()
                .copied()
                .find(|&p| self.node(p).name == dependency.name);
            if let Some(pinned) = pinned {
                let pinned_node = self.node(pinned);
                if dependency.requested_version != pinned_node.version {
                    info!(
                        "Replacing dependency in '{}' on '{}' with root package '{}'.",
                        self.node(id),
                        dependency.tag(),
                        pinned_node
                    );
                }
                dependency.resolved_version = Some(pinned_node.version.clone());
                resolved.push(pinned);
                continue;
            }

            match self.package_from_aggregate_cache(&dependency.name, &dependency.requested_version) {
                Some(cached) => {
                    dependency.resolved_version = Some(self.node(cached).version.clone());
                    resolved.push(cached);
                }
                None => unresolved.push(dependency),
            }
        }

        let node = &mut self.nodes[id.0];
        for branch in resolved {
            if !node.branches.contains(&branch) {
                node.branches.push(branch);
            }
        }
        node.dependencies = unresolved;
    }

    /// Redirect every dependency on `package_name` to the cached `version_to_use`.
    pub fn pin_version(&mut self, package_name: &str, version_to_use: &str) -> Result<()> {
        let pinnable = self.package_from_aggregate_cache(package_name, version_to_use).ok_or_else(|| {
            SpodrError::MissingPinTarget {
                name: package_name.to_string(),
                version: version_to_use.to_string(),
            }
        })?;
        debug!("Pinning '{}@{}'.", package_name, version_to_use);
        self.node_mut(NodeId::ROOT).pinned_versions.push(pinnable);
        Ok(())
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

/// Package name encoded in a `<name>@<hash>` storage directory, scope included.
fn stored_name(storage_root: &Path, path: &Path) -> Option<String> {
    let leaf = path.file_name()?.to_str()?;
    let (name, _) = leaf.rsplit_once('@')?;
    if name.is_empty() {
        return None;
    }
    let parent = path.parent()?;
    if parent == storage_root {
        return Some(name.to_string());
    }
    let scope = parent.file_name()?.to_str()?;
    Some(format!("{scope}/{name}"))
}
