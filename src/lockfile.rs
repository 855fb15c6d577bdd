//! Flattens the resolved graph below a project into an npm style lock document.
//!
//! Every package name gets one entry directly below the document root.
//! Packages seen in a single version go there unconditionally, otherwise
//! the version the project depends on directly, otherwise the version with
//! the most dependants. Remaining versions are nested below the entry that
//! needs them, unless the nearest ancestor carrying that name already has
//! the same version.

use crate::dependency::{DependencyTree, NodeId};
use crate::error::Result;
use anyhow::Context;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use tracing::info;

pub const LOCKFILE_NAME: &str = "package-lock.json";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LockDocument {
    pub name: String,
    pub version: String,
    pub lockfile_version: u32,
    pub requires: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_symlinks: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, LockDependency>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LockDependency {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requires: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, LockDependency>,
}

/// What the traversal learned about one package version.
#[derive(Debug)]
struct VersionEntry {
    node: NodeId,
    lowest_depth_seen: usize,
    dependants: IndexSet<NodeId>,
}

/// A placed package: index 0 is the document root.
#[derive(Debug)]
struct Placement {
    node: NodeId,
    parent: Option<usize>,
    children: IndexMap<String, usize>,
}

impl LockDocument {
    pub fn generate(tree: &DependencyTree, project: NodeId) -> Self {
        let project_node = tree.node(project);
        let mut versions = collect_versions(tree, project);
        info!("{} has {} packages in the dependency tree.", project_node, versions.len());

        let mut placements = vec![Placement { node: project, parent: None, children: IndexMap::new() }];

        // Packages with a single version in the tree.
        versions.retain(|name, by_version| {
            if by_version.len() != 1 {
                return true;
            }
            let (_, sole) = &by_version[0];
            place_at_root(&mut placements, name, sole.node);
            false
        });

        // Versions the project depends on directly.
        for (name, by_version) in &mut versions {
            by_version.retain(|(_, entry)| {
                if entry.lowest_depth_seen == 0 && !placements[0].children.contains_key(name) {
                    place_at_root(&mut placements, name, entry.node);
                    return false;
                }
                true
            });
        }

        // Conflicts nobody at the root claimed: the most depended upon version wins.
        for (name, by_version) in &versions {
            if placements[0].children.contains_key(name) {
                continue;
            }
            let mut favorite: Option<&VersionEntry> = None;
            for (_, candidate) in by_version {
                if favorite.map_or(true, |f| f.dependants.len() < candidate.dependants.len()) {
                    favorite = Some(candidate);
                }
            }
            if let Some(favorite) = favorite {
                place_at_root(&mut placements, name, favorite.node);
            }
        }

        let top_level: Vec<usize> = placements[0].children.values().copied().collect();
        for idx in top_level {
            let node = placements[idx].node;
            make_dependencies(tree, &mut placements, idx, node);
        }

        LockDocument {
            name: project_node.name.clone(),
            version: project_node.version.clone(),
            lockfile_version: 1,
            requires: true,
            preserve_symlinks: std::env::var("NODE_PRESERVE_SYMLINKS").ok(),
            dependencies: render_children(tree, &placements, 0),
        }
    }
}

fn place_at_root(placements: &mut Vec<Placement>, name: &str, node: NodeId) {
    if placements[0].children.contains_key(name) {
        return;
    }
    let idx = placements.len();
    placements.push(Placement { node, parent: Some(0), children: IndexMap::new() });
    placements[0].children.insert(name.to_string(), idx);
}

/// name -> [(version, entry)] in encounter order. Breadth first from the
/// project, so the shallowest sighting of a version comes first.
fn collect_versions(
    tree: &DependencyTree,
    project: NodeId,
) -> IndexMap<String, Vec<(String, VersionEntry)>> {
    let mut versions: IndexMap<String, Vec<(String, VersionEntry)>> = IndexMap::new();
    let mut queue = VecDeque::from([(project, 0usize)]);
    while let Some((parent, depth)) = queue.pop_front() {
        let mut is_branch_stale = true;
        let branches = &tree.node(parent).branches;
        for &branch in branches {
            let node = tree.node(branch);
            let by_version = versions.entry(node.name.clone()).or_default();
            let entry = match by_version.iter().position(|(v, _)| *v == node.version) {
                Some(pos) => &mut by_version[pos].1,
                None => {
                    by_version.push((
                        node.version.clone(),
                        VersionEntry { node: branch, lowest_depth_seen: depth, dependants: IndexSet::new() },
                    ));
                    is_branch_stale = false;
                    let last = by_version.len() - 1;
                    &mut by_version[last].1
                }
            };
            entry.lowest_depth_seen = entry.lowest_depth_seen.min(depth);
            entry.dependants.insert(parent);
        }
        // Nothing new below a node whose branches were all registered before.
        if !is_branch_stale {
            queue.extend(branches.iter().map(|&b| (b, depth + 1)));
        }
    }
    versions
}

/// Nest `node`'s branches below placement `idx` where the lookup from
/// there would otherwise find a different version.
fn make_dependencies(tree: &DependencyTree, placements: &mut Vec<Placement>, idx: usize, node: NodeId) {
    for &branch in &tree.node(node).branches {
        if is_satisfied(tree, placements, idx, branch) {
            continue;
        }
        let child = placements.len();
        placements.push(Placement { node: branch, parent: Some(idx), children: IndexMap::new() });
        placements[idx].children.insert(tree.node(branch).name.clone(), child);
        make_dependencies(tree, placements, child, branch);
    }
}

/// Would a lookup of `branch`'s name starting at placement `from` find this
/// exact version? A branch that already encloses `from` counts as found.
fn is_satisfied(tree: &DependencyTree, placements: &[Placement], from: usize, branch: NodeId) -> bool {
    let wanted = tree.node(branch);
    let mut cursor = Some(from);
    let mut decided = false;
    while let Some(idx) = cursor {
        let placement = &placements[idx];
        if placement.node == branch {
            return true;
        }
        if !decided {
            if let Some(&found) = placement.children.get(&wanted.name) {
                if tree.node(placements[found].node).version == wanted.version {
                    return true;
                }
                decided = true;
            }
        }
        cursor = placement.parent;
    }
    false
}

fn render_children(
    tree: &DependencyTree,
    placements: &[Placement],
    idx: usize,
) -> BTreeMap<String, LockDependency> {
    placements[idx]
        .children
        .iter()
        .map(|(name, &child)| {
            let node = tree.node(placements[child].node);
            let requires = node
                .branches
                .iter()
                .map(|&b| {
                    let branch = tree.node(b);
                    (branch.name.clone(), branch.version.clone())
                })
                .collect();
            let dependency = LockDependency {
                version: node.version.clone(),
                resolved: node.tarball.clone(),
                integrity: node.integrity.clone(),
                requires,
                dependencies: render_children(tree, placements, child),
            };
            (name.clone(), dependency)
        })
        .collect()
}

/// Write `document` tab-indented to `path`.
pub fn write(document: &LockDocument, path: &Path) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document.serialize(&mut ser)?;
    buf.push(b'\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn load(path: &Path) -> Result<LockDocument> {
    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let document: LockDocument =
        serde_json::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    if document.lockfile_version == 0 {
        anyhow::bail!("invalid lockfile version in {}", path.display());
    }
    Ok(document)
}
