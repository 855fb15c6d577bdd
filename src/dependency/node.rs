use crate::manifest::Manifest;
use std::fmt;
use std::path::PathBuf;

/// Index of a node in the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The synthetic root every project hangs off.
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// A declared, possibly not yet resolved, dependency of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub requested_version: String,
    pub resolved_version: Option<String>,
    pub is_development_dependency: bool,
}

impl Dependency {
    pub fn new(
        name: impl Into<String>,
        requested_version: impl Into<String>,
        is_development_dependency: bool,
    ) -> Self {
        Self {
            name: name.into(),
            requested_version: requested_version.into(),
            resolved_version: None,
            is_development_dependency,
        }
    }

    pub fn tag(&self) -> String {
        format!("{}@{}", self.name, self.requested_version)
    }
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub name: String,
    pub version: String,
    pub manifest: Manifest,
    pub storage_location: Option<PathBuf>,
    /// Dependencies that haven't been matched to a branch yet.
    pub dependencies: Vec<Dependency>,
    pub branches: Vec<NodeId>,
    pub pinned_versions: Vec<NodeId>,
    pub is_root_project: bool,
    pub tarball: Option<String>,
    pub integrity: Option<String>,
}

impl TreeNode {
    pub(crate) fn root() -> Self {
        Self {
            name: super::ROOT_NAME.to_string(),
            version: "*".to_string(),
            manifest: Manifest::new(super::ROOT_NAME, "*"),
            storage_location: None,
            dependencies: Vec::new(),
            branches: Vec::new(),
            pinned_versions: Vec::new(),
            is_root_project: false,
            tarball: None,
            integrity: None,
        }
    }

    pub(crate) fn from_manifest(manifest: Manifest, storage_location: PathBuf) -> Self {
        let dependencies = dependencies_from_manifest(&manifest);
        Self {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            tarball: manifest.tarball(),
            integrity: manifest.integrity(),
            manifest,
            storage_location: Some(storage_location),
            dependencies,
            branches: Vec::new(),
            pinned_versions: Vec::new(),
            is_root_project: false,
        }
    }

    pub fn tag(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl fmt::Display for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

fn dependencies_from_manifest(manifest: &Manifest) -> Vec<Dependency> {
    let runtime = manifest
        .dependencies
        .iter()
        .chain(&manifest.peer_dependencies)
        .map(|(name, range)| Dependency::new(name, range, false));
    let development = manifest
        .dev_dependencies
        .iter()
        .map(|(name, range)| Dependency::new(name, range, true));
    runtime.chain(development).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_all_dependency_kinds_in_order() {
        let mut m = Manifest::new("app", "1.0.0");
        m.dependencies.insert("a".into(), "^1.0.0".into());
        m.peer_dependencies.insert("b".into(), "2.x".into());
        m.dev_dependencies.insert("c".into(), "*".into());
        let node = TreeNode::from_manifest(m, PathBuf::from("/p/app"));
        let names: Vec<_> = node.dependencies.iter().map(|d| (d.name.as_str(), d.is_development_dependency)).collect();
        assert_eq!(names, vec![("a", false), ("b", false), ("c", true)]);
        assert_eq!(node.to_string(), "app@1.0.0");
    }
}
