use super::common::{package, resolver, FakeSource};
use crate::dependency::{DependencyTree, NodeId};
use crate::lockfile::LockDocument;
use crate::manifest::Dist;
use std::path::PathBuf;

struct Graph {
    tree: DependencyTree,
}

impl Graph {
    fn new() -> Self {
        Self { tree: DependencyTree::new(resolver(FakeSource::new()), false) }
    }

    fn project(&mut self, name: &str) -> NodeId {
        let location = PathBuf::from(format!("/work/{name}"));
        let id = self
            .tree
            .branch_from_existing_package(NodeId::ROOT, package(name, "1.0.0", &[]), location)
            .unwrap();
        self.tree.node_mut(id).is_root_project = true;
        id
    }

    fn add(&mut self, name: &str, version: &str) -> NodeId {
        let mut manifest = package(name, version, &[]);
        manifest.dist = Some(Dist {
            tarball: format!("https://registry.example/{name}/-/{name}-{version}.tgz"),
            integrity: Some(format!("sha512-{name}{version}")),
            shasum: None,
        });
        let id = self.tree.make_tree_node(manifest, PathBuf::from(format!("/store/{name}@{version}")));
        self.tree.store_in_aggregate_cache(id, None).unwrap();
        id
    }

    fn link(&mut self, parent: NodeId, children: &[NodeId]) {
        self.tree.node_mut(parent).branches.extend_from_slice(children);
    }
}

#[test]
fn single_versions_live_at_the_root() {
    let mut g = Graph::new();
    let p = g.project("p");
    let x = g.add("x", "1.0.0");
    let y = g.add("y", "1.0.0");
    g.link(p, &[x, y]);
    g.link(y, &[x]);

    let doc = LockDocument::generate(&g.tree, p);
    assert_eq!(doc.name, "p");
    assert_eq!(doc.lockfile_version, 1);
    assert!(doc.requires);
    assert_eq!(doc.dependencies.len(), 2);
    let y_entry = &doc.dependencies["y"];
    assert!(y_entry.dependencies.is_empty());
    assert_eq!(y_entry.requires.get("x").map(String::as_str), Some("1.0.0"));
    assert_eq!(y_entry.resolved.as_deref(), Some("https://registry.example/y/-/y-1.0.0.tgz"));
    assert_eq!(y_entry.integrity.as_deref(), Some("sha512-y1.0.0"));
}

#[test]
fn direct_dependency_wins_the_root_slot() {
    let mut g = Graph::new();
    let p = g.project("p");
    let q1 = g.add("q", "1.0.0");
    let q2 = g.add("q", "2.0.0");
    let r = g.add("r", "1.0.0");
    g.link(p, &[r, q1]);
    g.link(r, &[q2]);

    let doc = LockDocument::generate(&g.tree, p);
    assert_eq!(doc.dependencies["q"].version, "1.0.0");
    assert_eq!(doc.dependencies["r"].dependencies["q"].version, "2.0.0");
}

#[test]
fn most_depended_upon_version_is_hoisted() {
    let mut g = Graph::new();
    let p = g.project("p");
    let a = g.add("a", "1.0.0");
    let b = g.add("b", "1.0.0");
    let c = g.add("c", "1.0.0");
    let z1 = g.add("z", "1.0.0");
    let z2 = g.add("z", "2.0.0");
    g.link(p, &[a, b, c]);
    g.link(a, &[z1]);
    g.link(b, &[z2]);
    g.link(c, &[z2]);

    let doc = LockDocument::generate(&g.tree, p);
    assert_eq!(doc.dependencies["z"].version, "2.0.0");
    assert_eq!(doc.dependencies["a"].dependencies["z"].version, "1.0.0");
    assert!(doc.dependencies["b"].dependencies.is_empty());
    assert!(doc.dependencies["c"].dependencies.is_empty());
}

#[test]
fn first_seen_version_wins_a_tie() {
    let mut g = Graph::new();
    let p = g.project("p");
    let a = g.add("a", "1.0.0");
    let b = g.add("b", "1.0.0");
    let z1 = g.add("z", "1.0.0");
    let z2 = g.add("z", "2.0.0");
    g.link(p, &[a, b]);
    g.link(a, &[z1]);
    g.link(b, &[z2]);

    let doc = LockDocument::generate(&g.tree, p);
    assert_eq!(doc.dependencies["z"].version, "1.0.0");
    assert_eq!(doc.dependencies["b"].dependencies["z"].version, "2.0.0");
}

#[test]
fn nearest_ancestor_satisfies_nested_children() {
    let mut g = Graph::new();
    let p = g.project("p");
    let m1 = g.add("m", "1.0.0");
    let m2 = g.add("m", "2.0.0");
    let k = g.add("k", "1.0.0");
    let l1 = g.add("l", "1.0.0");
    let l2 = g.add("l", "2.0.0");
    g.link(p, &[m1, k, l1]);
    g.link(k, &[m2, l2]);
    g.link(l2, &[m2]);

    let doc = LockDocument::generate(&g.tree, p);
    let k_entry = &doc.dependencies["k"];
    assert_eq!(k_entry.dependencies["m"].version, "2.0.0");
    assert_eq!(k_entry.dependencies["l"].version, "2.0.0");
    assert!(k_entry.dependencies["l"].dependencies.is_empty());
}

#[test]
fn cycles_do_not_recurse_forever() {
    let mut g = Graph::new();
    let p = g.project("p");
    let s1 = g.add("s", "1.0.0");
    let s2 = g.add("s", "2.0.0");
    let t = g.add("t", "1.0.0");
    let u1 = g.add("u", "1.0.0");
    let u2 = g.add("u", "2.0.0");
    g.link(p, &[s1, t, u1]);
    g.link(t, &[s2]);
    g.link(s2, &[u2]);
    g.link(u2, &[s2]);

    let doc = LockDocument::generate(&g.tree, p);
    let s_nested = &doc.dependencies["t"].dependencies["s"];
    assert_eq!(s_nested.version, "2.0.0");
    let u_nested = &s_nested.dependencies["u"];
    assert_eq!(u_nested.version, "2.0.0");
    assert!(u_nested.dependencies.is_empty());
}

#[test]
fn project_without_dependencies() {
    let mut g = Graph::new();
    let p = g.project("p");
    let doc = LockDocument::generate(&g.tree, p);
    assert!(doc.dependencies.is_empty());
    assert_eq!(doc.version, "1.0.0");
}
