use super::common::{package, resolver, store_package, FakeSource};
use crate::dependency::{DependencyTree, NodeId};
use crate::linker::bin::EntryPointShim;
use crate::linker::ModulesGenerator;
use crate::manifest::BinField;
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn linked_tree(work: &Path) -> (DependencyTree, PathBuf) {
    let storage = work.join(".packages");
    let mut tool = package("tool", "1.0.0", &[]);
    tool.bin = Some(BinField::Single("cli.js".into()));
    let tool_dir = store_package(&storage, &tool);
    fs::write(tool_dir.join("cli.js"), "#!/usr/bin/env node\n").unwrap();
    store_package(&storage, &package("@scope/util", "2.0.0", &[]));

    let project = work.join("app");
    fs::create_dir_all(&project).unwrap();
    let mut tree = DependencyTree::new(resolver(FakeSource::new()), false);
    let app = tree
        .branch_from_existing_package(
            NodeId::ROOT,
            package("app", "1.0.0", &[("tool", "^1.0.0"), ("@scope/util", "2.0.0")]),
            project.clone(),
        )
        .unwrap();
    tree.node_mut(app).is_root_project = true;
    for (name, version) in [("tool", "1.0.0"), ("@scope/util", "2.0.0")] {
        let location = crate::fsutil::hashed_storage_path(&storage, name, version);
        let manifest = crate::manifest::load(&location.join("package.json")).unwrap();
        let id = tree.make_tree_node(manifest, location);
        tree.store_in_aggregate_cache(id, None).unwrap();
    }
    let tool_id = tree.package_from_aggregate_cache("tool", "1.0.0").unwrap();
    tree.store_in_aggregate_cache(tool_id, Some("^1.0.0")).unwrap();
    tree.assemble();
    (tree, project)
}

/// Records every requested shim instead of touching the filesystem.
#[derive(Default, Clone)]
struct RecordingShim {
    created: Arc<Mutex<Vec<(PathBuf, PathBuf)>>>,
}

impl EntryPointShim for RecordingShim {
    fn create(&self, target: &Path, shim: &Path) -> io::Result<()> {
        self.created.lock().push((target.to_path_buf(), shim.to_path_buf()));
        Ok(())
    }
}

#[test]
fn links_every_branch_into_node_modules() {
    let work = tempfile::tempdir().unwrap();
    let (tree, project) = linked_tree(work.path());
    let mut generator = ModulesGenerator::new();
    let stats = generator.sync_directories(&tree, 2).unwrap();

    assert_eq!(stats.links_created, 2);
    assert_eq!(stats.links_created_bin, 1);
    let modules = project.join("node_modules");
    assert!(fs::symlink_metadata(modules.join("tool")).unwrap().file_type().is_symlink());
    assert!(modules.join("@scope").join("util").join("package.json").is_file());
    let shim = modules.join(".bin").join("tool");
    assert!(fs::read_link(&shim).unwrap().ends_with("cli.js"));
}

#[test]
fn second_sync_reproduces_the_same_farm() {
    let work = tempfile::tempdir().unwrap();
    let (tree, project) = linked_tree(work.path());
    let modules = project.join("node_modules");
    fs::create_dir_all(modules.join("stale")).unwrap();

    let first = ModulesGenerator::new().sync_directories(&tree, 2).unwrap();
    let listing = |dir: &Path| {
        let mut names: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .map(|e| e.unwrap().path().strip_prefix(dir).unwrap().to_path_buf())
            .collect();
        names.sort();
        names
    };
    let before = listing(&modules);
    let second = ModulesGenerator::new().sync_directories(&tree, 2).unwrap();
    assert_eq!(first, second);
    assert_eq!(before, listing(&modules));
    assert!(!modules.join("stale").exists());
}

#[test]
fn shims_go_through_the_configured_flavour() {
    let work = tempfile::tempdir().unwrap();
    let (tree, project) = linked_tree(work.path());
    let shim = RecordingShim::default();
    let mut generator = ModulesGenerator::with_shim(Box::new(shim.clone()));
    generator.sync_directories(&tree, 1).unwrap();

    let created = shim.created.lock().clone();
    assert_eq!(created.len(), 1);
    assert!(created[0].0.ends_with("cli.js"));
    assert_eq!(created[0].1, project.join("node_modules").join(".bin").join("tool"));
}
