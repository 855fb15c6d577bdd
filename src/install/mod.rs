use crate::config::{InstallOptions, PackageManagement};
use crate::dependency::{DependencyTree, DownloaderStatistics, ScriptStage};
use crate::downloader::Downloader;
use crate::error::{Result, SpodrError};
use crate::linker::ModulesGenerator;
use crate::lockfile::{self, LockDocument, LOCKFILE_NAME};
use crate::manifest;
use crate::peering;
use crate::resolver::{PackageSource, VersionResolver};
use crate::storage::Storage;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Totals of one install run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallSummary {
    pub projects: usize,
    pub stages: usize,
    pub packages: usize,
    pub versions: usize,
    pub downloaded: usize,
    pub cached: usize,
    /// Versions still failing after the retry.
    pub failed: usize,
    pub plugins_linked: usize,
    pub peers_linked: usize,
    pub links_created: usize,
    pub links_created_bin: usize,
    pub scripts_run: usize,
    pub scripts_failed: usize,
    pub lockfiles: Vec<PathBuf>,
}

impl InstallSummary {
    fn absorb(&mut self, stats: &DownloaderStatistics) {
        self.downloaded += stats.packages_downloaded;
        self.cached += stats.packages_already_in_cache;
    }
}

pub struct Installer {
    options: InstallOptions,
    management: PackageManagement,
    source: Arc<dyn PackageSource>,
}

impl Installer {
    pub fn new(
        options: InstallOptions,
        management: PackageManagement,
        source: Arc<dyn PackageSource>,
    ) -> Self {
        Self { options, management, source }
    }

    pub fn options(&self) -> &InstallOptions {
        &self.options
    }

    /// Resolve, download and link every project, then write their lock files.
    pub fn install(&self, project_dirs: &[PathBuf]) -> Result<(DependencyTree, InstallSummary)> {
        let mut summary = InstallSummary::default();
        let package_paths = project_manifests(project_dirs);
        summary.projects = package_paths.len();
        info!("Considering {} projects.", package_paths.len());

        let resolver = Arc::new(VersionResolver::new(
            self.source.clone(),
            self.management.locks.clone(),
        ));
        let mut tree = DependencyTree::from_package_paths(
            resolver.clone(),
            &package_paths,
            true,
            self.options.pin_roots,
        )?;

        let mut downloader = Downloader::new(Storage::new(&self.options.storage_root));
        self.run_stages(&mut tree, &mut downloader, &resolver, &mut summary)?;

        summary.packages = tree.package_count();
        summary.versions = tree.version_count();
        info!(
            "Tree contains {} discrete packages in {} versions.",
            summary.packages, summary.versions
        );

        info!("Registering plugins as peer dependencies…");
        summary.plugins_linked = peering::link_plugins(&mut tree);
        summary.peers_linked = peering::link_peers(&mut tree, &self.management.peering);

        info!("Generating node_modules…");
        let mut generator = ModulesGenerator::new();
        let links = generator.sync_directories(&tree, self.options.concurrency)?;
        summary.links_created = links.links_created;
        summary.links_created_bin = links.links_created_bin;
        info!(
            "Created {} links with {} binary pointers.",
            links.links_created, links.links_created_bin
        );

        if self.options.run_scripts {
            self.run_scripts(&tree, &mut summary);
        } else if !tree.scripts().is_empty() {
            info!("Skipping {} scripts.", tree.scripts().len());
        }

        summary.lockfiles = write_lockfiles(&tree)?;
        Ok((tree, summary))
    }

    /// Download stages until one neither downloads nor newly tags anything.
    /// Remaining failures get a single extra attempt.
    fn run_stages(
        &self,
        tree: &mut DependencyTree,
        downloader: &mut Downloader,
        resolver: &VersionResolver,
        summary: &mut InstallSummary,
    ) -> Result<()> {
        let force = self.options.update_dependencies;
        let concurrency = self.options.concurrency;
        loop {
            info!("Processing stage {}…", summary.stages);
            let stats = downloader.download(tree, force, concurrency)?;
            tree.assemble();
            if summary.stages == 0 {
                tree.considers_dev_dependencies = false;
            }
            summary.stages += 1;
            summary.absorb(&stats);
            summary.failed = stats.packages_failed;

            if stats.packages_downloaded > 0 || stats.packages_already_in_cache > 0 {
                continue;
            }
            if stats.packages_failed > 0 {
                warn!(
                    "{} packages failed to download. Trying one more time…",
                    stats.packages_failed
                );
                let forgotten = resolver.forget_failures();
                debug!("Forgot {} failed resolutions.", forgotten);
                let retry = downloader.download(tree, force, concurrency)?;
                tree.assemble();
                summary.absorb(&retry);
                summary.failed = retry.packages_failed;
            }
            return Ok(());
        }
    }

    fn run_scripts(&self, tree: &DependencyTree, summary: &mut InstallSummary) {
        let scripts = tree.scripts();
        if scripts.is_empty() {
            return;
        }
        info!("Running {} scripts…", scripts.len());
        for stage in ScriptStage::ALL {
            for script in scripts.iter().filter(|s| s.stage == stage) {
                summary.scripts_run += 1;
                if !script.process(&self.options.package_manager) {
                    summary.scripts_failed += 1;
                }
            }
        }
    }
}

/// `package.json` of every directory that has one.
fn project_manifests(project_dirs: &[PathBuf]) -> Vec<PathBuf> {
    project_dirs
        .iter()
        .map(|dir| dir.join("package.json"))
        .filter(|path| {
            let found = path.is_file();
            if !found {
                debug!("{}", SpodrError::ManifestNotFound(path.clone()));
            }
            found
        })
        .collect()
}

/// One lock file per root project, next to its `package.json`.
pub fn write_lockfiles(tree: &DependencyTree) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for project in tree.root_projects() {
        let Some(location) = tree.node(project).storage_location.as_deref() else { continue };
        let document = LockDocument::generate(tree, project);
        let path = location.join(LOCKFILE_NAME);
        info!("Writing '{}'…", path.display());
        lockfile::write(&document, &path)?;
        written.push(path);
    }
    Ok(written)
}

/// Non-hidden sub-directories of `work_area` that contain a parseable `package.json`.
pub fn discover_projects(work_area: &Path) -> Result<Vec<PathBuf>> {
    let mut projects = Vec::new();
    let entries =
        fs::read_dir(work_area).with_context(|| format!("read {}", work_area.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') || !entry.file_type()?.is_dir() {
            continue;
        }
        let dir = entry.path();
        match manifest::load(&dir.join("package.json")) {
            Ok(_) => projects.push(dir),
            Err(e) => debug!("Not a project: {:#}", e),
        }
    }
    projects.sort();
    Ok(projects)
}
