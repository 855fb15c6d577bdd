use crate::colors::*;
use crate::config::{InstallOptions, PackageManagement, LOCKS_FILENAME, STORAGE_DIRNAME};
use crate::dependency::DependencyTree;
use crate::downloader::Downloader;
use crate::error::Result;
use crate::fetch::RegistryClient;
use crate::install::{discover_projects, InstallSummary, Installer};
use crate::resolver::{PackageSource, VersionResolver};
use crate::storage::Storage;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "spodr",
    version,
    about = "Shared-storage dependency manager for work areas with many projects",
    long_about = "spodr resolves the dependencies of every project in a work area into one\nshared package storage and links them into each project's node_modules.\n\nExamples:\n  spodr install\n  spodr install app lib --no-pin-roots -j 8\n  spodr tree\n  spodr clean"
)]
pub struct SpodrCli {
    /// Log per-package detail
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve, download and link the dependencies of the given projects
    Install {
        /// Project directories; defaults to every sub-directory holding a package.json
        project_dirs: Vec<PathBuf>,
        /// Resolve references to root projects through their declared ranges
        #[arg(long)]
        no_pin_roots: bool,
        /// Resolve every range again instead of trusting the storage area
        #[arg(long, short = 'u')]
        update: bool,
        /// Parallel downloads and link operations
        #[arg(long, short = 'j')]
        jobs: Option<usize>,
        /// Storage area; defaults to `.packages` in the current directory
        #[arg(long)]
        storage: Option<PathBuf>,
        /// Locks and peering file; defaults to `spodr.locks.json` in the current directory
        #[arg(long)]
        locks: Option<PathBuf>,
        /// Do not run lifecycle scripts of downloaded packages
        #[arg(long)]
        ignore_scripts: bool,
        /// Registry base URL
        #[arg(long)]
        registry: Option<String>,
    },
    /// Delete everything in the storage area
    Clean {
        #[arg(long)]
        storage: Option<PathBuf>,
    },
    /// Read the storage area into a tree and report its size
    Tree {
        #[arg(long)]
        storage: Option<PathBuf>,
    },
}

impl SpodrCli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn run(&self) -> Result<()> {
        let cwd = std::env::current_dir().context("determine current directory")?;
        match &self.command {
            Commands::Install {
                project_dirs,
                no_pin_roots,
                update,
                jobs,
                storage,
                locks,
                ignore_scripts,
                registry,
            } => {
                let management = PackageManagement::load_or_default(
                    &locks.clone().unwrap_or_else(|| cwd.join(LOCKS_FILENAME)),
                )?;
                let mut options = InstallOptions::for_work_area(&cwd);
                options.pin_roots = management.pin_roots && !no_pin_roots;
                options.update_dependencies = management.update_dependencies || *update;
                options.run_scripts = !ignore_scripts;
                if let Some(jobs) = jobs {
                    options.concurrency = (*jobs).max(1);
                }
                if let Some(storage) = storage {
                    options.storage_root = storage.clone();
                }
                let projects = if project_dirs.is_empty() {
                    discover_projects(&cwd)?
                } else {
                    project_dirs.clone()
                };
                let source: Arc<dyn PackageSource> = Arc::new(RegistryClient::new(registry.clone())?);
                cmd_install(Installer::new(options, management, source), &projects)
            }
            Commands::Clean { storage } => cmd_clean(&storage_root(&cwd, storage)),
            Commands::Tree { storage } => cmd_tree(&storage_root(&cwd, storage)),
        }
    }
}

fn storage_root(cwd: &Path, storage: &Option<PathBuf>) -> PathBuf {
    storage.clone().unwrap_or_else(|| cwd.join(STORAGE_DIRNAME))
}

fn cmd_install(installer: Installer, projects: &[PathBuf]) -> Result<()> {
    if projects.is_empty() {
        println!("{gray}[spodr]{reset} {dim}no projects found{reset}", gray = C_GRAY, dim = C_DIM, reset = C_RESET);
        return Ok(());
    }
    let start = Instant::now();
    let (_, summary) = installer.install(projects)?;
    print_summary(&summary, start);
    Ok(())
}

fn print_summary(summary: &InstallSummary, start: Instant) {
    println!(
        "{gray}[spodr]{reset} tree contains {cyan}{packages}{reset} discrete packages in {cyan}{versions}{reset} versions ({stages} stages)",
        gray = C_GRAY,
        cyan = C_CYAN,
        reset = C_RESET,
        packages = summary.packages,
        versions = summary.versions,
        stages = summary.stages
    );
    println!(
        "{gray}[spodr]{reset} {green}{dl} downloaded{reset}, {dim}{cached} cached{reset}",
        gray = C_GRAY,
        green = C_GREEN,
        dim = C_DIM,
        reset = C_RESET,
        dl = summary.downloaded,
        cached = summary.cached
    );
    if summary.failed > 0 {
        println!(
            "{gray}[spodr]{reset} {red}{failed} failed{reset}",
            gray = C_GRAY,
            red = C_RED,
            reset = C_RESET,
            failed = summary.failed
        );
    }
    if summary.plugins_linked + summary.peers_linked > 0 {
        println!(
            "{gray}[spodr]{reset} peered {plugins} plugins and {peers} offered peers",
            gray = C_GRAY,
            reset = C_RESET,
            plugins = summary.plugins_linked,
            peers = summary.peers_linked
        );
    }
    if summary.scripts_run > 0 {
        let color = if summary.scripts_failed > 0 { C_YELLOW } else { C_GREEN };
        println!(
            "{gray}[spodr]{reset} ran {run} scripts, {color}{failed} failed{reset}",
            gray = C_GRAY,
            reset = C_RESET,
            run = summary.scripts_run,
            failed = summary.scripts_failed
        );
    }
    println!(
        "{gray}[spodr]{reset} {green}linked{reset} {links} packages with {bins} binaries for {projects} projects in {secs:.2?}",
        gray = C_GRAY,
        green = C_GREEN,
        reset = C_RESET,
        links = summary.links_created,
        bins = summary.links_created_bin,
        projects = summary.projects,
        secs = start.elapsed()
    );
    for lockfile in &summary.lockfiles {
        println!("{gray}[spodr]{reset} {dim}wrote {p}{reset}", gray = C_GRAY, dim = C_DIM, reset = C_RESET, p = lockfile.display());
    }
}

fn cmd_clean(storage_root: &Path) -> Result<()> {
    let downloader = Downloader::new(Storage::new(storage_root));
    let removed = downloader.clean()?;
    println!(
        "{gray}[spodr]{reset} {green}storage cleaned{reset} at {p} ({removed} entries removed)",
        gray = C_GRAY,
        green = C_GREEN,
        reset = C_RESET,
        p = storage_root.display()
    );
    Ok(())
}

fn cmd_tree(storage_root: &Path) -> Result<()> {
    if !storage_root.is_dir() {
        println!(
            "{gray}[spodr]{reset} {dim}no storage area at {p}{reset}",
            gray = C_GRAY,
            dim = C_DIM,
            reset = C_RESET,
            p = storage_root.display()
        );
        return Ok(());
    }
    let source: Arc<dyn PackageSource> = Arc::new(RegistryClient::new(None)?);
    let resolver = Arc::new(VersionResolver::new(source, Default::default()));
    let tree = DependencyTree::from_storage_root(resolver, storage_root, false)?;
    let unresolved: usize = tree.condensed_dependency_list().values().map(|v| v.len()).sum();
    println!(
        "{gray}[spodr]{reset} {cyan}{packages}{reset} discrete packages in {cyan}{versions}{reset} versions, {unresolved} unresolved ranges",
        gray = C_GRAY,
        cyan = C_CYAN,
        reset = C_RESET,
        packages = tree.package_count(),
        versions = tree.version_count()
    );
    Ok(())
}
