use crate::error::{Result, SpodrError};
use anyhow::Context;
use glob::Pattern;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// File in the work area that declares version locks and peering offers.
pub const LOCKS_FILENAME: &str = "spodr.locks.json";

/// Directory name of the shared package storage inside the work area.
pub const STORAGE_DIRNAME: &str = ".packages";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionLock {
    pub package_name: String,
    pub if_version_matches: String,
    pub replace_with: String,
}

#[derive(Debug, Clone, Default)]
pub struct VersionLockDirectory {
    locks: IndexMap<String, Vec<VersionLock>>,
}

impl VersionLockDirectory {
    pub fn package_locks(&self, package_name: &str) -> Option<&[VersionLock]> {
        self.locks.get(package_name).map(Vec::as_slice)
    }

    /// Lock down versions of `package_name` matching `if_version_matches` to `replace_with`.
    pub fn lock(&mut self, package_name: &str, if_version_matches: &str, replace_with: &str) {
        self.locks.entry(package_name.to_string()).or_default().push(VersionLock {
            package_name: package_name.to_string(),
            if_version_matches: if_version_matches.to_string(),
            replace_with: replace_with.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Peers a host accepts: a glob over package names and the versions that qualify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPattern {
    pub pattern: Pattern,
    pub range: String,
}

impl PeerPattern {
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.matches(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeeringOffer {
    pub package_name: String,
    pub if_version_matches: String,
    pub peers: Vec<PeerPattern>,
}

#[derive(Debug, Clone, Default)]
pub struct PeeringDirectory {
    offers: IndexMap<String, Vec<PeeringOffer>>,
}

impl PeeringDirectory {
    pub fn peering_offers(&self, package_name: &str) -> Option<&[PeeringOffer]> {
        self.offers.get(package_name).map(Vec::as_slice)
    }

    /// Offer every package whose name matches a key of `peer_with`, in a
    /// version satisfying its value, to `package_name` in `if_version_matches`.
    pub fn offer_peer(
        &mut self,
        package_name: &str,
        if_version_matches: &str,
        peer_with: IndexMap<String, String>,
    ) -> Result<()> {
        let peers = peer_with
            .into_iter()
            .map(|(pattern, range)| {
                let compiled = Pattern::new(&pattern).map_err(|e| SpodrError::InvalidPeerPattern {
                    package: package_name.to_string(),
                    pattern: pattern.clone(),
                    reason: e.msg.to_string(),
                })?;
                Ok(PeerPattern { pattern: compiled, range })
            })
            .collect::<Result<Vec<_>>>()?;
        self.offers.entry(package_name.to_string()).or_default().push(PeeringOffer {
            package_name: package_name.to_string(),
            if_version_matches: if_version_matches.to_string(),
            peers,
        });
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeeringOffer> {
        self.offers.values().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PackageManagement {
    /// Redirect every reference to a root project onto the root project itself,
    /// regardless of the declared range.
    pub pin_roots: bool,
    /// Ask the sources again for every range instead of trusting the storage area.
    pub update_dependencies: bool,
    pub locks: VersionLockDirectory,
    pub peering: PeeringDirectory,
}

impl Default for PackageManagement {
    fn default() -> Self {
        Self {
            pin_roots: true,
            update_dependencies: false,
            locks: VersionLockDirectory::default(),
            peering: PeeringDirectory::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LocksFile {
    #[serde(default)]
    pin_roots: Option<bool>,
    #[serde(default)]
    update_dependencies: Option<bool>,
    #[serde(default)]
    locks: IndexMap<String, IndexMap<String, String>>,
    #[serde(default)]
    peering: IndexMap<String, IndexMap<String, IndexMap<String, String>>>,
}

impl PackageManagement {
    pub fn parse(data: &str) -> Result<Self> {
        let file: LocksFile = serde_json::from_str(data)?;
        let mut config = Self::default();
        if let Some(pin_roots) = file.pin_roots {
            config.pin_roots = pin_roots;
        }
        if let Some(update) = file.update_dependencies {
            config.update_dependencies = update;
        }
        for (package_name, version_locks) in &file.locks {
            for (if_version_matches, replace_with) in version_locks {
                config.locks.lock(package_name, if_version_matches, replace_with);
            }
        }
        for (package_name, host_config) in file.peering {
            for (if_version_matches, peer_with) in host_config {
                config.peering.offer_peer(&package_name, &if_version_matches, peer_with)?;
            }
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("read package locks from {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("parse package locks in {}", path.display()))
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Default parallelism: the host core count, capped at 4.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).min(4)
}

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub pin_roots: bool,
    pub update_dependencies: bool,
    pub concurrency: usize,
    pub storage_root: PathBuf,
    pub package_manager: String,
    pub run_scripts: bool,
}

impl InstallOptions {
    pub fn for_work_area(work_area: &Path) -> Self {
        Self {
            pin_roots: true,
            update_dependencies: false,
            concurrency: default_concurrency(),
            storage_root: work_area.join(STORAGE_DIRNAME),
            package_manager: "npm".into(),
            run_scripts: true,
        }
    }
}
