use crate::error::{Result, SpodrError};
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Shasum placed on sources for which no integrity can be calculated.
pub const MISSING_SHASUM: &str = "missing";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dependencies: IndexMap<String, String>,
    #[serde(default, rename = "devDependencies", skip_serializing_if = "IndexMap::is_empty")]
    pub dev_dependencies: IndexMap<String, String>,
    #[serde(default, rename = "peerDependencies", skip_serializing_if = "IndexMap::is_empty")]
    pub peer_dependencies: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<BinField>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub scripts: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<Dist>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Dist {
    #[serde(default)]
    pub tarball: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum BinField {
    Single(String),
    Map(IndexMap<String, String>),
}

impl Manifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into(), ..Self::default() }
    }

    pub fn tag(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Executable entry points as `(binName, relativeTarget)`. A single-string
    /// `bin` is exposed under the unscoped package name.
    pub fn bin_entries(&self) -> Vec<(String, String)> {
        match &self.bin {
            None => Vec::new(),
            Some(BinField::Single(target)) => {
                let name = self.name.rsplit('/').next().unwrap_or(&self.name).to_string();
                vec![(name, target.clone())]
            }
            Some(BinField::Map(map)) => map
                .iter()
                .map(|(name, target)| {
                    let name = name.rsplit('/').next().unwrap_or(name).to_string();
                    (name, target.clone())
                })
                .collect(),
        }
    }

    /// Integrity reported by the source. Falls back to the legacy sha1 shasum.
    pub fn integrity(&self) -> Option<String> {
        let dist = self.dist.as_ref()?;
        if let Some(integrity) = dist.integrity.as_ref().filter(|i| !i.is_empty()) {
            return Some(integrity.clone());
        }
        let shasum = dist.shasum.as_deref()?;
        if shasum == MISSING_SHASUM {
            return None;
        }
        let raw = hex::decode(shasum).ok()?;
        Some(format!("sha1-{}", STANDARD.encode(raw)))
    }

    pub fn tarball(&self) -> Option<String> {
        self.dist.as_ref().map(|d| d.tarball.clone()).filter(|t| !t.is_empty())
    }
}

pub fn load(path: &Path) -> Result<Manifest> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SpodrError::ManifestNotFound(path.to_path_buf()).into());
        }
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let m: Manifest =
        serde_json::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    if m.name.is_empty() {
        anyhow::bail!("name empty in {}", path.display());
    }
    Ok(m)
}

pub fn write(manifest: &Manifest, path: &Path) -> Result<()> {
    let data = serde_json::to_string_pretty(manifest)?;
    fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_bin_uses_unscoped_name() {
        let mut m = Manifest::new("@scope/tool", "1.0.0");
        m.bin = Some(BinField::Single("cli.js".into()));
        assert_eq!(m.bin_entries(), vec![("tool".to_string(), "cli.js".to_string())]);
    }

    #[test]
    fn integrity_falls_back_to_shasum() {
        let mut m = Manifest::new("a", "1.0.0");
        m.dist = Some(Dist {
            tarball: "https://r/a.tgz".into(),
            integrity: None,
            shasum: Some("00ff".into()),
        });
        assert_eq!(m.integrity().as_deref(), Some("sha1-AP8="));
    }

    #[test]
    fn missing_shasum_has_no_integrity() {
        let mut m = Manifest::new("a", "1.0.0");
        m.dist = Some(Dist {
            tarball: "https://r/a.tgz".into(),
            integrity: None,
            shasum: Some(MISSING_SHASUM.into()),
        });
        assert_eq!(m.integrity(), None);
    }

    #[test]
    fn missing_file_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("package.json")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpodrError>(),
            Some(SpodrError::ManifestNotFound(_))
        ));
    }
}
