use crate::error::{Result, SpodrError};
use crate::manifest::{self, Manifest};
use crate::resolver::range::max_satisfying;
use crate::resolver::{GitSpec, PackageSource, PackageSpec};
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use indexmap::IndexMap;
use parking_lot::Mutex;
use reqwest::blocking::Client;
use serde::Deserialize;
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tar::Archive;
use tracing::debug;

pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

#[derive(Debug, Deserialize, Clone)]
pub struct NpmMetadata {
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: IndexMap<String, String>,
    #[serde(default)]
    pub versions: IndexMap<String, Manifest>,
}

/// Registry, GitHub and plain tarball access over HTTP.
pub struct RegistryClient {
    registry: String,
    http: Client,
    metadata: Mutex<HashMap<String, Arc<NpmMetadata>>>,
}

impl RegistryClient {
    pub fn new(registry: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("spodr/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        let registry = registry
            .unwrap_or_else(|| DEFAULT_REGISTRY.into())
            .trim_end_matches('/')
            .to_string();
        Ok(Self { registry, http, metadata: Mutex::new(HashMap::new()) })
    }

    pub fn package_metadata(&self, name: &str) -> Result<Arc<NpmMetadata>> {
        if let Some(hit) = self.metadata.lock().get(name).cloned() {
            return Ok(hit);
        }
        // Scoped names are requested with an escaped separator.
        let url = format!("{}/{}", self.registry, name.replacen('/', "%2f", 1));
        let resp = self.http.get(&url).send().with_context(|| format!("GET {}", url))?;
        if !resp.status().is_success() {
            anyhow::bail!("registry returned {} for {}", resp.status(), name);
        }
        let meta: Arc<NpmMetadata> =
            Arc::new(resp.json().with_context(|| format!("decode metadata of {}", name))?);
        self.metadata.lock().insert(name.to_string(), meta.clone());
        Ok(meta)
    }

    pub fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.http.get(url).send().with_context(|| format!("GET {}", url))?;
        if !resp.status().is_success() {
            anyhow::bail!("tarball fetch {} status {}", url, resp.status());
        }
        Ok(resp.bytes()?.to_vec())
    }

    fn registry_manifest(&self, name: &str, range: &str) -> Result<Option<Manifest>> {
        let meta = self.package_metadata(name)?;
        let trimmed = range.trim();
        let chosen = if let Some(tagged) = meta.dist_tags.get(trimmed) {
            Some(tagged.as_str())
        } else if trimmed.is_empty() || trimmed == "*" {
            meta.dist_tags.get("latest").map(String::as_str).or_else(|| {
                max_satisfying(meta.versions.keys().map(String::as_str), "*").ok().flatten()
            })
        } else {
            max_satisfying(meta.versions.keys().map(String::as_str), trimmed)?
        };
        Ok(chosen.and_then(|version| meta.versions.get(version)).cloned())
    }

    fn git_manifest(&self, git: &GitSpec) -> Result<Manifest> {
        let url = git.manifest_url();
        let resp = self.http.get(&url).send().with_context(|| format!("GET {}", url))?;
        if !resp.status().is_success() {
            anyhow::bail!("{} returned {}", url, resp.status());
        }
        resp.json().with_context(|| format!("decode package.json from {}", url))
    }

    fn remote_manifest(&self, url: &str) -> Result<Manifest> {
        let bytes = self.download(url)?;
        let scratch = tempfile::Builder::new()
            .prefix("spodr-")
            .tempdir()
            .context("create scratch directory")?;
        extract_tarball(&bytes, scratch.path())?;
        manifest::load(&scratch.path().join("package.json"))
    }
}

impl PackageSource for RegistryClient {
    fn manifest(&self, name: &str, spec: &PackageSpec) -> Result<Option<Manifest>> {
        match spec {
            PackageSpec::Registry { range } => self.registry_manifest(name, range),
            PackageSpec::Git(git) => self.git_manifest(git).map(Some),
            PackageSpec::Remote { url } => self.remote_manifest(url).map(Some),
        }
    }

    fn fetch(&self, manifest: &Manifest, dest: &Path) -> Result<()> {
        let url = manifest
            .tarball()
            .ok_or_else(|| SpodrError::UnsupportedSource(manifest.tag()))?;
        let bytes = self.download(&url)?;
        if let Some(integrity) = manifest.integrity() {
            verify_integrity(&bytes, &integrity)
                .with_context(|| format!("verify {}", manifest.tag()))?;
        }
        extract_tarball(&bytes, dest).with_context(|| format!("extract {}", manifest.tag()))?;
        debug!("Fetched '{}' from {}.", manifest.tag(), url);
        Ok(())
    }
}

/// Checks `bytes` against a `sha512-` integrity; other algorithms are accepted as-is.
pub fn verify_integrity(bytes: &[u8], integrity: &str) -> Result<()> {
    let Some(b64) = integrity.strip_prefix("sha512-") else {
        return Ok(());
    };
    let digest = Sha512::digest(bytes);
    let raw = STANDARD.decode(b64).context("decode integrity base64")?;
    if raw != digest[..] {
        anyhow::bail!(
            "integrity mismatch: expected {}, got sha512-{}",
            integrity,
            STANDARD.encode(digest)
        );
    }
    Ok(())
}

/// Unpack a gzipped package tarball into `dest` so `package.json` ends up at its root.
pub fn extract_tarball(bytes: &[u8], dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let mut ar = Archive::new(GzDecoder::new(bytes));
    for entry in ar.entries()? {
        let mut e = entry?;
        let path = e.path()?.to_path_buf();
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            continue;
        }
        let comps: Vec<_> = path.components().collect();
        let stripped: PathBuf = if comps.len() > 1 && comps[0].as_os_str() == OsStr::new("package")
        {
            comps[1..].iter().collect()
        } else {
            path.clone()
        };
        if stripped.as_os_str().is_empty() {
            continue;
        }
        let dest_path = dest.join(&stripped);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        e.unpack(&dest_path)?;
    }

    // GitHub archives and some scoped tarballs nest the package one level deeper.
    let entries = fs::read_dir(dest)?.collect::<std::io::Result<Vec<_>>>()?;
    if let [only] = entries.as_slice() {
        let only_path = only.path();
        if only.file_type()?.is_dir() && only_path.join("package.json").exists() {
            for child in fs::read_dir(&only_path)? {
                let child = child?;
                fs::rename(child.path(), dest.join(child.file_name()))?;
            }
            fs::remove_dir(&only_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};

    fn tarball(prefix: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let body = br#"{"name":"demo","version":"1.0.0"}"#;
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{prefix}/package.json"), &body[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn strips_leading_package_dir() {
        let dir = tempfile::tempdir().unwrap();
        extract_tarball(&tarball("package"), dir.path()).unwrap();
        let m = manifest::load(&dir.path().join("package.json")).unwrap();
        assert_eq!(m.tag(), "demo@1.0.0");
    }

    #[test]
    fn promotes_single_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        extract_tarball(&tarball("demo-abc123"), dir.path()).unwrap();
        assert!(dir.path().join("package.json").exists());
        assert!(!dir.path().join("demo-abc123").exists());
    }

    #[test]
    fn integrity_mismatch_is_an_error() {
        let bytes = b"payload";
        let good = format!("sha512-{}", STANDARD.encode(Sha512::digest(bytes)));
        verify_integrity(bytes, &good).unwrap();
        assert!(verify_integrity(b"tampered", &good).is_err());
        verify_integrity(bytes, "sha1-AP8=").unwrap();
    }
}
