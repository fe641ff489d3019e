//! Module registry: logical module name → ciphertext path
//!
//! Built once (by scanning a sealed package, from embedded literal data, or
//! from a JSON manifest) and immutable afterwards. Lookups need no locking.

use crate::config::NamingScheme;
use crate::{LoaderError, LoaderResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One registered encrypted module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Fully-qualified module name, e.g. `pkg.sub.mod_a`
    pub name: String,
    /// Ciphertext path, relative to the registry root
    pub path: PathBuf,
    /// BLAKE3 hex digest of the plaintext, when recorded at seal time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl RegistryEntry {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            digest: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }
}

/// On-disk manifest format
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u8,
    modules: Vec<RegistryEntry>,
}

const MANIFEST_VERSION: u8 = 1;

/// Immutable name → ciphertext map
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    root: PathBuf,
    entries: BTreeMap<String, RegistryEntry>,
}

/// Accumulates entries, rejecting duplicate names
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    root: PathBuf,
    entries: BTreeMap<String, RegistryEntry>,
}

impl RegistryBuilder {
    /// Start a registry whose relative paths resolve against `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Register a module name with its ciphertext path
    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> LoaderResult<()> {
        self.insert_entry(RegistryEntry::new(name, path))
    }

    /// Register a complete entry
    pub fn insert_entry(&mut self, entry: RegistryEntry) -> LoaderResult<()> {
        if entry.name.is_empty() || entry.name.split('.').any(str::is_empty) {
            return Err(LoaderError::Registry(format!(
                "Invalid module name '{}'",
                entry.name
            )));
        }
        if self.entries.contains_key(&entry.name) {
            return Err(LoaderError::Registry(format!(
                "Duplicate module name '{}'",
                entry.name
            )));
        }
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn build(self) -> ModuleRegistry {
        ModuleRegistry {
            root: self.root,
            entries: self.entries,
        }
    }
}

impl ModuleRegistry {
    pub fn builder(root: impl Into<PathBuf>) -> RegistryBuilder {
        RegistryBuilder::new(root)
    }

    /// Build from literal `(name, path, digest)` rows, as emitted by [`crate::embed`]
    pub fn from_static(
        root: impl Into<PathBuf>,
        modules: &[(&str, &str, Option<&str>)],
    ) -> LoaderResult<Self> {
        let mut builder = RegistryBuilder::new(root);
        for (name, path, digest) in modules {
            let mut entry = RegistryEntry::new(*name, *path);
            entry.digest = digest.map(str::to_string);
            builder.insert_entry(entry)?;
        }
        Ok(builder.build())
    }

    /// Enumerate every ciphertext file under `package_dir`
    ///
    /// `pkg_dir/sub/mod_a_encrypted.enc` registers as `package.sub.mod_a`.
    pub fn scan(package_dir: &Path, package: &str, naming: &NamingScheme) -> LoaderResult<Self> {
        let mut builder = RegistryBuilder::new(package_dir);

        for entry in WalkDir::new(package_dir).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel_path = entry.path().strip_prefix(package_dir).unwrap_or(entry.path());
            let Some(stem) = rel_path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| naming.stem_of(n))
            else {
                continue;
            };

            let name = module_name(package, rel_path.parent(), stem);
            tracing::debug!("Registering {} -> {}", name, rel_path.display());
            builder.insert(name, rel_path)?;
        }

        Ok(builder.build())
    }

    /// Load a JSON manifest; relative paths resolve against the manifest's directory
    pub fn load_manifest(path: &Path) -> LoaderResult<Self> {
        let text = fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&text)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(LoaderError::Registry(format!(
                "Unsupported manifest version {}",
                manifest.version
            )));
        }

        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut builder = RegistryBuilder::new(root);
        for entry in manifest.modules {
            builder.insert_entry(entry)?;
        }
        Ok(builder.build())
    }

    /// Write the registry as a JSON manifest
    pub fn save_manifest(&self, path: &Path) -> LoaderResult<()> {
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            modules: self.entries.values().cloned().collect(),
        };
        fs::write(path, serde_json::to_string_pretty(&manifest)?)?;
        Ok(())
    }

    /// Registered ciphertext path for `name`, exactly as inserted
    pub fn lookup(&self, name: &str) -> Option<&Path> {
        self.entries.get(name).map(|e| e.path.as_path())
    }

    pub fn entry(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    /// Registered path joined onto the registry root
    pub fn resolve_path(&self, name: &str) -> Option<PathBuf> {
        self.lookup(name).map(|p| self.root.join(p))
    }

    /// Check that every registered ciphertext file exists
    pub fn verify(&self) -> LoaderResult<()> {
        for entry in self.entries.values() {
            let path = self.root.join(&entry.path);
            if !path.is_file() {
                return Err(LoaderError::CiphertextMissing {
                    module: entry.name.clone(),
                    path,
                });
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `package` + directory components + stem, dot-joined
pub(crate) fn module_name(package: &str, dir: Option<&Path>, stem: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !package.is_empty() {
        parts.push(package.to_string());
    }
    if let Some(dir) = dir {
        parts.extend(
            dir.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned()),
        );
    }
    parts.push(stem.to_string());
    parts.join(".")
}
