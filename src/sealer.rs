//! Pack-time sealing of a package directory
//!
//! Every module source except the package entry point is encrypted to
//! `<stem>_encrypted.enc` next to the original, the plaintext is removed, and
//! the resulting registry is written as a JSON manifest at the package root.

use crate::config::LoaderConfig;
use crate::crypto::{plaintext_digest, KeyMaterial};
use crate::registry::{module_name, ModuleRegistry, RegistryBuilder, RegistryEntry};
use crate::{LoaderError, LoaderResult};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Result of sealing a single module
#[derive(Debug, Clone)]
pub struct SealedModule {
    /// Fully-qualified module name
    pub name: String,
    /// Original source path
    pub source: PathBuf,
    /// Ciphertext path
    pub output: PathBuf,
    /// Ciphertext path relative to the package root
    pub relative_path: PathBuf,
    /// BLAKE3 digest of the plaintext
    pub digest: String,
    pub source_size: u64,
    pub sealed_size: u64,
}

/// Result of sealing a package
#[derive(Debug)]
pub struct SealReport {
    pub sealed: Vec<SealedModule>,
    /// Sources left in plaintext (entry point and excluded files)
    pub skipped: Vec<PathBuf>,
    pub registry: ModuleRegistry,
    pub manifest_path: PathBuf,
}

impl SealReport {
    pub fn total_source_size(&self) -> u64 {
        self.sealed.iter().map(|m| m.source_size).sum()
    }

    pub fn total_sealed_size(&self) -> u64 {
        self.sealed.iter().map(|m| m.sealed_size).sum()
    }
}

/// Encrypts package sources with one key/IV pair
pub struct Sealer {
    config: LoaderConfig,
    keys: KeyMaterial,
}

impl Sealer {
    pub fn new(config: LoaderConfig, keys: KeyMaterial) -> Self {
        Self { config, keys }
    }

    /// Seal one source file belonging to `package` rooted at `package_dir`
    pub fn seal_file(
        &self,
        source: &Path,
        package_dir: &Path,
        package: &str,
    ) -> LoaderResult<SealedModule> {
        let rel_path = source.strip_prefix(package_dir).map_err(|_| {
            LoaderError::Config(format!(
                "{} is outside package {}",
                source.display(),
                package_dir.display()
            ))
        })?;
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| LoaderError::Config(format!("Bad file name: {}", source.display())))?;

        let file_name = self.config.naming.file_name(stem);
        let output = source.with_file_name(&file_name);
        let relative_path = rel_path.with_file_name(&file_name);

        let plaintext = zeroize::Zeroizing::new(fs::read(source)?);
        let ciphertext = self.keys.encrypt(&plaintext)?;
        fs::write(&output, &ciphertext)?;

        if !self.config.keep_sources {
            fs::remove_file(source)?;
        }

        Ok(SealedModule {
            name: module_name(package, rel_path.parent(), stem),
            source: source.to_path_buf(),
            output,
            relative_path,
            digest: plaintext_digest(&plaintext),
            source_size: plaintext.len() as u64,
            sealed_size: ciphertext.len() as u64,
        })
    }

    /// Seal every eligible source under `package_dir`
    pub fn seal_package(&self, package_dir: &Path, package: &str) -> LoaderResult<SealReport> {
        let mut sources = Vec::new();
        let mut skipped = Vec::new();

        for entry in WalkDir::new(package_dir).sort_by_file_name() {
            // An unreadable directory would silently drop modules from the registry
            let entry = entry.map_err(std::io::Error::from)?;
            let is_source = entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == self.config.source_extension.as_str());
            if !is_source {
                continue;
            }

            let rel_path = entry.path().strip_prefix(package_dir).unwrap_or(entry.path());
            if self.should_exclude(rel_path) {
                tracing::debug!("Skipping excluded file: {}", rel_path.display());
                skipped.push(entry.path().to_path_buf());
            } else {
                sources.push(entry.path().to_path_buf());
            }
        }

        if sources.is_empty() {
            return Err(LoaderError::Config(format!(
                "No .{} files found to seal in {}",
                self.config.source_extension,
                package_dir.display()
            )));
        }

        let mut builder = RegistryBuilder::new(package_dir);
        let mut sealed = Vec::with_capacity(sources.len());
        for source in &sources {
            let module = self.seal_file(source, package_dir, package)?;
            tracing::info!(
                "Sealed: {} -> {} ({} -> {} bytes)",
                module.source.display(),
                module.output.display(),
                module.source_size,
                module.sealed_size
            );

            let mut entry = RegistryEntry::new(&module.name, &module.relative_path);
            if self.config.record_digests {
                entry = entry.with_digest(&module.digest);
            }
            builder.insert_entry(entry)?;
            sealed.push(module);
        }

        let registry = builder.build();
        let manifest_path = package_dir.join(&self.config.manifest_name);
        registry.save_manifest(&manifest_path)?;

        Ok(SealReport {
            sealed,
            skipped,
            registry,
            manifest_path,
        })
    }

    /// Check if a file should be left unsealed
    fn should_exclude(&self, path: &Path) -> bool {
        // The entry point installs the finder and must stay readable
        if path.file_name().is_some_and(|n| n == self.config.entry_point.as_str()) {
            return true;
        }

        let path_str = path.to_string_lossy().replace('\\', "/");
        for pattern in &self.config.exclude {
            if pattern.contains('*') || pattern.contains('?') {
                if let Ok(re) = regex::Regex::new(&glob_to_regex(pattern)) {
                    if re.is_match(&path_str) {
                        return true;
                    }
                }
            } else if path_str.contains(pattern.as_str()) {
                return true;
            }
        }

        false
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let pattern = pattern.replace('\\', "/");
    let chars: Vec<char> = pattern.chars().collect();

    let mut out = String::from("^");
    let mut i = 0usize;

    while i < chars.len() {
        match chars[i] {
            // `**/` matches zero or more directories
            '*' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                if i + 2 < chars.len() && chars[i + 2] == '/' {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '.' | '+' | '(' | ')' | '|' | '^' | '$' | '{' | '}' | '[' | ']' | '\\' => {
                out.push('\\');
                out.push(chars[i]);
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out.push('$');
    out
}
