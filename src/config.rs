//! Configuration for sealing and loading encrypted modules

use crate::{LoaderError, LoaderResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default environment variable holding the symmetric key
pub const DEFAULT_KEY_VAR: &str = "TABLE_CLASSIFIER_KEY";

/// Default environment variable holding the IV
pub const DEFAULT_IV_VAR: &str = "TABLE_CLASSIFIER_IV";

/// How ciphertext files are named from the original module file
///
/// `mod_a.rhai` becomes `mod_a_encrypted.enc` with the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamingScheme {
    /// Appended to the original file stem
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Extension of ciphertext files (without the dot)
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_suffix() -> String {
    "_encrypted".to_string()
}

fn default_extension() -> String {
    "enc".to_string()
}

impl Default for NamingScheme {
    fn default() -> Self {
        Self {
            suffix: default_suffix(),
            extension: default_extension(),
        }
    }
}

impl NamingScheme {
    /// Ciphertext file name for a module stem
    pub fn file_name(&self, stem: &str) -> String {
        format!("{}{}.{}", stem, self.suffix, self.extension)
    }

    /// Recover the module stem from a ciphertext file name
    pub fn stem_of<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name
            .strip_suffix(&self.extension)
            .and_then(|s| s.strip_suffix('.'))
            .and_then(|s| s.strip_suffix(self.suffix.as_str()))
            .filter(|s| !s.is_empty())
    }
}

/// Configuration for the encrypted module loader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Environment variable supplying the key as text
    #[serde(default = "default_key_var")]
    pub key_var: String,

    /// Environment variable supplying the IV as text
    #[serde(default = "default_iv_var")]
    pub iv_var: String,

    /// Ciphertext file naming
    #[serde(default)]
    pub naming: NamingScheme,

    /// Extension of plain module sources
    #[serde(default = "default_source_extension")]
    pub source_extension: String,

    /// Package entry point, never sealed
    #[serde(default = "default_entry_point")]
    pub entry_point: String,

    /// Files/patterns to exclude from sealing
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// File name of the JSON registry manifest written next to the package
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,

    /// Record a BLAKE3 digest of each plaintext in the registry
    #[serde(default = "default_record_digests")]
    pub record_digests: bool,

    /// Keep plaintext sources after sealing
    #[serde(default)]
    pub keep_sources: bool,
}

fn default_key_var() -> String {
    DEFAULT_KEY_VAR.to_string()
}

fn default_iv_var() -> String {
    DEFAULT_IV_VAR.to_string()
}

fn default_source_extension() -> String {
    "rhai".to_string()
}

fn default_entry_point() -> String {
    "__init__.rhai".to_string()
}

fn default_exclude() -> Vec<String> {
    vec!["**/tests/**".to_string(), "**/test_*.rhai".to_string()]
}

fn default_manifest_name() -> String {
    "aurora_modules.json".to_string()
}

fn default_record_digests() -> bool {
    true
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            key_var: default_key_var(),
            iv_var: default_iv_var(),
            naming: NamingScheme::default(),
            source_extension: default_source_extension(),
            entry_point: default_entry_point(),
            exclude: default_exclude(),
            manifest_name: default_manifest_name(),
            record_digests: default_record_digests(),
            keep_sources: false,
        }
    }
}

impl LoaderConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from a JSON file; missing fields take their defaults
    pub fn from_file(path: &Path) -> LoaderResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| LoaderError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Set the environment variable names for key and IV
    pub fn env_vars(mut self, key_var: impl Into<String>, iv_var: impl Into<String>) -> Self {
        self.key_var = key_var.into();
        self.iv_var = iv_var.into();
        self
    }

    /// Set ciphertext file naming
    pub fn naming(mut self, suffix: impl Into<String>, extension: impl Into<String>) -> Self {
        self.naming = NamingScheme {
            suffix: suffix.into(),
            extension: extension.into(),
        };
        self
    }

    /// Add exclude pattern
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// Enable or disable plaintext digests
    pub fn record_digests(mut self, enabled: bool) -> Self {
        self.record_digests = enabled;
        self
    }
}
