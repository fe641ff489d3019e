//! Error types for aurora-loader

use std::path::PathBuf;
use thiserror::Error;

/// Loader error types
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Key material or configuration is missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// No finder in the chain could resolve the module
    #[error("No module named '{0}'")]
    ModuleNotFound(String),

    /// Registered ciphertext file does not exist
    #[error("Ciphertext for '{module}' not found at {path:?}")]
    CiphertextMissing { module: String, path: PathBuf },

    /// Decrypted payload failed validation (padding, digest or encoding)
    #[error("Integrity check failed for '{module}': {reason}")]
    Integrity { module: String, reason: String },

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Recovered source could not be parsed or evaluated
    #[error("Error executing module '{module}': {message}")]
    Execution { module: String, message: String },

    /// Module imports itself, directly or through other modules
    #[error("Circular import detected: {0}")]
    ImportCycle(String),

    /// Registry construction or manifest error
    #[error("Registry error: {0}")]
    Registry(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest (de)serialization error
    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// Error raised by caller-supplied code
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoaderError {
    pub(crate) fn integrity(module: &str, reason: impl Into<String>) -> Self {
        Self::Integrity {
            module: module.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn execution(module: &str, message: impl Into<String>) -> Self {
        Self::Execution {
            module: module.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error should abort process startup rather than a single import
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type for loader operations
pub type LoaderResult<T> = Result<T, LoaderError>;
