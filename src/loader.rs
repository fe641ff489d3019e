//! Loaders: turn a module spec into an initialized module

use crate::crypto::{plaintext_digest, KeyMaterial};
use crate::executor::ScriptExecutor;
use crate::import::ImportSystem;
use crate::module::Module;
use crate::{LoaderError, LoaderResult};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Executes a module body into a fresh module object
pub trait Loader: Send + Sync {
    fn exec_module(&self, module: &mut Module, imports: &ImportSystem) -> LoaderResult<()>;
}

/// Read, decrypt and unpad a ciphertext file
///
/// Returns the exact plaintext bytes in a buffer that is wiped on drop.
pub fn load(module: &str, path: &Path, keys: &KeyMaterial) -> LoaderResult<Zeroizing<Vec<u8>>> {
    let ciphertext = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => LoaderError::CiphertextMissing {
            module: module.to_string(),
            path: path.to_path_buf(),
        },
        _ => LoaderError::Io(e),
    })?;

    keys.decrypt(module, &ciphertext).map(Zeroizing::new)
}

/// Loader for sealed modules
///
/// Stateless across imports: every call re-reads and re-decrypts the file and
/// the plaintext is wiped once the module body has run.
pub struct DecryptingLoader {
    name: String,
    path: PathBuf,
    digest: Option<String>,
    keys: Arc<KeyMaterial>,
    executor: Arc<dyn ScriptExecutor>,
}

impl fmt::Debug for DecryptingLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptingLoader")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl DecryptingLoader {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        keys: Arc<KeyMaterial>,
        executor: Arc<dyn ScriptExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            digest: None,
            keys,
            executor,
        }
    }

    /// Require the plaintext to hash to `digest`
    pub fn with_digest(mut self, digest: Option<String>) -> Self {
        self.digest = digest;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decrypt and validate the module source without executing it
    pub fn source(&self) -> LoaderResult<Zeroizing<String>> {
        let plaintext = load(&self.name, &self.path, &self.keys)?;

        if let Some(expected) = &self.digest {
            if plaintext_digest(&plaintext) != *expected {
                return Err(LoaderError::integrity(&self.name, "plaintext digest mismatch"));
            }
        }

        let text = std::str::from_utf8(&plaintext)
            .map_err(|e| LoaderError::integrity(&self.name, format!("source is not UTF-8: {}", e)))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}

impl Loader for DecryptingLoader {
    fn exec_module(&self, module: &mut Module, imports: &ImportSystem) -> LoaderResult<()> {
        tracing::debug!("Decrypting {} from {}", self.name, self.path.display());
        let source = self.source()?;
        self.executor.execute(module, &source, imports)
    }
}

/// Loader for plain, unencrypted module sources
pub struct SourceLoader {
    path: PathBuf,
    executor: Arc<dyn ScriptExecutor>,
}

impl SourceLoader {
    pub fn new(path: impl Into<PathBuf>, executor: Arc<dyn ScriptExecutor>) -> Self {
        Self {
            path: path.into(),
            executor,
        }
    }
}

impl Loader for SourceLoader {
    fn exec_module(&self, module: &mut Module, imports: &ImportSystem) -> LoaderResult<()> {
        let source = fs::read_to_string(&self.path)?;
        self.executor.execute(module, &source, imports)
    }
}
