//! Import context and package entry point
//!
//! An [`ImportContext`] bundles everything a sealed package needs at import
//! time: key material, registry and script executor. It is built once, before
//! any encrypted import, and shared read-only afterwards.

use crate::config::LoaderConfig;
use crate::crypto::KeyMaterial;
use crate::executor::{RhaiExecutor, ScriptExecutor};
use crate::finder::EncryptedModuleFinder;
use crate::import::ImportSystem;
use crate::registry::ModuleRegistry;
use crate::LoaderResult;
use std::fmt;
use std::sync::Arc;

/// Process-wide configuration for decrypting imports
pub struct ImportContext {
    keys: Arc<KeyMaterial>,
    registry: Arc<ModuleRegistry>,
    executor: Arc<dyn ScriptExecutor>,
}

impl fmt::Debug for ImportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportContext")
            .field("keys", &self.keys)
            .field("modules", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ImportContext {
    pub fn new(keys: KeyMaterial, registry: ModuleRegistry) -> Self {
        Self {
            keys: Arc::new(keys),
            registry: Arc::new(registry),
            executor: Arc::new(RhaiExecutor::new()),
        }
    }

    /// Startup path: read key/IV from the environment
    ///
    /// Fails with a configuration error when either variable is missing or
    /// malformed; no finder can be installed without a context.
    pub fn from_env(config: &LoaderConfig, registry: ModuleRegistry) -> LoaderResult<Self> {
        let keys = KeyMaterial::from_env(config)?;
        Ok(Self::new(keys, registry))
    }

    /// Replace the script executor
    pub fn with_executor(mut self, executor: Arc<dyn ScriptExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn keys(&self) -> Arc<KeyMaterial> {
        self.keys.clone()
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn executor(&self) -> Arc<dyn ScriptExecutor> {
        self.executor.clone()
    }
}

/// Put an encrypted-module finder at the front of `system`'s finder chain
///
/// Registered names then shadow any same-named plain module.
pub fn install(system: &ImportSystem, context: ImportContext) -> Arc<ImportContext> {
    if let Err(e) = context.registry().verify() {
        tracing::warn!("Sealed package is incomplete: {}", e);
    }
    tracing::info!(
        "Installing encrypted module finder ({} modules)",
        context.registry().len()
    );

    let context = Arc::new(context);
    system.insert_finder(0, Arc::new(EncryptedModuleFinder::new(context.clone())));
    context
}
