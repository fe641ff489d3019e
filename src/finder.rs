//! Finders: decide which loader, if any, handles a module name

use crate::context::ImportContext;
use crate::executor::ScriptExecutor;
use crate::loader::{DecryptingLoader, Loader, SourceLoader};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Loadable-module descriptor returned by a finder
#[derive(Clone)]
pub struct ModuleSpec {
    pub name: String,
    pub origin: Option<PathBuf>,
    pub loader: Arc<dyn Loader>,
}

impl fmt::Debug for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSpec")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// One link in the import system's finder chain
///
/// Returning `None` means "no opinion": the next finder is consulted.
pub trait Finder: Send + Sync {
    fn find_spec(&self, name: &str) -> Option<ModuleSpec>;
}

/// Resolves names registered in the module registry to decrypting loaders
#[derive(Clone)]
pub struct EncryptedModuleFinder {
    context: Arc<ImportContext>,
}

impl EncryptedModuleFinder {
    pub fn new(context: Arc<ImportContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ImportContext {
        &self.context
    }
}

impl Finder for EncryptedModuleFinder {
    fn find_spec(&self, name: &str) -> Option<ModuleSpec> {
        let registry = self.context.registry();
        let entry = registry.entry(name)?;
        let path = registry.root().join(&entry.path);
        tracing::debug!("Encrypted module {} -> {}", name, path.display());

        let loader = DecryptingLoader::new(
            name,
            path.clone(),
            self.context.keys(),
            self.context.executor(),
        )
        .with_digest(entry.digest.clone());

        Some(ModuleSpec {
            name: name.to_string(),
            origin: Some(path),
            loader: Arc::new(loader),
        })
    }
}

/// Resolves `a.b.c` to `<root>/a/b/c.<extension>` for plain sources
pub struct SourceFileFinder {
    root: PathBuf,
    extension: String,
    executor: Arc<dyn ScriptExecutor>,
}

impl SourceFileFinder {
    pub fn new(
        root: impl Into<PathBuf>,
        extension: impl Into<String>,
        executor: Arc<dyn ScriptExecutor>,
    ) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            executor,
        }
    }
}

impl Finder for SourceFileFinder {
    fn find_spec(&self, name: &str) -> Option<ModuleSpec> {
        if !name.split('.').all(is_plain_segment) {
            return None;
        }

        let mut path = self.root.clone();
        path.extend(name.split('.'));
        path.set_extension(&self.extension);
        if !path.is_file() {
            return None;
        }

        Some(ModuleSpec {
            name: name.to_string(),
            origin: Some(path.clone()),
            loader: Arc::new(SourceLoader::new(path, self.executor.clone())),
        })
    }
}

/// A name segment must map to exactly one directory entry under the root
fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.contains(['/', '\\', ':'])
        && matches!(
            Path::new(segment).components().collect::<Vec<_>>()[..],
            [Component::Normal(_)]
        )
}
