//! Module objects produced by imports

use rhai::{Dynamic, AST};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// An initialized module: its attributes plus any script functions it defines
#[derive(Debug, Clone)]
pub struct Module {
    name: String,
    origin: Option<PathBuf>,
    attributes: BTreeMap<String, Dynamic>,
    functions: Option<AST>,
}

impl Module {
    pub fn new(name: impl Into<String>, origin: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            origin,
            attributes: BTreeMap::new(),
            functions: None,
        }
    }

    /// Fully-qualified module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File the module was loaded from, if any
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    pub fn get(&self, attr: &str) -> Option<&Dynamic> {
        self.attributes.get(attr)
    }

    /// Attribute value cast to `T`; `None` when absent or of another type
    pub fn get_as<T: Clone + Send + Sync + 'static>(&self, attr: &str) -> Option<T> {
        self.attributes.get(attr).and_then(|v| v.clone().try_cast::<T>())
    }

    pub fn set_attr(&mut self, attr: impl Into<String>, value: Dynamic) {
        self.attributes.insert(attr.into(), value);
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Dynamic)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions
            .as_ref()
            .is_some_and(|ast| ast.iter_functions().any(|f| f.name == name))
    }

    pub(crate) fn functions(&self) -> Option<&AST> {
        self.functions.as_ref()
    }

    pub(crate) fn set_functions(&mut self, ast: AST) {
        self.functions = Some(ast);
    }
}
