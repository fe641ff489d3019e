//! Host import machinery: finder chain plus module cache
//!
//! A module is initialized at most once per [`ImportSystem`]. Concurrent first
//! imports of the same name wait for the thread doing the work; an import
//! that would wait on itself (directly or through other threads) fails with
//! [`LoaderError::ImportCycle`]. Failed imports leave nothing in the cache.

use crate::finder::{Finder, ModuleSpec};
use crate::module::Module;
use crate::{LoaderError, LoaderResult};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};

/// Imports currently being initialized
#[derive(Default)]
struct Pending {
    /// module name → thread initializing it
    owners: HashMap<String, ThreadId>,
    /// thread → module name it is waiting for
    waiting: HashMap<ThreadId, String>,
}

impl Pending {
    /// Would `me` waiting on `name` close a wait-for cycle?
    fn would_deadlock(&self, me: ThreadId, name: &str) -> bool {
        let mut current = name;
        for _ in 0..=self.owners.len() {
            match self.owners.get(current) {
                Some(owner) if *owner == me => return true,
                Some(owner) => match self.waiting.get(owner) {
                    Some(next) => current = next.as_str(),
                    None => return false,
                },
                None => return false,
            }
        }
        false
    }
}

/// Ownership of an in-flight import; released on drop, unwinding included
struct Claim<'a> {
    system: &'a ImportSystem,
    name: &'a str,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.system.pending().owners.remove(self.name);
        self.system.inner.ready.notify_all();
    }
}

#[derive(Default)]
struct Inner {
    finders: RwLock<Vec<Arc<dyn Finder>>>,
    modules: RwLock<HashMap<String, Arc<Module>>>,
    pending: Mutex<Pending>,
    ready: Condvar,
}

/// Finder chain and module cache; cheap to clone, clones share state
#[derive(Clone, Default)]
pub struct ImportSystem {
    inner: Arc<Inner>,
}

impl ImportSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a finder at `index`; `0` gives it the highest priority
    pub fn insert_finder(&self, index: usize, finder: Arc<dyn Finder>) {
        let mut finders = self
            .inner
            .finders
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let index = index.min(finders.len());
        finders.insert(index, finder);
    }

    /// Append a finder with the lowest priority
    pub fn push_finder(&self, finder: Arc<dyn Finder>) {
        self.inner
            .finders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(finder);
    }

    pub fn finder_count(&self) -> usize {
        self.inner
            .finders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// First spec offered by the finder chain, in priority order
    pub fn find_spec(&self, name: &str) -> Option<ModuleSpec> {
        let finders = self
            .inner
            .finders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        finders.iter().find_map(|f| f.find_spec(name))
    }

    /// Cached module, if already imported
    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        self.inner
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Drop a module from the cache so the next import re-runs it
    pub fn invalidate(&self, name: &str) -> Option<Arc<Module>> {
        self.inner
            .modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn loaded_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Import `name`, initializing it on first use
    pub fn import(&self, name: &str) -> LoaderResult<Arc<Module>> {
        if let Some(module) = self.get(name) {
            return Ok(module);
        }

        if let Some(module) = self.claim(name)? {
            return Ok(module);
        }

        let claim = Claim { system: self, name };
        let result = self.initialize(name);
        if let Ok(module) = &result {
            self.inner
                .modules
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.to_string(), module.clone());
        }
        drop(claim);

        result
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Become the initializer for `name`, or wait for whoever is
    ///
    /// Returns the module when another thread finished it meanwhile.
    fn claim(&self, name: &str) -> LoaderResult<Option<Arc<Module>>> {
        let me = thread::current().id();
        let mut pending = self.pending();

        loop {
            if let Some(module) = self.get(name) {
                return Ok(Some(module));
            }
            if !pending.owners.contains_key(name) {
                pending.owners.insert(name.to_string(), me);
                return Ok(None);
            }
            if pending.would_deadlock(me, name) {
                return Err(LoaderError::ImportCycle(name.to_string()));
            }

            pending.waiting.insert(me, name.to_string());
            pending = self
                .inner
                .ready
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
            pending.waiting.remove(&me);
        }
    }

    fn initialize(&self, name: &str) -> LoaderResult<Arc<Module>> {
        let spec = self
            .find_spec(name)
            .ok_or_else(|| LoaderError::ModuleNotFound(name.to_string()))?;

        let mut module = Module::new(spec.name.clone(), spec.origin.clone());
        match spec.loader.exec_module(&mut module, self) {
            Ok(()) => {
                tracing::info!("Imported {}", name);
                Ok(Arc::new(module))
            }
            Err(e) => {
                tracing::warn!("Import of {} failed: {}", name, e);
                Err(e)
            }
        }
    }
}
