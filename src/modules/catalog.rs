//! Explicit registry of module types the host can instantiate.
//!
//! Module types are registered under a type name together with a factory. Built-in
//! types are always discovery candidates. Plugin types only become candidates when a
//! manifest in the plugin directory names them, which lets a deployment opt into
//! optional units by dropping a `*.module.json` file next to the host.

use super::Module;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Produces a fresh module instance.
pub type ModuleFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Module>> + Send + Sync>;

/// How a type becomes a discovery candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleOrigin {
    /// Always offered
    BuiltIn,
    /// Offered when a plugin manifest references it
    Plugin,
}

/// One registered module type.
#[derive(Clone)]
pub struct CatalogEntry {
    /// Type name referenced by manifests and the registry
    pub type_name: String,
    /// Built-in or plugin
    pub origin: ModuleOrigin,
    factory: ModuleFactory,
}

impl CatalogEntry {
    /// Runs the factory. A panicking factory is reported as an error.
    pub fn instantiate(&self) -> anyhow::Result<Arc<dyn Module>> {
        match catch_unwind(AssertUnwindSafe(|| (self.factory)())) {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "factory for module type '{}' panicked",
                self.type_name
            )),
        }
    }

    pub(crate) fn factory(&self) -> ModuleFactory {
        Arc::clone(&self.factory)
    }
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("type_name", &self.type_name)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Type name to factory registry.
#[derive(Debug, Default, Clone)]
pub struct ModuleCatalog {
    entries: Vec<CatalogEntry>,
}

impl ModuleCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type that is always discovered.
    pub fn register_builtin<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn() -> anyhow::Result<Arc<dyn Module>> + Send + Sync + 'static,
    {
        self.insert(type_name, ModuleOrigin::BuiltIn, Arc::new(factory));
    }

    /// Registers a type that is discovered only through a plugin manifest.
    pub fn register_plugin<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn() -> anyhow::Result<Arc<dyn Module>> + Send + Sync + 'static,
    {
        self.insert(type_name, ModuleOrigin::Plugin, Arc::new(factory));
    }

    fn insert(&mut self, type_name: &str, origin: ModuleOrigin, factory: ModuleFactory) {
        let entry = CatalogEntry {
            type_name: type_name.to_string(),
            origin,
            factory,
        };
        if let Some(existing) = self.entries.iter_mut().find(|e| e.type_name == type_name) {
            tracing::warn!(type_name, "Module type registered twice, replacing factory");
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Entry for `type_name`.
    pub fn get(&self, type_name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.type_name == type_name)
    }

    /// Creates an instance of `type_name`; `None` if the type is unknown.
    pub fn create(&self, type_name: &str) -> Option<anyhow::Result<Arc<dyn Module>>> {
        self.get(type_name).map(CatalogEntry::instantiate)
    }

    /// Built-in entries in registration order.
    pub fn builtins(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries
            .iter()
            .filter(|e| e.origin == ModuleOrigin::BuiltIn)
    }

    /// All registered type names in registration order.
    pub fn type_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.type_name.clone()).collect()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
