//! Module discovery and loading.
//!
//! Discovery turns catalog entries into [`ModuleDescriptor`]s:
//!
//! - every built-in type is a candidate,
//! - the plugin directory is walked recursively for `*.module.json` manifests, and each
//!   manifest naming a registered type makes that type a candidate.
//!
//! For each candidate a transient instance is created only to read its
//! [`ModuleInfo`]; the instance is dropped right away. Broken manifests, unknown type
//! names and failing factories are logged and skipped, never aborting the scan.
//!
//! [`ModuleLoader::load_enabled_modules`] then cross-references the module registry
//! document, adding entries for newly seen modules, and instantiates the enabled ones
//! ordered by (registry priority, sort order).

use super::catalog::{CatalogEntry, ModuleCatalog, ModuleFactory, ModuleOrigin};
use super::registry::{ModuleRegistry, ModuleRegistryEntry};
use super::{Module, ModuleInfo};
use crate::config::ConfigStore;
use crate::error::HostResult;
use crate::settings::HostSettings;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// File name suffix of plugin manifests.
pub const MANIFEST_SUFFIX: &str = ".module.json";

/// Content of a `*.module.json` manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    /// Catalog type name to instantiate
    pub module_type_name: String,
    /// Overrides the module's own description
    #[serde(default)]
    pub description: Option<String>,
    /// Default registry parameters for the module
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Discovery-time metadata about a module.
#[derive(Clone)]
pub struct ModuleDescriptor {
    /// Identity harvested from a transient instance
    pub info: ModuleInfo,
    /// Catalog type name
    pub type_name: String,
    /// Built-in or plugin
    pub origin: ModuleOrigin,
    /// Manifest the module was found through
    pub source: Option<PathBuf>,
    /// Parameters declared by the manifest
    pub parameters: Map<String, Value>,
    factory: ModuleFactory,
}

impl ModuleDescriptor {
    /// Module id.
    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// Creates a live instance.
    pub fn instantiate(&self) -> anyhow::Result<Arc<dyn Module>> {
        let module = (self.factory)()?;
        if module.info().id != self.info.id {
            anyhow::bail!(
                "factory for '{}' produced module '{}'",
                self.info.id,
                module.info().id
            );
        }
        Ok(module)
    }

    /// Registry entry for a module seen for the first time.
    pub fn registry_entry(&self) -> ModuleRegistryEntry {
        let mut entry = ModuleRegistryEntry::new(self.info.id.clone());
        entry.is_enabled = self.info.enabled_by_default;
        entry.is_built_in = self.origin == ModuleOrigin::BuiltIn;
        entry.module_type_name = Some(self.type_name.clone());
        entry.assembly_path = self
            .source
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        entry.description = Some(self.info.description.clone()).filter(|d| !d.is_empty());
        entry.version = Some(self.info.version.clone());
        entry.parameters = self.parameters.clone();
        entry
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("info", &self.info)
            .field("type_name", &self.type_name)
            .field("origin", &self.origin)
            .field("source", &self.source)
            .finish()
    }
}

/// Discovers modules and instantiates the enabled ones.
#[derive(Clone)]
pub struct ModuleLoader {
    catalog: Arc<ModuleCatalog>,
    store: ConfigStore,
    registry_path: PathBuf,
    plugin_dir: PathBuf,
}

impl ModuleLoader {
    /// Loader over `catalog`, reading the registry at `registry_path` and scanning
    /// `plugin_dir`.
    pub fn new(
        catalog: Arc<ModuleCatalog>,
        store: ConfigStore,
        registry_path: impl Into<PathBuf>,
        plugin_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            store,
            registry_path: registry_path.into(),
            plugin_dir: plugin_dir.into(),
        }
    }

    /// Loader configured from host settings.
    pub fn from_settings(catalog: Arc<ModuleCatalog>, store: ConfigStore, settings: &HostSettings) -> Self {
        Self::new(
            catalog,
            store,
            settings.modules.registry_path.clone(),
            settings.plugin_dir(),
        )
    }

    /// Directory scanned by [`load_enabled_modules`](Self::load_enabled_modules).
    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Loads the registry, creating an empty one (dynamic loading on) on first run.
    pub fn registry(&self) -> HostResult<ModuleRegistry> {
        self.store
            .get_or_create(&self.registry_path, ModuleRegistry::default, true)
    }

    /// Discovers every candidate module.
    ///
    /// Built-ins come first, then plugins in manifest path order. When two candidates
    /// share an id the first one wins. The plugin scan runs on the blocking pool and is
    /// bounded by the registry's `loadTimeoutSeconds`; on timeout only built-ins are
    /// returned.
    pub async fn discover(&self, plugin_dir: &Path) -> Vec<ModuleDescriptor> {
        let registry = match self.registry() {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!(error = %e, "Module registry unreadable, using defaults for discovery");
                ModuleRegistry::default()
            }
        };

        let mut candidates = self.discover_builtins();

        if registry.enable_dynamic_loading {
            let catalog = Arc::clone(&self.catalog);
            let dir = plugin_dir.to_path_buf();
            let scan = tokio::task::spawn_blocking(move || scan_plugin_dir(&catalog, &dir));
            match tokio::time::timeout(registry.load_timeout(), scan).await {
                Ok(Ok(plugins)) => candidates.extend(plugins),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Plugin scan task failed");
                }
                Err(_) => {
                    tracing::warn!(
                        dir = %plugin_dir.display(),
                        timeout_secs = registry.load_timeout_seconds,
                        "Plugin scan timed out, continuing with built-in modules"
                    );
                }
            }
        } else {
            tracing::info!("Dynamic module loading disabled, using built-in modules only");
        }

        let descriptors = dedupe(candidates);
        tracing::info!(count = descriptors.len(), "Module discovery finished");
        descriptors
    }

    /// Descriptors of every built-in type.
    pub fn discover_builtins(&self) -> Vec<ModuleDescriptor> {
        self.catalog
            .builtins()
            .filter_map(|entry| describe(entry, None, None, Map::new()))
            .collect()
    }

    /// Discovers modules, syncs the registry and instantiates the enabled ones in
    /// (priority, sort order) order.
    ///
    /// # Errors
    ///
    /// Only when the registry document cannot be read or created. Individual modules
    /// that fail to instantiate are logged and left out.
    pub async fn load_enabled_modules(&self) -> HostResult<Vec<Arc<dyn Module>>> {
        let descriptors = self.discover(&self.plugin_dir).await;
        let mut registry = self.registry()?;

        let mut added = 0;
        for descriptor in &descriptors {
            if registry.find(descriptor.id()).is_none() {
                registry.modules.push(descriptor.registry_entry());
                tracing::info!(module_id = %descriptor.id(), "Added module to registry");
                added += 1;
            }
        }
        if added > 0 {
            if let Err(e) = self.store.save(&self.registry_path, &registry, true) {
                tracing::warn!(error = %e, "Failed to persist module registry");
            }
        }

        let mut enabled: Vec<(&ModuleDescriptor, i32)> = descriptors
            .iter()
            .filter_map(|d| {
                let entry = registry.find(d.id())?;
                if entry.is_enabled {
                    Some((d, entry.priority))
                } else {
                    tracing::debug!(module_id = %d.id(), "Module disabled in registry");
                    None
                }
            })
            .collect();
        enabled.sort_by_key(|(d, priority)| (*priority, d.info.sort_order));

        let mut modules = Vec::with_capacity(enabled.len());
        for (descriptor, priority) in enabled {
            match descriptor.instantiate() {
                Ok(module) => {
                    tracing::debug!(module_id = %descriptor.id(), priority, "Module instantiated");
                    modules.push(module);
                }
                Err(e) => {
                    tracing::error!(module_id = %descriptor.id(), error = %format!("{e:#}"), "Failed to instantiate module");
                }
            }
        }
        tracing::info!(count = modules.len(), "Enabled modules loaded");
        Ok(modules)
    }
}

/// Walks `dir` recursively for manifests and describes every referenced type.
pub fn scan_plugin_dir(catalog: &ModuleCatalog, dir: &Path) -> Vec<ModuleDescriptor> {
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "Plugin directory does not exist");
        return Vec::new();
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable plugin directory entry");
                continue;
            }
        };
        let is_manifest = entry.file_type().is_file()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(MANIFEST_SUFFIX));
        if !is_manifest {
            continue;
        }

        let path = entry.path();
        let manifest = match read_manifest(path) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(manifest = %path.display(), error = %e, "Skipping invalid module manifest");
                continue;
            }
        };
        let Some(catalog_entry) = catalog.get(&manifest.module_type_name) else {
            tracing::warn!(
                manifest = %path.display(),
                type_name = %manifest.module_type_name,
                "Manifest references an unknown module type"
            );
            continue;
        };
        if let Some(descriptor) = describe(
            catalog_entry,
            Some(path.to_path_buf()),
            manifest.description,
            manifest.parameters,
        ) {
            found.push(descriptor);
        }
    }
    found
}

fn read_manifest(path: &Path) -> anyhow::Result<ModuleManifest> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn describe(
    entry: &CatalogEntry,
    source: Option<PathBuf>,
    description: Option<String>,
    parameters: Map<String, Value>,
) -> Option<ModuleDescriptor> {
    let module = match entry.instantiate() {
        Ok(module) => module,
        Err(e) => {
            tracing::warn!(type_name = %entry.type_name, error = %format!("{e:#}"), "Skipping module that failed to instantiate");
            return None;
        }
    };
    let mut info = module.info().clone();
    drop(module);
    if let Some(description) = description {
        info.description = description;
    }
    Some(ModuleDescriptor {
        info,
        type_name: entry.type_name.clone(),
        origin: entry.origin,
        source,
        parameters,
        factory: entry.factory(),
    })
}

fn dedupe(candidates: Vec<ModuleDescriptor>) -> Vec<ModuleDescriptor> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|d| {
            let first = seen.insert(d.info.id.clone());
            if !first {
                tracing::warn!(module_id = %d.info.id, type_name = %d.type_name, "Duplicate module id, keeping the first");
            }
            first
        })
        .collect()
}
