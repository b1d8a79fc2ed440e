//! The module registry document (`modules/registry.json`).
//!
//! The registry records, per module, whether it is enabled, its load priority and its
//! database settings. Entries are created lazily the first time a module is discovered.
//! Field names are camelCase on disk:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "enableDynamicLoading": true,
//!   "loadTimeoutSeconds": 30,
//!   "modules": [
//!     {
//!       "moduleId": "history_archive",
//!       "isEnabled": true,
//!       "priority": 100,
//!       "isBuiltIn": true,
//!       "dependencies": [],
//!       "parameters": {},
//!       "database": { "moduleId": "history_archive", "enableDatabase": true, "tablePrefix": "" }
//!     }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Priority given to newly seen modules.
pub const DEFAULT_PRIORITY: i32 = 100;

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_load_timeout() -> u64 {
    30
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_migration_path() -> String {
    "migrations".to_string()
}

/// Root of the registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRegistry {
    /// Document version
    #[serde(default = "default_version")]
    pub version: String,
    /// Discover plugin modules in addition to built-ins
    #[serde(default = "default_true")]
    pub enable_dynamic_loading: bool,
    /// Upper bound for a plugin directory scan
    #[serde(default = "default_load_timeout")]
    pub load_timeout_seconds: u64,
    /// Known modules
    #[serde(default)]
    pub modules: Vec<ModuleRegistryEntry>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self {
            version: default_version(),
            enable_dynamic_loading: true,
            load_timeout_seconds: default_load_timeout(),
            modules: Vec::new(),
        }
    }
}

impl ModuleRegistry {
    /// Entry for `module_id`.
    pub fn find(&self, module_id: &str) -> Option<&ModuleRegistryEntry> {
        self.modules.iter().find(|m| m.module_id == module_id)
    }

    /// Mutable entry for `module_id`.
    pub fn find_mut(&mut self, module_id: &str) -> Option<&mut ModuleRegistryEntry> {
        self.modules.iter_mut().find(|m| m.module_id == module_id)
    }

    /// Scan timeout.
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_seconds.max(1))
    }

    /// Sets `isEnabled` for `module_id`. Returns false when the module has no entry.
    pub fn set_enabled(&mut self, module_id: &str, enabled: bool) -> bool {
        match self.find_mut(module_id) {
            Some(entry) => {
                entry.is_enabled = enabled;
                true
            }
            None => false,
        }
    }
}

/// Registry record of one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRegistryEntry {
    /// Module id
    pub module_id: String,
    /// Loaded and started at startup
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    /// Lower loads first
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Manifest or binary the module came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly_path: Option<String>,
    /// Catalog type name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_type_name: Option<String>,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Version last seen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Shipped with the host
    #[serde(default)]
    pub is_built_in: bool,
    /// Ids of modules this one depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Free-form parameters handed to the module
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Database settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<ModuleDatabaseSettings>,
}

impl ModuleRegistryEntry {
    /// Fresh entry with defaults.
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            is_enabled: true,
            priority: DEFAULT_PRIORITY,
            assembly_path: None,
            module_type_name: None,
            description: None,
            version: None,
            is_built_in: false,
            dependencies: Vec::new(),
            parameters: Map::new(),
            database: None,
        }
    }
}

/// Per-module database settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDatabaseSettings {
    /// Module id
    pub module_id: String,
    /// Module uses a database at all
    #[serde(default = "default_true")]
    pub enable_database: bool,
    /// Custom connection string (falls back to `database.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
    /// Custom backend type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_type: Option<String>,
    /// Table name prefix (empty = `<moduleId>_`)
    #[serde(default)]
    pub table_prefix: String,
    /// Create missing tables during initialization
    #[serde(default = "default_true")]
    pub auto_create_tables: bool,
    /// Drop tables when the module is unregistered
    #[serde(default)]
    pub drop_tables_on_unload: bool,
    /// Migration hook settings
    #[serde(default)]
    pub migration_settings: MigrationSettings,
}

impl ModuleDatabaseSettings {
    /// Defaults for `module_id`.
    pub fn for_module(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            enable_database: true,
            connection_string: None,
            database_type: None,
            table_prefix: String::new(),
            auto_create_tables: true,
            drop_tables_on_unload: false,
            migration_settings: MigrationSettings::default(),
        }
    }
}

/// Settings for the module migration hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSettings {
    /// Invoke the module's migration hook after table creation
    #[serde(default)]
    pub enable_auto_migration: bool,
    /// Where migration scripts live
    #[serde(default = "default_migration_path")]
    pub migration_scripts_path: String,
    /// Back up the database before migrating
    #[serde(default = "default_true")]
    pub backup_before_migration: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            enable_auto_migration: false,
            migration_scripts_path: default_migration_path(),
            backup_before_migration: true,
        }
    }
}
