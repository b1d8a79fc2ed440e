//! Pluggable functional units ("modules") and their lifecycle.
//!
//! A module is an optional, independently versioned unit such as a history archive or
//! an alarm journal. It implements [`Module`] and, when it needs them, the
//! [`SchemaOwner`] and [`SettingsProvider`] facets. The host:
//!
//! 1. discovers candidates through the [`ModuleCatalog`](catalog::ModuleCatalog) and the
//!    plugin directory ([`loader`]),
//! 2. registers them with the [`ModuleManager`](manager::ModuleManager),
//! 3. initializes each one (provisioning its tables through
//!    [`SchemaProvisioner`](schema::SchemaProvisioner)),
//! 4. starts the enabled ones in priority order.
//!
//! # Lifecycle
//!
//! ```text
//! Unregistered ──> Registered ──> Initialized ──> Started ⇄ Disabled
//!                                  (any) ──> Error
//! ```
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use daq_host::modules::{Module, ModuleContext, ModuleInfo};
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! struct Heartbeat {
//!     info: ModuleInfo,
//!     running: AtomicBool,
//! }
//!
//! #[async_trait]
//! impl Module for Heartbeat {
//!     fn info(&self) -> &ModuleInfo {
//!         &self.info
//!     }
//!
//!     async fn start(&self) -> anyhow::Result<()> {
//!         self.running.store(true, Ordering::SeqCst);
//!         Ok(())
//!     }
//!
//!     async fn stop(&self) -> anyhow::Result<()> {
//!         self.running.store(false, Ordering::SeqCst);
//!         Ok(())
//!     }
//! }
//!
//! let module = Heartbeat {
//!     info: ModuleInfo::new("heartbeat", "Heartbeat").with_version("0.1.0"),
//!     running: AtomicBool::new(false),
//! };
//! assert_eq!(module.info().id, "heartbeat");
//! ```

pub mod builtin;
pub mod catalog;
pub mod db;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod schema;
pub mod state;

pub use catalog::{ModuleCatalog, ModuleFactory, ModuleOrigin};
pub use db::{ConnectionParams, Database, DatabaseConnector, DatabaseError, SqliteConnector};
pub use loader::{ModuleDescriptor, ModuleLoader};
pub use manager::{BatchReport, ModuleManager, ModuleStatus};
pub use registry::{ModuleDatabaseSettings, ModuleRegistry, ModuleRegistryEntry};
pub use schema::{SchemaProvisioner, TableDef};
pub use state::{ModuleState, ModuleStatusChanged};

use crate::config::{ConfigDocument, ConfigStore};
use crate::error::HostResult;
use anyhow::Result;
use async_trait::async_trait;
use registry::MigrationSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Identity metadata of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Unique id, also used for table prefixes and the settings document name
    pub id: String,
    /// Display name
    pub name: String,
    /// Short description
    pub description: String,
    /// Semantic version
    pub version: String,
    /// Icon reference for the UI
    pub icon: Option<String>,
    /// Ordering weight within the same priority (lower first)
    pub sort_order: i32,
    /// Enabled when first added to the registry
    pub enabled_by_default: bool,
}

impl ModuleInfo {
    /// Metadata with empty description, version `0.1.0`, sort order 0, enabled by default.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: "0.1.0".to_string(),
            icon: None,
            sort_order: 0,
            enabled_by_default: true,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the icon reference.
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Sets the sort weight.
    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Newly discovered instances start disabled.
    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }
}

/// What a module gets to see during initialization.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// Module id
    pub module_id: String,
    /// Shared configuration store
    pub store: ConfigStore,
    /// The module's registry entry (parameters, dependencies, database settings)
    pub entry: ModuleRegistryEntry,
    /// Absolute path of the module's settings document
    pub settings_path: PathBuf,
}

impl ModuleContext {
    /// A registry parameter.
    pub fn parameter(&self, key: &str) -> Option<&serde_json::Value> {
        self.entry.parameters.get(key)
    }

    /// Loads the module's settings document as `T`.
    pub fn load_settings<T: ConfigDocument>(&self) -> HostResult<Option<T>> {
        self.store.load(&self.settings_path, true)
    }
}

/// Lifecycle surface every module implements. All hooks default to no-ops.
#[async_trait]
pub trait Module: Send + Sync {
    /// Identity metadata.
    fn info(&self) -> &ModuleInfo;

    /// Runs once after registration. A failure puts the module in the Error state.
    async fn initialize(&self, _ctx: &ModuleContext) -> Result<()> {
        Ok(())
    }

    /// Starts the module's work.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Stops the module's work.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Called when the user enables the module.
    async fn on_enable(&self) -> Result<()> {
        Ok(())
    }

    /// Called when the user disables the module.
    async fn on_disable(&self) -> Result<()> {
        Ok(())
    }

    /// Schema facet, for modules that store data.
    fn schema(&self) -> Option<&dyn SchemaOwner> {
        None
    }

    /// Settings facet, for modules with a settings page.
    fn settings(&self) -> Option<&dyn SettingsProvider> {
        None
    }
}

/// Modules owning database tables.
#[async_trait]
pub trait SchemaOwner: Send + Sync {
    /// Record types stored by the module.
    fn tables(&self) -> Vec<TableDef>;

    /// Called after the tables were provisioned, with the module's own connection.
    async fn initialize_database(&self, _db: Arc<dyn Database>) -> Result<()> {
        Ok(())
    }

    /// Migration hook, only called when the registry enables automatic migration.
    async fn migrate(&self, _db: Arc<dyn Database>, _settings: &MigrationSettings) -> Result<()> {
        Ok(())
    }
}

/// Modules with a settings page.
pub trait SettingsProvider: Send + Sync {
    /// Identifier of the page the UI should open.
    fn settings_page_id(&self) -> String;

    /// Content written to the module's settings document when it does not exist yet.
    fn default_settings(&self) -> serde_json::Value;
}
