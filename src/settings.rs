//! Host settings using Figment
//!
//! This module provides strongly-typed settings for the host process itself (where the
//! configuration root lives, how long to debounce file events, how many modules to
//! initialize in parallel, ...). Settings are loaded from:
//! 1. `config/host.toml` (base settings)
//! 2. Environment variables (prefixed with `DAQ_HOST_`, nested keys split on `__`)
//!
//! These are *not* the configuration documents managed by the
//! [`ConfigStore`](crate::config::ConfigStore); they only tell the host how to build it.
//!
//! # Example
//! ```no_run
//! use daq_host::settings::HostSettings;
//!
//! let settings = HostSettings::load()?;
//! println!("Configuration root: {}", settings.store.root_dir.display());
//! # Ok::<(), daq_host::HostError>(())
//! ```

use crate::error::{HostError, HostResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level host settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSettings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Configuration store settings
    #[serde(default)]
    pub store: StoreSettings,
    /// Module host settings
    #[serde(default)]
    pub modules: ModuleHostSettings,
}

/// Application-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Configuration store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Directory relative document paths are resolved against
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// Maximum age of a cache entry in seconds (unset = no expiration)
    #[serde(default)]
    pub cache_expiration_secs: Option<u64>,
    /// Backups kept per document
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    /// Snapshot the previous file before every save
    #[serde(default = "default_true")]
    pub backup_on_save: bool,
    /// Quiet period before a burst of file events is processed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Name of the backup directory below the root
    #[serde(default = "default_backup_dir_name")]
    pub backup_dir_name: String,
}

/// Module host settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleHostSettings {
    /// Directory scanned for module manifests (relative to the store root when relative)
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: PathBuf,
    /// Module registry document, relative to the store root
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
    /// Per-module initialization timeout in seconds
    #[serde(default = "default_init_timeout")]
    pub init_timeout_secs: u64,
    /// Modules initialized concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

// Default value functions
fn default_app_name() -> String {
    "DAQ Host".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_root_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("daq-host"))
        .unwrap_or_else(|| PathBuf::from("config"))
}

fn default_max_backups() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_backup_dir_name() -> String {
    ".backups".to_string()
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("modules/registry.json")
}

fn default_init_timeout() -> u64 {
    30
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            cache_expiration_secs: None,
            max_backups: default_max_backups(),
            backup_on_save: true,
            debounce_ms: default_debounce_ms(),
            backup_dir_name: default_backup_dir_name(),
        }
    }
}

impl Default for ModuleHostSettings {
    fn default() -> Self {
        Self {
            plugin_dir: default_plugin_dir(),
            registry_path: default_registry_path(),
            init_timeout_secs: default_init_timeout(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl StoreSettings {
    /// Settings rooted at `root_dir`, everything else default.
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Default::default()
        }
    }

    /// Cache expiration window, if configured.
    pub fn cache_expiration(&self) -> Option<Duration> {
        self.cache_expiration_secs.map(Duration::from_secs)
    }

    /// Debounce window for file change events.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl ModuleHostSettings {
    /// Per-module initialization timeout.
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
}

impl HostSettings {
    /// Load settings from `config/host.toml` and environment variables
    ///
    /// Environment variables can override settings with prefix `DAQ_HOST_`
    /// Example: `DAQ_HOST_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> HostResult<Self> {
        Self::load_from("config/host.toml")
    }

    /// Load settings from a specific file path
    ///
    /// A missing file is not an error: defaults (plus environment overrides) apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> HostResult<Self> {
        let settings: HostSettings = Figment::from(Serialized::defaults(HostSettings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQ_HOST_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Plugin directory resolved against the store root.
    pub fn plugin_dir(&self) -> PathBuf {
        if self.modules.plugin_dir.is_absolute() {
            self.modules.plugin_dir.clone()
        } else {
            self.store.root_dir.join(&self.modules.plugin_dir)
        }
    }

    /// Validate settings after loading
    pub fn validate(&self) -> HostResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(HostError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(HostError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.store.max_backups == 0 {
            return Err(HostError::Configuration(
                "store.max_backups must be at least 1".to_string(),
            ));
        }

        if self.modules.max_concurrency == 0 {
            return Err(HostError::Configuration(
                "modules.max_concurrency must be at least 1".to_string(),
            ));
        }

        if self.modules.init_timeout_secs == 0 {
            return Err(HostError::Configuration(
                "modules.init_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
