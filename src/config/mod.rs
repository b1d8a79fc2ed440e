//! Typed configuration documents and the store that manages them.
//!
//! - [`ConfigStore`]: load/save/cache/watch/backup service keyed by path
//! - [`diff`]: top-level field change detection between two snapshots
//! - [`classify`]: path to [`ConfigType`] mapping
//! - [`validation`]: declarative constraints and validation results
//! - [`documents`]: the system, database, PLC and history documents
//!
//! Any `Serialize + DeserializeOwned + Clone + Send + Sync + 'static` type is a
//! [`ConfigDocument`] and can be stored.

pub mod backup;
mod cache;
pub mod classify;
pub mod diff;
pub mod documents;
pub mod events;
pub mod store;
pub mod validation;
pub mod watch;

pub use backup::BackupInfo;
pub use classify::{classify as classify_path, classify_in, module_settings_path, ConfigType};
pub use documents::{DatabaseConfig, HistoryConfig, PlcConfig, SystemConfig};
pub use events::{ChangeKind, ConfigChangeEvent};
pub use store::ConfigStore;
pub use validation::{Constraint, Validate, ValidationResult};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A value that can be stored as a configuration document.
pub trait ConfigDocument: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> ConfigDocument for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
