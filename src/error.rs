//! Custom error types for the host.
//!
//! This module defines the primary error type, `HostError`, used by the configuration
//! store, the module loader and the lifecycle manager. Using the `thiserror` crate, it
//! provides a centralized and consistent way to report failures of directly requested
//! operations.
//!
//! ## Error Hierarchy
//!
//! - **`ConfigLoad`** / **`ConfigSave`**: a configuration document could not be parsed or
//!   serialized. The underlying `serde_json` error is kept as the source.
//! - **`Io`**: file system failures, annotated with the path involved.
//! - **`NotFound`**: an explicitly requested file (backup source, restore source) is missing.
//!   Note that a missing document on `load` is *not* an error; it yields `None`.
//! - **`Watch`**: the file watcher could not be created or attached.
//! - **`Settings`**: host settings (`config/host.toml` + environment) failed to extract.
//! - **`DuplicateModule`**, **`ModuleNotFound`**, **`InvalidTransition`**, **`ModuleHook`**:
//!   lifecycle errors raised by single-module operations of the `ModuleManager`.
//! - **`Database`**: errors reported by the database collaborator.
//!
//! Batch operations (initialize-all, discovery, load-all) never return these errors for a
//! single failing item; they log and aggregate instead.

use crate::modules::db::DatabaseError;
use crate::modules::state::ModuleState;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the host error type.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Error type shared by every component of the host.
#[derive(Error, Debug)]
pub enum HostError {
    /// A configuration document exists but could not be parsed.
    #[error("Failed to load configuration {}: {source}", path.display())]
    ConfigLoad {
        /// Absolute path of the document.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// A configuration value could not be serialized.
    #[error("Failed to save configuration {}: {source}", path.display())]
    ConfigSave {
        /// Absolute path of the document.
        path: PathBuf,
        /// Underlying serialization failure.
        #[source]
        source: serde_json::Error,
    },

    /// File system failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being accessed when the error happened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An explicitly requested file does not exist.
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// File watcher failure.
    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Operation requires a Tokio runtime but was called outside of one.
    #[error("No Tokio runtime available for background work")]
    NoRuntime,

    /// Host settings could not be extracted.
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// Semantic configuration problem.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A module with the same id is already registered.
    #[error("Module '{0}' is already registered")]
    DuplicateModule(String),

    /// No module with this id is registered.
    #[error("Module '{0}' is not registered")]
    ModuleNotFound(String),

    /// The lifecycle state machine does not allow this transition.
    #[error("Module '{module_id}' cannot transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Module id.
        module_id: String,
        /// Current state.
        from: ModuleState,
        /// Requested state.
        to: ModuleState,
    },

    /// A module hook returned an error.
    #[error("Module '{module_id}' failed in {hook}: {message}")]
    ModuleHook {
        /// Module id.
        module_id: String,
        /// Hook name (initialize, start, stop, ...).
        hook: &'static str,
        /// Rendered error chain.
        message: String,
    },

    /// An operation exceeded its time budget.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// What was running.
        operation: String,
        /// Budget in seconds.
        seconds: u64,
    },

    /// Database collaborator failure.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Several shutdown steps failed.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<HostError>),
}

impl HostError {
    /// Builds an `Io` error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HostError::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a `ModuleHook` error from an `anyhow` chain.
    pub fn hook(module_id: &str, hook: &'static str, err: &anyhow::Error) -> Self {
        HostError::ModuleHook {
            module_id: module_id.to_string(),
            hook,
            message: format!("{err:#}"),
        }
    }
}

impl From<figment::Error> for HostError {
    fn from(value: figment::Error) -> Self {
        HostError::Settings(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_invalid_transition() {
        let err = HostError::InvalidTransition {
            module_id: "history".to_string(),
            from: ModuleState::Registered,
            to: ModuleState::Started,
        };
        assert_eq!(
            err.to_string(),
            "Module 'history' cannot transition from Registered to Started"
        );
    }

    #[test]
    fn hook_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("socket closed").context("connect to PLC");
        let err = HostError::hook("plc_bridge", "start", &inner);
        assert_eq!(
            err.to_string(),
            "Module 'plc_bridge' failed in start: connect to PLC: socket closed"
        );
    }

    #[test]
    fn load_error_exposes_parse_source() {
        let parse = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let err = HostError::ConfigLoad {
            path: PathBuf::from("/etc/daq/system.json"),
            source: parse,
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("Failed to load configuration /etc/daq/system.json"));
    }
}
