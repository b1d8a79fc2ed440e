//! # DAQ Host Library
//!
//! Infrastructure for a data acquisition application: a typed, cached configuration
//! store that watches its files, and a host that discovers optional functional units
//! ("modules") and drives their lifecycle.
//!
//! ## Crate Structure
//!
//! - **`config`**: [`ConfigStore`](config::ConfigStore) with its cache, file watching,
//!   debounced change events, backups and validation, plus the typed system documents.
//! - **`modules`**: the [`Module`](modules::Module) contract, discovery through the
//!   [`ModuleCatalog`](modules::ModuleCatalog) and plugin manifests, schema provisioning
//!   and the [`ModuleManager`](modules::ModuleManager) state machine.
//! - **`settings`**: host settings loaded with `figment` from `config/host.toml` and
//!   `DAQ_HOST_*` environment variables.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: the crate-wide [`HostError`].
//!
//! Every component receives the store it works on; there is no global instance. The
//! `daq-host` binary is the composition root.

pub mod config;
pub mod error;
pub mod logging;
pub mod modules;
pub mod settings;

pub use error::{HostError, HostResult};
