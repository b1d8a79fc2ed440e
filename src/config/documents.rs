//! Typed system-level configuration documents.
//!
//! Each document lives at its canonical path below the configuration root (see
//! [`classify`](super::classify)) and carries an informal `version` field. Missing
//! fields fall back to defaults so that older files keep loading.

use super::classify::{DATABASE_CONFIG, HISTORY_CONFIG, PLC_CONFIG, SYSTEM_CONFIG};
use super::validation::{is_valid_path, is_valid_port, Constraint, Validate, ValidationResult};
use serde::{Deserialize, Serialize};

/// Current version written into new documents.
pub const DOCUMENT_VERSION: &str = "1.0";

fn default_version() -> String {
    DOCUMENT_VERSION.to_string()
}

/// Application-wide settings (`system.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SystemConfig {
    /// Document version
    pub version: String,
    /// Display name of the station
    pub station_name: String,
    /// UI language tag
    pub language: String,
    /// Directory for acquired data
    pub data_directory: String,
    /// Start acquisition automatically after startup
    pub auto_start_acquisition: bool,
    /// Screen refresh period in milliseconds
    pub refresh_interval_ms: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            station_name: "DAQ Station".to_string(),
            language: "en".to_string(),
            data_directory: "data".to_string(),
            auto_start_acquisition: false,
            refresh_interval_ms: 1000,
        }
    }
}

impl SystemConfig {
    /// Canonical relative path.
    pub const PATH: &'static str = SYSTEM_CONFIG;
}

impl Validate for SystemConfig {
    fn constraints(&self) -> Vec<Constraint> {
        vec![
            Constraint::NotEmpty {
                field: "stationName",
                value: self.station_name.clone(),
            },
            Constraint::OneOf {
                field: "language",
                value: self.language.clone(),
                allowed: &["en", "zh", "de"],
            },
            Constraint::Range {
                field: "refreshIntervalMs",
                value: self.refresh_interval_ms as f64,
                range: 50.0..=60_000.0,
            },
        ]
    }

    fn validate_extra(&self, result: &mut ValidationResult) {
        if let Err(e) = is_valid_path(&self.data_directory) {
            result.error(format!("dataDirectory: {e}"));
        }
        if self.refresh_interval_ms < 200 {
            result.warn("refreshIntervalMs below 200 ms may overload the UI thread");
        }
    }
}

/// System-wide default database settings (`database.json`).
///
/// Modules without custom connection parameters open their connection from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Document version
    pub version: String,
    /// Backend identifier
    pub database_type: String,
    /// Backend-specific connection string (for SQLite a file path or `:memory:`)
    pub connection_string: String,
    /// Lock wait in milliseconds
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            database_type: "sqlite".to_string(),
            connection_string: "data/daq.db".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    /// Canonical relative path.
    pub const PATH: &'static str = DATABASE_CONFIG;
}

impl Validate for DatabaseConfig {
    fn constraints(&self) -> Vec<Constraint> {
        vec![
            Constraint::OneOf {
                field: "databaseType",
                value: self.database_type.clone(),
                allowed: &["sqlite"],
            },
            Constraint::NotEmpty {
                field: "connectionString",
                value: self.connection_string.clone(),
            },
            Constraint::Range {
                field: "busyTimeoutMs",
                value: self.busy_timeout_ms as f64,
                range: 0.0..=600_000.0,
            },
        ]
    }
}

/// PLC connection settings (`plc.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlcConfig {
    /// Document version
    pub version: String,
    /// PLC address
    pub host: String,
    /// PLC port
    pub port: u16,
    /// Rack number
    pub rack: u8,
    /// Slot number
    pub slot: u8,
    /// Polling period in milliseconds
    pub poll_interval_ms: u64,
    /// Connect/read timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            host: "192.168.0.1".to_string(),
            port: 102,
            rack: 0,
            slot: 1,
            poll_interval_ms: 100,
            timeout_ms: 3000,
        }
    }
}

impl PlcConfig {
    /// Canonical relative path.
    pub const PATH: &'static str = PLC_CONFIG;
}

impl Validate for PlcConfig {
    fn constraints(&self) -> Vec<Constraint> {
        vec![
            Constraint::NotEmpty {
                field: "host",
                value: self.host.clone(),
            },
            Constraint::Range {
                field: "pollIntervalMs",
                value: self.poll_interval_ms as f64,
                range: 10.0..=60_000.0,
            },
            Constraint::Range {
                field: "timeoutMs",
                value: self.timeout_ms as f64,
                range: 100.0..=120_000.0,
            },
        ]
    }

    fn validate_extra(&self, result: &mut ValidationResult) {
        if let Err(e) = is_valid_port(self.port) {
            result.error(format!("port: {e}"));
        }
        if self.timeout_ms < self.poll_interval_ms {
            result.warn("timeoutMs is shorter than pollIntervalMs");
        }
    }
}

/// Archiving settings (`history.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryConfig {
    /// Document version
    pub version: String,
    /// Archive acquired values
    pub enabled: bool,
    /// Sample period in milliseconds
    pub sample_interval_ms: u64,
    /// Days before records are purged
    pub retention_days: u32,
    /// Tags excluded from archiving
    pub excluded_tags: Vec<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            enabled: true,
            sample_interval_ms: 1000,
            retention_days: 90,
            excluded_tags: Vec::new(),
        }
    }
}

impl HistoryConfig {
    /// Canonical relative path.
    pub const PATH: &'static str = HISTORY_CONFIG;
}

impl Validate for HistoryConfig {
    fn constraints(&self) -> Vec<Constraint> {
        vec![
            Constraint::Range {
                field: "sampleIntervalMs",
                value: self.sample_interval_ms as f64,
                range: 100.0..=3_600_000.0,
            },
            Constraint::Range {
                field: "retentionDays",
                value: f64::from(self.retention_days),
                range: 1.0..=3650.0,
            },
        ]
    }

    fn validate_extra(&self, result: &mut ValidationResult) {
        if !self.enabled && !self.excluded_tags.is_empty() {
            result.warn("excludedTags has no effect while history is disabled");
        }
    }
}
