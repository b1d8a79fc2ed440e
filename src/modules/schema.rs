//! Table definitions declared by modules and the provisioner that materializes them.
//!
//! A module that owns data declares one [`TableDef`] per record type. Every concrete
//! record type carries the base record columns (`id`, `created_at`, `updated_at`); use
//! [`TableDef::record`] to start from them. Physical table names are prefixed per
//! module so that two modules never collide:
//!
//! ```
//! use daq_host::modules::schema::{physical_table_name, ColumnType, TableDef};
//!
//! let def = TableDef::record("AlarmEntry", "entries").column("message", ColumnType::Text);
//! assert!(def.is_valid_record());
//! assert_eq!(physical_table_name("alarm_journal", "", &def.table_name), "alarm_journal_entries");
//! ```

use super::db::{ConnectionParams, Database, DatabaseConnector, DatabaseError};
use super::registry::{ModuleDatabaseSettings, ModuleRegistry};
use crate::config::{ConfigStore, DatabaseConfig};
use crate::error::HostResult;
use crate::settings::ModuleHostSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Column storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit integer
    Integer,
    /// Floating point
    Real,
    /// UTF-8 text
    Text,
    /// Raw bytes
    Blob,
    /// Stored as 0/1
    Boolean,
    /// RFC 3339 text
    Timestamp,
}

impl ColumnType {
    /// SQL type name.
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text | ColumnType::Timestamp => "TEXT",
            ColumnType::Blob => "BLOB",
        }
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Storage class
    pub column_type: ColumnType,
    /// NULL allowed
    pub nullable: bool,
    /// Part of the primary key
    pub primary_key: bool,
}

impl ColumnDef {
    /// Non-null, non-key column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            primary_key: false,
        }
    }

    /// Marks the column nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Marks the column as primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Column definition fragment for `CREATE TABLE`.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.sql_type());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.column_type == ColumnType::Integer {
                sql.push_str(" AUTOINCREMENT");
            }
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        sql
    }
}

/// Whether a type maps to a table of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    /// Instantiable record type
    Concrete,
    /// Shared base shape, never stored directly
    Abstract,
}

/// A record type a module stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Type name used in reports
    pub type_name: String,
    /// Logical table name (before module prefixing)
    pub table_name: String,
    /// Columns
    pub columns: Vec<ColumnDef>,
    /// Concrete or abstract
    pub kind: TableKind,
}

/// Columns every stored record carries.
pub fn base_record_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("id", ColumnType::Integer).primary_key(),
        ColumnDef::new("created_at", ColumnType::Timestamp),
        ColumnDef::new("updated_at", ColumnType::Timestamp).nullable(),
    ]
}

impl TableDef {
    /// Concrete record type starting with the base record columns.
    pub fn record(type_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            table_name: table_name.into(),
            columns: base_record_columns(),
            kind: TableKind::Concrete,
        }
    }

    /// Appends a non-null column.
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef::new(name, column_type));
        self
    }

    /// Appends a nullable column.
    pub fn optional_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef::new(name, column_type).nullable());
        self
    }

    /// Marks the type abstract.
    pub fn into_abstract(mut self) -> Self {
        self.kind = TableKind::Abstract;
        self
    }

    /// Concrete and carrying every base record column.
    pub fn is_valid_record(&self) -> bool {
        self.kind == TableKind::Concrete
            && base_record_columns()
                .iter()
                .all(|base| self.columns.iter().any(|c| c.name == base.name))
    }
}

/// Table name as stored: `prefix` (or `<module_id>_` when empty) plus `table_name`,
/// lowercased with every other character replaced by `_`.
pub fn physical_table_name(module_id: &str, prefix: &str, table_name: &str) -> String {
    let prefix = if prefix.is_empty() {
        format!("{module_id}_")
    } else {
        prefix.to_string()
    };
    format!("{prefix}{table_name}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Creates, drops and probes module tables and opens module connections.
///
/// Failures are logged and reported as booleans or per-type maps; nothing here
/// returns an error to the lifecycle manager except [`open_connection`](Self::open_connection).
#[derive(Clone)]
pub struct SchemaProvisioner {
    store: ConfigStore,
    connector: Arc<dyn DatabaseConnector>,
    registry_path: PathBuf,
}

impl SchemaProvisioner {
    /// Provisioner reading module database settings from the registry at `registry_path`.
    pub fn new(
        store: ConfigStore,
        connector: Arc<dyn DatabaseConnector>,
        registry_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            connector,
            registry_path: registry_path.into(),
        }
    }

    /// Provisioner using the registry location from host settings.
    pub fn from_settings(
        store: ConfigStore,
        connector: Arc<dyn DatabaseConnector>,
        settings: &ModuleHostSettings,
    ) -> Self {
        Self::new(store, connector, settings.registry_path.clone())
    }

    /// Database settings of `module_id` from the registry (defaults when absent).
    pub fn database_settings(&self, module_id: &str) -> ModuleDatabaseSettings {
        match self.store.load::<ModuleRegistry>(&self.registry_path, true) {
            Ok(Some(registry)) => registry
                .find(module_id)
                .and_then(|entry| entry.database.clone())
                .unwrap_or_else(|| ModuleDatabaseSettings::for_module(module_id)),
            Ok(None) => ModuleDatabaseSettings::for_module(module_id),
            Err(e) => {
                tracing::warn!(module_id, error = %e, "Module registry unreadable, using default database settings");
                ModuleDatabaseSettings::for_module(module_id)
            }
        }
    }

    /// Checks every type; valid means concrete with all base record columns.
    pub fn validate_types(&self, types: &[TableDef]) -> BTreeMap<String, bool> {
        types
            .iter()
            .map(|def| {
                let valid = def.is_valid_record();
                if !valid {
                    tracing::warn!(type_name = %def.type_name, "Type is not a concrete record type");
                }
                (def.type_name.clone(), valid)
            })
            .collect()
    }

    /// Creates the tables of `types` for `module_id`.
    ///
    /// Existing tables count as success. Returns true only when every type succeeded.
    pub fn create_tables(&self, module_id: &str, db: &dyn Database, types: &[TableDef]) -> bool {
        let settings = self.database_settings(module_id);
        if !settings.enable_database {
            tracing::debug!(module_id, "Database disabled for module, skipping table creation");
            return true;
        }
        if !settings.auto_create_tables {
            tracing::debug!(module_id, "Automatic table creation disabled for module");
            return true;
        }

        let mut all_ok = true;
        for def in types {
            if !def.is_valid_record() {
                tracing::error!(module_id, type_name = %def.type_name, "Cannot create table for invalid record type");
                all_ok = false;
                continue;
            }
            let table = physical_table_name(module_id, &settings.table_prefix, &def.table_name);
            let result = db.table_exists(&table).and_then(|exists| {
                if exists {
                    tracing::debug!(module_id, table = %table, "Table already exists");
                    Ok(())
                } else {
                    db.create_table(&table, &def.columns).map(|()| {
                        tracing::info!(module_id, table = %table, "Created table");
                    })
                }
            });
            if let Err(e) = result {
                tracing::error!(module_id, table = %table, error = %e, "Failed to create table");
                all_ok = false;
            }
        }
        all_ok
    }

    /// Drops the tables of `types` for `module_id`.
    ///
    /// Does nothing (and reports success) unless the module's registry entry sets
    /// `dropTablesOnUnload`.
    pub fn drop_tables(&self, module_id: &str, db: &dyn Database, types: &[TableDef]) -> bool {
        let settings = self.database_settings(module_id);
        if !settings.enable_database || !settings.drop_tables_on_unload {
            tracing::debug!(module_id, "Table drop on unload not enabled, keeping tables");
            return true;
        }

        let mut all_ok = true;
        for def in types {
            let table = physical_table_name(module_id, &settings.table_prefix, &def.table_name);
            match db.drop_table(&table) {
                Ok(()) => tracing::info!(module_id, table = %table, "Dropped table"),
                Err(e) => {
                    tracing::error!(module_id, table = %table, error = %e, "Failed to drop table");
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    /// Existence of each type's table, keyed by type name. Probe failures read as false.
    pub fn tables_exist(&self, module_id: &str, db: &dyn Database, types: &[TableDef]) -> BTreeMap<String, bool> {
        let settings = self.database_settings(module_id);
        types
            .iter()
            .map(|def| {
                let table = physical_table_name(module_id, &settings.table_prefix, &def.table_name);
                let exists = db.table_exists(&table).unwrap_or_else(|e| {
                    tracing::warn!(module_id, table = %table, error = %e, "Table probe failed");
                    false
                });
                (def.type_name.clone(), exists)
            })
            .collect()
    }

    /// Parameters `module_id` connects with: the registry's custom parameters when both
    /// type and connection string are set, otherwise `database.json`.
    pub fn connection_params(&self, module_id: &str) -> HostResult<ConnectionParams> {
        let settings = self.database_settings(module_id);
        let defaults: DatabaseConfig =
            self.store
                .get_or_create(DatabaseConfig::PATH, DatabaseConfig::default, true)?;
        let busy_timeout = Duration::from_millis(defaults.busy_timeout_ms);

        if let Some(connection_string) = settings.connection_string.filter(|s| !s.trim().is_empty()) {
            let database_type = settings
                .database_type
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| defaults.database_type.clone());
            return Ok(ConnectionParams {
                database_type,
                connection_string: self.resolve_connection_string(&connection_string),
                busy_timeout,
            });
        }

        Ok(ConnectionParams {
            database_type: defaults.database_type,
            connection_string: self.resolve_connection_string(&defaults.connection_string),
            busy_timeout,
        })
    }

    /// Opens the connection `module_id` should use.
    pub fn open_connection(&self, module_id: &str) -> HostResult<Arc<dyn Database>> {
        let params = self.connection_params(module_id)?;
        tracing::debug!(module_id, database_type = %params.database_type, "Opening module database");
        let db = self
            .connector
            .open(&params)
            .map_err(|e: DatabaseError| {
                tracing::error!(module_id, error = %e, "Failed to open module database");
                e
            })?;
        Ok(db)
    }

    fn resolve_connection_string(&self, connection_string: &str) -> String {
        if connection_string == ":memory:" {
            return connection_string.to_string();
        }
        self.store.resolve(connection_string).to_string_lossy().into_owned()
    }
}
