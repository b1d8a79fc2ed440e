//! Database collaborator used by module schema provisioning.
//!
//! The host only needs a narrow surface from a database: create, drop and probe
//! tables, plus plain statement execution for module code. [`SqliteConnector`] is the
//! shipped backend. Every SQLite connection gets the same PRAGMA setup: foreign keys on
//! and a busy timeout so concurrent writers wait instead of failing.

use super::schema::ColumnDef;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// One result row keyed by column name.
pub type Row = Map<String, Value>;

/// Errors reported by a database backend.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite driver failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No connector handles this backend.
    #[error("Unsupported database type '{0}'")]
    UnsupportedType(String),

    /// Table or column name is not a plain identifier.
    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// Connection could not be established.
    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Parameters used to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Backend identifier, e.g. `sqlite`
    pub database_type: String,
    /// Backend-specific connection string
    pub connection_string: String,
    /// How long to wait on a locked database
    pub busy_timeout: Duration,
}

impl ConnectionParams {
    /// SQLite parameters for `connection_string` with the default busy timeout.
    pub fn sqlite(connection_string: impl Into<String>) -> Self {
        Self {
            database_type: "sqlite".to_string(),
            connection_string: connection_string.into(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

/// Connection capable of managing and querying tables.
pub trait Database: Send + Sync {
    /// Backend identifier.
    fn backend(&self) -> &str;

    /// Creates `table` unless it exists.
    fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Result<(), DatabaseError>;

    /// Drops `table` if it exists.
    fn drop_table(&self, table: &str) -> Result<(), DatabaseError>;

    /// True when `table` exists.
    fn table_exists(&self, table: &str) -> Result<bool, DatabaseError>;

    /// Runs a statement, returning the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, DatabaseError>;

    /// Runs a query, returning every row.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DatabaseError>;
}

/// Opens connections from parameters.
pub trait DatabaseConnector: Send + Sync {
    /// Opens a connection.
    fn open(&self, params: &ConnectionParams) -> Result<Arc<dyn Database>, DatabaseError>;
}

/// Opens SQLite connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteConnector;

impl DatabaseConnector for SqliteConnector {
    fn open(&self, params: &ConnectionParams) -> Result<Arc<dyn Database>, DatabaseError> {
        if !params.database_type.eq_ignore_ascii_case("sqlite") {
            return Err(DatabaseError::UnsupportedType(params.database_type.clone()));
        }
        let db = SqliteDatabase::open(&params.connection_string, params.busy_timeout)?;
        Ok(Arc::new(db))
    }
}

/// SQLite-backed [`Database`].
pub struct SqliteDatabase {
    conn: parking_lot::Mutex<Connection>,
}

impl SqliteDatabase {
    /// Opens (creating if needed) the database at `path`; `:memory:` opens a private
    /// in-memory database.
    pub fn open(path: &str, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::Connection(format!("{}: {e}", parent.display())))?;
            }
            Connection::open(path)?
        };
        configure_sqlite_connection(&conn, busy_timeout)?;
        tracing::debug!(path, "Opened SQLite database");
        Ok(Self {
            conn: parking_lot::Mutex::new(conn),
        })
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::open(":memory:", Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
    }
}

/// Applies the per-connection PRAGMA setup.
pub fn configure_sqlite_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

impl Database for SqliteDatabase {
    fn backend(&self) -> &str {
        "sqlite"
    }

    fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Result<(), DatabaseError> {
        check_identifier(table)?;
        let mut defs = Vec::with_capacity(columns.len());
        for column in columns {
            check_identifier(&column.name)?;
            defs.push(column.to_sql());
        }
        let sql = format!("CREATE TABLE IF NOT EXISTS {table} ({})", defs.join(", "));
        self.conn.lock().execute_batch(&sql)?;
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<(), DatabaseError> {
        check_identifier(table)?;
        self.conn
            .lock()
            .execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool, DatabaseError> {
        let found = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1 LIMIT 1",
                [table],
                |_row| Ok(true),
            )
            .optional()?;
        Ok(found.unwrap_or(false))
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, DatabaseError> {
        let conn = self.conn.lock();
        Ok(conn.execute(sql, params_from_iter(params.iter().map(to_sql_value)))?)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map(params_from_iter(params.iter().map(to_sql_value)), |row| {
            let mut map = Row::new();
            for (i, name) in names.iter().enumerate() {
                map.insert(name.clone(), from_sql_value(row.get_ref(i)?));
            }
            Ok(map)
        })?;
        let collected = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(collected)
    }
}

fn check_identifier(name: &str) -> Result<(), DatabaseError> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidIdentifier(name.to_string()))
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}
