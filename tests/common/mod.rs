//! Shared fixtures for integration tests: scripted mock modules and an in-memory
//! database.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use daq_host::config::ConfigStore;
use daq_host::modules::db::Row;
use daq_host::modules::schema::{ColumnDef, ColumnType, TableDef};
use daq_host::modules::{
    ConnectionParams, Database, DatabaseConnector, DatabaseError, Module, ModuleContext,
    ModuleInfo, SchemaOwner, SettingsProvider,
};
use daq_host::settings::{ModuleHostSettings, StoreSettings};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Store rooted in `dir` without backups on save.
pub fn store_in(dir: &Path) -> ConfigStore {
    let mut settings = StoreSettings::with_root(dir);
    settings.backup_on_save = false;
    ConfigStore::new(settings)
}

/// Module host settings with a short init timeout.
pub fn host_settings(init_timeout_secs: u64) -> ModuleHostSettings {
    ModuleHostSettings {
        init_timeout_secs,
        ..Default::default()
    }
}

/// Shared, ordered record of hook invocations (`"<id>:<hook>"`).
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, id: &str, hook: &str) {
        self.0.lock().push(format!("{id}:{hook}"));
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Ids that ran `hook`, in call order.
    pub fn ids_for(&self, hook: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| e.strip_suffix(&format!(":{hook}")).map(str::to_string))
            .collect()
    }

    pub fn count(&self, id: &str, hook: &str) -> usize {
        let key = format!("{id}:{hook}");
        self.0.lock().iter().filter(|e| **e == key).count()
    }
}

/// Scriptable module.
pub struct MockModule {
    pub info: ModuleInfo,
    pub log: CallLog,
    pub fail_initialize: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub init_delay: Option<Duration>,
    pub hang_database_init: bool,
    pub tables: Vec<TableDef>,
    pub settings_defaults: Option<Value>,
    pub database_seen: Mutex<Option<Arc<dyn Database>>>,
    pub migrations: AtomicUsize,
}

impl MockModule {
    pub fn new(id: &str, log: &CallLog) -> Self {
        Self {
            info: ModuleInfo::new(id, format!("Mock {id}")),
            log: log.clone(),
            fail_initialize: false,
            fail_start: false,
            fail_stop: false,
            init_delay: None,
            hang_database_init: false,
            tables: Vec::new(),
            settings_defaults: None,
            database_seen: Mutex::new(None),
            migrations: AtomicUsize::new(0),
        }
    }

    pub fn sort_order(mut self, sort_order: i32) -> Self {
        self.info.sort_order = sort_order;
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn slow_initialize(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    /// `initialize_database` never completes.
    pub fn hanging_database_init(mut self) -> Self {
        self.hang_database_init = true;
        self
    }

    pub fn with_table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_settings(mut self, defaults: Value) -> Self {
        self.settings_defaults = Some(defaults);
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Module for MockModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    async fn initialize(&self, _ctx: &ModuleContext) -> Result<()> {
        self.log.push(&self.info.id, "initialize");
        if let Some(delay) = self.init_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_initialize {
            bail!("sensor not responding");
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.log.push(&self.info.id, "start");
        if self.fail_start {
            bail!("port in use");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.log.push(&self.info.id, "stop");
        if self.fail_stop {
            bail!("worker did not exit");
        }
        Ok(())
    }

    async fn on_enable(&self) -> Result<()> {
        self.log.push(&self.info.id, "on_enable");
        Ok(())
    }

    async fn on_disable(&self) -> Result<()> {
        self.log.push(&self.info.id, "on_disable");
        Ok(())
    }

    fn schema(&self) -> Option<&dyn SchemaOwner> {
        if self.tables.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    fn settings(&self) -> Option<&dyn SettingsProvider> {
        if self.settings_defaults.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl SchemaOwner for MockModule {
    fn tables(&self) -> Vec<TableDef> {
        self.tables.clone()
    }

    async fn initialize_database(&self, db: Arc<dyn Database>) -> Result<()> {
        self.log.push(&self.info.id, "initialize_database");
        if self.hang_database_init {
            std::future::pending::<()>().await;
        }
        *self.database_seen.lock() = Some(db);
        Ok(())
    }

    async fn migrate(
        &self,
        _db: Arc<dyn Database>,
        _settings: &daq_host::modules::registry::MigrationSettings,
    ) -> Result<()> {
        self.migrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl SettingsProvider for MockModule {
    fn settings_page_id(&self) -> String {
        format!("{}.settings", self.info.id)
    }

    fn default_settings(&self) -> Value {
        self.settings_defaults.clone().unwrap_or(Value::Null)
    }
}

/// A simple record table.
pub fn sample_table() -> TableDef {
    TableDef::record("Sample", "samples").column("value", ColumnType::Real)
}

/// Database that only tracks table names.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<BTreeMap<String, Vec<ColumnDef>>>,
    pub fail_creates: bool,
}

impl MemoryDatabase {
    pub fn table_names(&self) -> Vec<String> {
        self.tables.lock().keys().cloned().collect()
    }
}

impl Database for MemoryDatabase {
    fn backend(&self) -> &str {
        "memory"
    }

    fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Result<(), DatabaseError> {
        if self.fail_creates {
            return Err(DatabaseError::Connection("read-only database".into()));
        }
        self.tables
            .lock()
            .entry(table.to_string())
            .or_insert_with(|| columns.to_vec());
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<(), DatabaseError> {
        self.tables.lock().remove(table);
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool, DatabaseError> {
        Ok(self.tables.lock().contains_key(table))
    }

    fn execute(&self, _sql: &str, _params: &[Value]) -> Result<usize, DatabaseError> {
        Ok(0)
    }

    fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>, DatabaseError> {
        Ok(Vec::new())
    }
}

/// Connector handing out one shared [`MemoryDatabase`] and recording every request.
#[derive(Default)]
pub struct MemoryConnector {
    pub db: Arc<MemoryDatabase>,
    pub opened: Mutex<Vec<ConnectionParams>>,
    pub refuse: bool,
}

impl MemoryConnector {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn opened(&self) -> Vec<ConnectionParams> {
        self.opened.lock().clone()
    }
}

impl DatabaseConnector for MemoryConnector {
    fn open(&self, params: &ConnectionParams) -> Result<Arc<dyn Database>, DatabaseError> {
        self.opened.lock().push(params.clone());
        if self.refuse {
            return Err(DatabaseError::Connection("server unreachable".into()));
        }
        Ok(Arc::clone(&self.db) as Arc<dyn Database>)
    }
}
