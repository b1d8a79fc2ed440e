//! Modules shipped with the host.
//!
//! - [`HistoryArchiveModule`] records tag samples into its own `samples` table.
//! - [`AlarmJournalModule`] keeps an acknowledgeable alarm journal.
//!
//! Both own their tables through [`SchemaOwner`] and expose a settings page through
//! [`SettingsProvider`]. [`register_builtins`] adds them to a catalog.

use super::catalog::ModuleCatalog;
use super::db::{Database, Row};
use super::schema::{physical_table_name, ColumnType, TableDef};
use super::{Module, ModuleContext, ModuleInfo, SchemaOwner, SettingsProvider};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Type name of the history archive in the catalog.
pub const HISTORY_ARCHIVE: &str = "history_archive";
/// Type name of the alarm journal in the catalog.
pub const ALARM_JOURNAL: &str = "alarm_journal";

/// Registers every built-in module type.
pub fn register_builtins(catalog: &mut ModuleCatalog) {
    catalog.register_builtin(HISTORY_ARCHIVE, || {
        Ok(Arc::new(HistoryArchiveModule::new()) as Arc<dyn Module>)
    });
    catalog.register_builtin(ALARM_JOURNAL, || {
        Ok(Arc::new(AlarmJournalModule::new()) as Arc<dyn Module>)
    });
}

/// Catalog preloaded with the built-ins.
pub fn builtin_catalog() -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    register_builtins(&mut catalog);
    catalog
}

/// A module's table bound to its connection once provisioning is done.
#[derive(Default)]
struct TableBinding {
    prefix: String,
    db: Option<Arc<dyn Database>>,
}

impl TableBinding {
    fn table(&self, module_id: &str, logical: &str) -> String {
        physical_table_name(module_id, &self.prefix, logical)
    }

    fn db(&self, module_id: &str) -> Result<Arc<dyn Database>> {
        self.db
            .clone()
            .ok_or_else(|| anyhow!("module '{module_id}' has no database connection"))
    }
}

fn table_prefix(ctx: &ModuleContext) -> String {
    ctx.entry
        .database
        .as_ref()
        .map(|d| d.table_prefix.clone())
        .unwrap_or_default()
}

/// Archives tag samples while running.
pub struct HistoryArchiveModule {
    info: ModuleInfo,
    running: AtomicBool,
    binding: Mutex<TableBinding>,
    excluded: Mutex<Vec<String>>,
}

impl Default for HistoryArchiveModule {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryArchiveModule {
    const TABLE: &'static str = "samples";

    /// Stopped archive with no exclusions.
    pub fn new() -> Self {
        Self {
            info: ModuleInfo::new(HISTORY_ARCHIVE, "History Archive")
                .with_description("Stores sampled tag values for trend display")
                .with_version("1.2.0")
                .with_icon("history")
                .with_sort_order(10),
            running: AtomicBool::new(false),
            binding: Mutex::new(TableBinding::default()),
            excluded: Mutex::new(Vec::new()),
        }
    }

    /// True between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Physical name of the samples table.
    pub fn table_name(&self) -> String {
        self.binding.lock().table(&self.info.id, Self::TABLE)
    }

    /// Stores one sample. Returns false when the archive is stopped or the tag is
    /// excluded.
    pub fn record_sample(&self, tag: &str, value: f64, quality: i64) -> Result<bool> {
        if !self.is_running() || self.excluded.lock().iter().any(|t| t == tag) {
            return Ok(false);
        }
        let (db, table) = {
            let binding = self.binding.lock();
            (binding.db(&self.info.id)?, binding.table(&self.info.id, Self::TABLE))
        };
        let now = Utc::now().to_rfc3339();
        db.execute(
            &format!(
                "INSERT INTO {table} (created_at, tag, value, quality, sampled_at) VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            &[json!(now), json!(tag), json!(value), json!(quality), json!(now)],
        )
        .with_context(|| format!("failed to archive sample for '{tag}'"))?;
        Ok(true)
    }

    /// Stored samples of `tag`, oldest first.
    pub fn samples(&self, tag: &str) -> Result<Vec<Row>> {
        let (db, table) = {
            let binding = self.binding.lock();
            (binding.db(&self.info.id)?, binding.table(&self.info.id, Self::TABLE))
        };
        Ok(db.query(
            &format!("SELECT tag, value, quality FROM {table} WHERE tag = ?1 ORDER BY id"),
            &[json!(tag)],
        )?)
    }
}

#[async_trait]
impl Module for HistoryArchiveModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    async fn initialize(&self, ctx: &ModuleContext) -> Result<()> {
        self.binding.lock().prefix = table_prefix(ctx);
        let settings: Option<Value> = ctx.load_settings()?;
        let excluded = settings
            .as_ref()
            .and_then(|s| s.get("excludedTags"))
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        *self.excluded.lock() = excluded;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn schema(&self) -> Option<&dyn SchemaOwner> {
        Some(self)
    }

    fn settings(&self) -> Option<&dyn SettingsProvider> {
        Some(self)
    }
}

#[async_trait]
impl SchemaOwner for HistoryArchiveModule {
    fn tables(&self) -> Vec<TableDef> {
        vec![TableDef::record("HistorySample", Self::TABLE)
            .column("tag", ColumnType::Text)
            .column("value", ColumnType::Real)
            .column("quality", ColumnType::Integer)
            .column("sampled_at", ColumnType::Timestamp)]
    }

    async fn initialize_database(&self, db: Arc<dyn Database>) -> Result<()> {
        self.binding.lock().db = Some(db);
        Ok(())
    }
}

impl SettingsProvider for HistoryArchiveModule {
    fn settings_page_id(&self) -> String {
        "history_archive.settings".to_string()
    }

    fn default_settings(&self) -> Value {
        json!({
            "sampleIntervalMs": 1000,
            "retentionDays": 30,
            "excludedTags": []
        })
    }
}

/// Journal of raised alarms.
pub struct AlarmJournalModule {
    info: ModuleInfo,
    accepting: AtomicBool,
    binding: Mutex<TableBinding>,
}

impl Default for AlarmJournalModule {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmJournalModule {
    const TABLE: &'static str = "entries";

    /// Stopped journal.
    pub fn new() -> Self {
        Self {
            info: ModuleInfo::new(ALARM_JOURNAL, "Alarm Journal")
                .with_description("Records raised alarms and their acknowledgement")
                .with_version("1.0.0")
                .with_icon("alarm")
                .with_sort_order(20),
            accepting: AtomicBool::new(false),
            binding: Mutex::new(TableBinding::default()),
        }
    }

    /// Appends an entry. Fails while the journal is not running.
    pub fn record(&self, message: &str, severity: i64) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(anyhow!("alarm journal is not running"));
        }
        let (db, table) = {
            let binding = self.binding.lock();
            (binding.db(&self.info.id)?, binding.table(&self.info.id, Self::TABLE))
        };
        db.execute(
            &format!(
                "INSERT INTO {table} (created_at, message, severity, acknowledged) VALUES (?1, ?2, ?3, ?4)"
            ),
            &[json!(Utc::now().to_rfc3339()), json!(message), json!(severity), json!(false)],
        )?;
        tracing::debug!(severity, "Alarm journal entry recorded");
        Ok(())
    }

    /// Marks every entry acknowledged, returning how many changed.
    pub fn acknowledge_all(&self) -> Result<usize> {
        let (db, table) = {
            let binding = self.binding.lock();
            (binding.db(&self.info.id)?, binding.table(&self.info.id, Self::TABLE))
        };
        Ok(db.execute(
            &format!("UPDATE {table} SET acknowledged = 1, updated_at = ?1 WHERE acknowledged = 0"),
            &[json!(Utc::now().to_rfc3339())],
        )?)
    }

    /// Entries not yet acknowledged, oldest first.
    pub fn unacknowledged(&self) -> Result<Vec<Row>> {
        let (db, table) = {
            let binding = self.binding.lock();
            (binding.db(&self.info.id)?, binding.table(&self.info.id, Self::TABLE))
        };
        Ok(db.query(
            &format!("SELECT message, severity FROM {table} WHERE acknowledged = 0 ORDER BY id"),
            &[],
        )?)
    }
}

#[async_trait]
impl Module for AlarmJournalModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    async fn initialize(&self, ctx: &ModuleContext) -> Result<()> {
        self.binding.lock().prefix = table_prefix(ctx);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.accepting.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.accepting.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn on_disable(&self) -> Result<()> {
        tracing::info!("Alarm journal disabled, new alarms are no longer recorded");
        Ok(())
    }

    fn schema(&self) -> Option<&dyn SchemaOwner> {
        Some(self)
    }

    fn settings(&self) -> Option<&dyn SettingsProvider> {
        Some(self)
    }
}

#[async_trait]
impl SchemaOwner for AlarmJournalModule {
    fn tables(&self) -> Vec<TableDef> {
        vec![TableDef::record("AlarmEntry", Self::TABLE)
            .column("message", ColumnType::Text)
            .column("severity", ColumnType::Integer)
            .column("acknowledged", ColumnType::Boolean)]
    }

    async fn initialize_database(&self, db: Arc<dyn Database>) -> Result<()> {
        self.binding.lock().db = Some(db);
        Ok(())
    }
}

impl SettingsProvider for AlarmJournalModule {
    fn settings_page_id(&self) -> String {
        "alarm_journal.settings".to_string()
    }

    fn default_settings(&self) -> Value {
        json!({ "maxEntries": 10000, "autoAcknowledge": false })
    }
}
