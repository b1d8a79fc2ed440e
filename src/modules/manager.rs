//! Module lifecycle manager.
//!
//! [`ModuleManager`] owns the registered modules and drives each one through the
//! [`ModuleState`] machine. Every module has its own record behind its own async
//! mutex, so single-module operations never block unrelated modules.
//!
//! Batch operations are fail-soft: one module failing never stops the others, and the
//! outcome is summarized in a [`BatchReport`] instead of an error.
//!
//! - `initialize_all` runs concurrently (bounded by `max_concurrency`), each module
//!   bounded by `init_timeout`. Only a failing or timed-out initialization hook moves a
//!   module to `Error`; table provisioning failures are logged.
//! - `startup_all` runs sequentially in (priority, sort order, id) order.
//! - `shutdown_all` runs in the exact reverse of that order.
//!
//! # Example
//! ```no_run
//! use daq_host::config::ConfigStore;
//! use daq_host::modules::{ModuleManager, SchemaProvisioner, SqliteConnector};
//! use daq_host::settings::ModuleHostSettings;
//! use std::sync::Arc;
//!
//! # async fn example(modules: Vec<Arc<dyn daq_host::modules::Module>>) {
//! let settings = ModuleHostSettings::default();
//! let store = ConfigStore::with_root("/var/lib/daq");
//! let provisioner = SchemaProvisioner::from_settings(store.clone(), Arc::new(SqliteConnector), &settings);
//! let manager = ModuleManager::new(store, provisioner, &settings);
//!
//! manager.register_many(modules).await;
//! let report = manager.initialize_all().await;
//! println!("{} of {} modules initialized", report.succeeded, report.total);
//! manager.startup_all().await;
//! # }
//! ```

use super::db::Database;
use super::registry::{ModuleRegistry, ModuleRegistryEntry, DEFAULT_PRIORITY};
use super::schema::SchemaProvisioner;
use super::state::{ModuleState, ModuleStatusChanged};
use super::{Module, ModuleContext, ModuleInfo, SchemaOwner};
use crate::config::{module_settings_path, ConfigStore};
use crate::error::{HostError, HostResult};
use crate::settings::ModuleHostSettings;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::Instrument;

const STATUS_CHANNEL_CAPACITY: usize = 256;

/// Mutable part of a module record.
struct RecordState {
    state: ModuleState,
    enabled: bool,
    initialized: bool,
    started: bool,
    last_transition: DateTime<Utc>,
    last_error: Option<String>,
    database: Option<Arc<dyn Database>>,
}

struct ModuleRecord {
    module: Arc<dyn Module>,
    info: ModuleInfo,
    priority: i32,
    state: Mutex<RecordState>,
}

impl ModuleRecord {
    fn order_key(&self) -> (i32, i32, String) {
        (self.priority, self.info.sort_order, self.info.id.clone())
    }
}

/// Point-in-time view of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    /// Module id
    pub id: String,
    /// Display name
    pub name: String,
    /// Version
    pub version: String,
    /// Lifecycle state
    pub state: ModuleState,
    /// Enabled flag
    pub enabled: bool,
    /// Initialization hook has succeeded
    pub initialized: bool,
    /// Currently running
    pub started: bool,
    /// Registry priority
    pub priority: i32,
    /// Sort weight
    pub sort_order: i32,
    /// Time of the last state change
    pub last_transition: DateTime<Utc>,
    /// Most recent hook failure
    pub last_error: Option<String>,
    /// A database connection is attached
    pub has_database: bool,
}

/// Outcome of a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Operation name
    pub operation: String,
    /// Modules attempted
    pub total: usize,
    /// Modules that succeeded
    pub succeeded: usize,
    /// Modules that failed
    pub failed: usize,
    /// Ids of failed modules, sorted
    pub failed_ids: Vec<String>,
    /// Error message per failed module
    pub errors: BTreeMap<String, String>,
}

impl BatchReport {
    fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, module_id: &str, result: &HostResult<()>) {
        self.total += 1;
        match result {
            Ok(()) => self.succeeded += 1,
            Err(e) => {
                self.failed += 1;
                self.failed_ids.push(module_id.to_string());
                self.errors.insert(module_id.to_string(), e.to_string());
            }
        }
    }

    fn finish(mut self) -> Self {
        self.failed_ids.sort();
        if self.failed > 0 {
            tracing::warn!(
                operation = %self.operation,
                total = self.total,
                failed = self.failed,
                failed_ids = ?self.failed_ids,
                "Batch operation finished with failures"
            );
        } else {
            tracing::info!(operation = %self.operation, total = self.total, "Batch operation finished");
        }
        self
    }

    /// True when nothing failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} succeeded",
            self.operation, self.succeeded, self.total
        )?;
        if !self.failed_ids.is_empty() {
            write!(f, " (failed: {})", self.failed_ids.join(", "))?;
        }
        Ok(())
    }
}

/// Owns registered modules and drives their lifecycle.
pub struct ModuleManager {
    records: DashMap<String, Arc<ModuleRecord>>,
    store: ConfigStore,
    provisioner: SchemaProvisioner,
    registry_path: PathBuf,
    init_timeout: Duration,
    max_concurrency: usize,
    events: broadcast::Sender<ModuleStatusChanged>,
}

impl fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleManager")
            .field("modules", &self.records.len())
            .field("init_timeout", &self.init_timeout)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl ModuleManager {
    /// Creates an empty manager.
    pub fn new(store: ConfigStore, provisioner: SchemaProvisioner, settings: &ModuleHostSettings) -> Self {
        let (events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            records: DashMap::new(),
            store,
            provisioner,
            registry_path: settings.registry_path.clone(),
            init_timeout: settings.init_timeout(),
            max_concurrency: settings.max_concurrency.max(1),
            events,
        }
    }

    /// Receiver for status change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ModuleStatusChanged> {
        self.events.subscribe()
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no module is registered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when `module_id` is registered.
    pub fn contains(&self, module_id: &str) -> bool {
        self.records.contains_key(module_id)
    }

    /// The live instance of `module_id`.
    pub fn module(&self, module_id: &str) -> Option<Arc<dyn Module>> {
        self.records.get(module_id).map(|r| Arc::clone(&r.module))
    }

    /// Registers one module in the `Registered` state.
    ///
    /// # Errors
    ///
    /// [`HostError::DuplicateModule`] when the id is taken; the existing module is kept.
    pub async fn register(&self, module: Arc<dyn Module>) -> HostResult<()> {
        let info = module.info().clone();
        let entry = self.registry_entry(&info.id);
        let record = Arc::new(ModuleRecord {
            module,
            priority: entry.as_ref().map_or(DEFAULT_PRIORITY, |e| e.priority),
            state: Mutex::new(RecordState {
                state: ModuleState::Registered,
                enabled: entry.as_ref().map_or(info.enabled_by_default, |e| e.is_enabled),
                initialized: false,
                started: false,
                last_transition: Utc::now(),
                last_error: None,
                database: None,
            }),
            info,
        });

        match self.records.entry(record.info.id.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(module_id = %record.info.id, "Rejecting duplicate module registration");
                return Err(HostError::DuplicateModule(record.info.id.clone()));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&record));
            }
        }

        tracing::info!(
            module_id = %record.info.id,
            version = %record.info.version,
            priority = record.priority,
            "Module registered"
        );
        self.emit(&record.info.id, ModuleState::Unregistered, ModuleState::Registered);
        Ok(())
    }

    /// Registers several modules; duplicates are reported, the rest registered.
    pub async fn register_many(&self, modules: Vec<Arc<dyn Module>>) -> BatchReport {
        let mut report = BatchReport::new("register");
        for module in modules {
            let id = module.info().id.clone();
            let result = self.register(module).await;
            report.record(&id, &result);
        }
        report.finish()
    }

    /// Stops the module if running, drops its tables (when the registry asks for it)
    /// and removes it.
    pub async fn unregister(&self, module_id: &str) -> HostResult<()> {
        let record = self.record(module_id)?;
        {
            let mut st = record.state.lock().await;
            if st.state == ModuleState::Started {
                if let Err(e) = record.module.stop().await {
                    tracing::warn!(module_id, error = %format!("{e:#}"), "Stop failed during unregister");
                }
                st.started = false;
            }

            if let Some(schema) = record.module.schema() {
                let db = match st.database.clone() {
                    Some(db) => Some(db),
                    None if self.provisioner.database_settings(module_id).drop_tables_on_unload => {
                        self.provisioner.open_connection(module_id).ok()
                    }
                    None => None,
                };
                if let Some(db) = db {
                    if !self.provisioner.drop_tables(module_id, db.as_ref(), &schema.tables()) {
                        tracing::warn!(module_id, "Some module tables could not be dropped");
                    }
                }
            }

            st.database = None;
            let old = st.state;
            st.state = ModuleState::Unregistered;
            st.last_transition = Utc::now();
            self.emit(module_id, old, ModuleState::Unregistered);
        }
        self.records.remove(module_id);
        tracing::info!(module_id, "Module unregistered");
        Ok(())
    }

    /// Unregisters and registers the same instance again. This is the only way out of
    /// the `Error` state.
    pub async fn reregister(&self, module_id: &str) -> HostResult<()> {
        let module = self.record(module_id).map(|r| Arc::clone(&r.module))?;
        self.unregister(module_id).await?;
        self.register(module).await
    }

    /// Initializes one module.
    pub async fn initialize_module(&self, module_id: &str) -> HostResult<()> {
        let record = self.record(module_id)?;
        self.initialize_record(&record).await
    }

    /// Initializes every module in the `Registered` state.
    pub async fn initialize_all(&self) -> BatchReport {
        let mut candidates = Vec::new();
        for record in self.ordered_records() {
            if record.state.lock().await.state == ModuleState::Registered {
                candidates.push(record);
            }
        }

        let results: Vec<(String, HostResult<()>)> = stream::iter(candidates)
            .map(|record| async move {
                let result = self.initialize_record(&record).await;
                (record.info.id.clone(), result)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = BatchReport::new("initialize");
        for (id, result) in &results {
            report.record(id, result);
        }
        report.finish()
    }

    async fn initialize_record(&self, record: &ModuleRecord) -> HostResult<()> {
        let id = record.info.id.as_str();
        let mut st = record.state.lock().await;
        match st.state {
            ModuleState::Registered => {}
            s if s.is_initialized() => return Ok(()),
            from => {
                return Err(HostError::InvalidTransition {
                    module_id: id.to_string(),
                    from,
                    to: ModuleState::Initialized,
                })
            }
        }

        let ctx = self.context_for(record);
        if let Some(settings) = record.module.settings() {
            if let Err(e) = self.store.get_or_create(&ctx.settings_path, || settings.default_settings(), true) {
                tracing::warn!(module_id = id, error = %e, "Could not create module settings document");
            }
        }

        let span = tracing::info_span!("module_init", module_id = id);
        let hook = tokio::time::timeout(self.init_timeout, record.module.initialize(&ctx))
            .instrument(span)
            .await;
        let failure = match hook {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(HostError::hook(id, "initialize", &e)),
            Err(_) => Some(HostError::Timeout {
                operation: format!("Initialization of module '{id}'"),
                seconds: self.init_timeout.as_secs(),
            }),
        };
        if let Some(err) = failure {
            tracing::error!(module_id = id, error = %err, "Module initialization failed");
            self.fail(id, &mut st, err.to_string());
            return Err(err);
        }

        if let Some(schema) = record.module.schema() {
            st.database = self.provision(id, schema).await;
        }

        st.initialized = true;
        self.transition(id, &mut st, ModuleState::Initialized)?;
        tracing::info!(module_id = id, "Module initialized");
        Ok(())
    }

    /// Creates the module's tables and runs its database hooks. Failures are logged;
    /// the returned connection is `None` when no connection could be opened or the
    /// hooks did not finish within the initialization timeout.
    async fn provision(&self, module_id: &str, schema: &dyn SchemaOwner) -> Option<Arc<dyn Database>> {
        let settings = self.provisioner.database_settings(module_id);
        if !settings.enable_database {
            tracing::debug!(module_id, "Database disabled for module");
            return None;
        }

        let tables = schema.tables();
        let db = match self.provisioner.open_connection(module_id) {
            Ok(db) => db,
            Err(e) => {
                tracing::warn!(module_id, error = %e, "Database provisioning failed, module continues without tables");
                return None;
            }
        };

        if !self.provisioner.create_tables(module_id, db.as_ref(), &tables) {
            tracing::warn!(module_id, "Some module tables could not be created");
        }

        let hooks = async {
            if let Err(e) = schema.initialize_database(Arc::clone(&db)).await {
                tracing::warn!(module_id, error = %format!("{e:#}"), "Module database initialization failed");
            }
            if settings.migration_settings.enable_auto_migration {
                if let Err(e) = schema.migrate(Arc::clone(&db), &settings.migration_settings).await {
                    tracing::warn!(module_id, error = %format!("{e:#}"), "Module migration failed");
                }
            }
        };
        // The database hooks share the initialization bound. A hung hook leaves the
        // module without a connection.
        if tokio::time::timeout(self.init_timeout, hooks).await.is_err() {
            tracing::warn!(
                module_id,
                seconds = self.init_timeout.as_secs(),
                "Module database hooks timed out, module continues without a connection"
            );
            return None;
        }
        Some(db)
    }

    /// Starts one initialized module. A failing start hook is recorded and the state
    /// is left unchanged.
    pub async fn start_module(&self, module_id: &str) -> HostResult<()> {
        let record = self.record(module_id)?;
        self.start_record(&record).await
    }

    async fn start_record(&self, record: &ModuleRecord) -> HostResult<()> {
        let id = record.info.id.as_str();
        let mut st = record.state.lock().await;
        match st.state {
            ModuleState::Started => return Ok(()),
            ModuleState::Initialized => {}
            from => {
                return Err(HostError::InvalidTransition {
                    module_id: id.to_string(),
                    from,
                    to: ModuleState::Started,
                })
            }
        }

        if let Err(e) = record.module.start().await {
            let err = HostError::hook(id, "start", &e);
            tracing::error!(module_id = id, error = %err, "Module failed to start");
            st.last_error = Some(err.to_string());
            return Err(err);
        }
        st.started = true;
        self.transition(id, &mut st, ModuleState::Started)?;
        tracing::info!(module_id = id, "Module started");
        Ok(())
    }

    /// Stops one running module, returning it to `Initialized`. A failing stop hook is
    /// recorded and the state is left unchanged.
    pub async fn stop_module(&self, module_id: &str) -> HostResult<()> {
        let record = self.record(module_id)?;
        self.stop_record(&record).await
    }

    async fn stop_record(&self, record: &ModuleRecord) -> HostResult<()> {
        let id = record.info.id.as_str();
        let mut st = record.state.lock().await;
        if st.state != ModuleState::Started {
            return Ok(());
        }

        if let Err(e) = record.module.stop().await {
            let err = HostError::hook(id, "stop", &e);
            tracing::error!(module_id = id, error = %err, "Module failed to stop");
            st.last_error = Some(err.to_string());
            return Err(err);
        }
        st.started = false;
        self.transition(id, &mut st, ModuleState::Initialized)?;
        tracing::info!(module_id = id, "Module stopped");
        Ok(())
    }

    /// Starts every enabled `Initialized` module in (priority, sort order) order.
    pub async fn startup_all(&self) -> BatchReport {
        let mut report = BatchReport::new("startup");
        for record in self.ordered_records() {
            let eligible = {
                let st = record.state.lock().await;
                st.state == ModuleState::Initialized && st.enabled
            };
            if eligible {
                let result = self.start_record(&record).await;
                report.record(&record.info.id, &result);
            }
        }
        report.finish()
    }

    /// Stops every `Started` module in the reverse of the startup order.
    pub async fn shutdown_all(&self) -> BatchReport {
        self.shutdown_collect().await.0
    }

    /// Like [`shutdown_all`](Self::shutdown_all) but fails with every stop error.
    pub async fn shutdown(&self) -> HostResult<()> {
        let (_, errors) = self.shutdown_collect().await;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HostError::ShutdownFailed(errors))
        }
    }

    async fn shutdown_collect(&self) -> (BatchReport, Vec<HostError>) {
        let mut report = BatchReport::new("shutdown");
        let mut errors = Vec::new();
        for record in self.ordered_records().into_iter().rev() {
            let running = record.state.lock().await.state == ModuleState::Started;
            if running {
                let result = self.stop_record(&record).await;
                report.record(&record.info.id, &result);
                if let Err(e) = result {
                    errors.push(e);
                }
            }
        }
        (report.finish(), errors)
    }

    /// Enables a module: runs its enable hook and starts it, without initializing it
    /// again. The enabled flag is persisted to the registry.
    pub async fn enable_module(&self, module_id: &str) -> HostResult<()> {
        let record = self.record(module_id)?;
        {
            let mut st = record.state.lock().await;
            match st.state {
                ModuleState::Started => {
                    st.enabled = true;
                }
                ModuleState::Disabled | ModuleState::Initialized => {
                    if let Err(e) = record.module.on_enable().await {
                        let err = HostError::hook(module_id, "on_enable", &e);
                        st.last_error = Some(err.to_string());
                        return Err(err);
                    }
                    if let Err(e) = record.module.start().await {
                        let err = HostError::hook(module_id, "start", &e);
                        st.last_error = Some(err.to_string());
                        return Err(err);
                    }
                    st.enabled = true;
                    st.started = true;
                    self.transition(module_id, &mut st, ModuleState::Started)?;
                }
                from => {
                    return Err(HostError::InvalidTransition {
                        module_id: module_id.to_string(),
                        from,
                        to: ModuleState::Started,
                    })
                }
            }
        }
        self.persist_enabled(module_id, true);
        tracing::info!(module_id, "Module enabled");
        Ok(())
    }

    /// Disables a module: stops it if running, runs its disable hook and moves it to
    /// `Disabled`. It stays initialized. The enabled flag is persisted to the registry.
    pub async fn disable_module(&self, module_id: &str) -> HostResult<()> {
        let record = self.record(module_id)?;
        {
            let mut st = record.state.lock().await;
            match st.state {
                ModuleState::Disabled => {}
                ModuleState::Started | ModuleState::Initialized => {
                    if st.state == ModuleState::Started {
                        if let Err(e) = record.module.stop().await {
                            let err = HostError::hook(module_id, "stop", &e);
                            st.last_error = Some(err.to_string());
                            return Err(err);
                        }
                        st.started = false;
                    }
                    if let Err(e) = record.module.on_disable().await {
                        tracing::warn!(module_id, error = %format!("{e:#}"), "Disable hook failed");
                        st.last_error = Some(HostError::hook(module_id, "on_disable", &e).to_string());
                    }
                    st.enabled = false;
                    self.transition(module_id, &mut st, ModuleState::Disabled)?;
                }
                from => {
                    return Err(HostError::InvalidTransition {
                        module_id: module_id.to_string(),
                        from,
                        to: ModuleState::Disabled,
                    })
                }
            }
        }
        self.persist_enabled(module_id, false);
        tracing::info!(module_id, "Module disabled");
        Ok(())
    }

    /// Current state of `module_id`.
    pub async fn state(&self, module_id: &str) -> Option<ModuleState> {
        let record = self.record(module_id).ok()?;
        let state = record.state.lock().await.state;
        Some(state)
    }

    /// Snapshot of `module_id`.
    pub async fn status(&self, module_id: &str) -> Option<ModuleStatus> {
        let record = self.record(module_id).ok()?;
        Some(Self::snapshot(&record).await)
    }

    /// Snapshots of every module in startup order.
    pub async fn list(&self) -> Vec<ModuleStatus> {
        let mut out = Vec::new();
        for record in self.ordered_records() {
            out.push(Self::snapshot(&record).await);
        }
        out
    }

    /// Database connection owned by `module_id`, if provisioning opened one.
    pub async fn database(&self, module_id: &str) -> Option<Arc<dyn Database>> {
        let record = self.record(module_id).ok()?;
        let db = record.state.lock().await.database.clone();
        db
    }

    async fn snapshot(record: &ModuleRecord) -> ModuleStatus {
        let st = record.state.lock().await;
        ModuleStatus {
            id: record.info.id.clone(),
            name: record.info.name.clone(),
            version: record.info.version.clone(),
            state: st.state,
            enabled: st.enabled,
            initialized: st.initialized,
            started: st.started,
            priority: record.priority,
            sort_order: record.info.sort_order,
            last_transition: st.last_transition,
            last_error: st.last_error.clone(),
            has_database: st.database.is_some(),
        }
    }

    fn record(&self, module_id: &str) -> HostResult<Arc<ModuleRecord>> {
        self.records
            .get(module_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| HostError::ModuleNotFound(module_id.to_string()))
    }

    fn ordered_records(&self) -> Vec<Arc<ModuleRecord>> {
        let mut records: Vec<_> = self.records.iter().map(|r| Arc::clone(r.value())).collect();
        records.sort_by_key(|r| r.order_key());
        records
    }

    fn registry_entry(&self, module_id: &str) -> Option<ModuleRegistryEntry> {
        match self.store.load::<ModuleRegistry>(&self.registry_path, true) {
            Ok(registry) => registry.and_then(|r| r.find(module_id).cloned()),
            Err(e) => {
                tracing::warn!(module_id, error = %e, "Module registry unreadable");
                None
            }
        }
    }

    fn context_for(&self, record: &ModuleRecord) -> ModuleContext {
        let id = &record.info.id;
        ModuleContext {
            module_id: id.clone(),
            store: self.store.clone(),
            entry: self
                .registry_entry(id)
                .unwrap_or_else(|| ModuleRegistryEntry::new(id.clone())),
            settings_path: self.store.resolve(module_settings_path(id)),
        }
    }

    fn persist_enabled(&self, module_id: &str, enabled: bool) {
        let result = self
            .store
            .get_or_create(&self.registry_path, ModuleRegistry::default, true)
            .and_then(|mut registry| {
                if !registry.set_enabled(module_id, enabled) {
                    let mut entry = ModuleRegistryEntry::new(module_id);
                    entry.is_enabled = enabled;
                    registry.modules.push(entry);
                }
                self.store.save(&self.registry_path, &registry, true)
            });
        if let Err(e) = result {
            tracing::warn!(module_id, enabled, error = %e, "Failed to persist module enablement");
        }
    }

    fn transition(&self, module_id: &str, st: &mut RecordState, to: ModuleState) -> HostResult<()> {
        let from = st.state;
        if !from.can_transition_to(to) {
            return Err(HostError::InvalidTransition {
                module_id: module_id.to_string(),
                from,
                to,
            });
        }
        st.state = to;
        st.last_transition = Utc::now();
        self.emit(module_id, from, to);
        Ok(())
    }

    fn fail(&self, module_id: &str, st: &mut RecordState, message: String) {
        let from = st.state;
        st.state = ModuleState::Error;
        st.initialized = false;
        st.started = false;
        st.last_error = Some(message);
        st.last_transition = Utc::now();
        self.emit(module_id, from, ModuleState::Error);
    }

    fn emit(&self, module_id: &str, old_state: ModuleState, new_state: ModuleState) {
        tracing::debug!(module_id, %old_state, %new_state, "Module state changed");
        // No subscribers is fine.
        let _ = self.events.send(ModuleStatusChanged {
            module_id: module_id.to_string(),
            old_state,
            new_state,
            timestamp: Utc::now(),
        });
    }
}
