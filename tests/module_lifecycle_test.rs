//! Integration tests for the module lifecycle manager.

mod common;

use common::{host_settings, sample_table, store_in, CallLog, MemoryConnector, MockModule};
use daq_host::config::ConfigStore;
use daq_host::modules::{
    Module, ModuleDatabaseSettings, ModuleManager, ModuleRegistry, ModuleRegistryEntry,
    ModuleState, SchemaProvisioner,
};
use daq_host::settings::ModuleHostSettings;
use daq_host::HostError;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_test::traced_test;

struct Harness {
    _dir: TempDir,
    store: ConfigStore,
    connector: Arc<MemoryConnector>,
    manager: ModuleManager,
    log: CallLog,
}

fn harness_with(settings: ModuleHostSettings, connector: MemoryConnector) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(dir.path());
    let connector = Arc::new(connector);
    let provisioner =
        SchemaProvisioner::new(store.clone(), connector.clone(), settings.registry_path.clone());
    let manager = ModuleManager::new(store.clone(), provisioner, &settings);
    Harness {
        _dir: dir,
        store,
        connector,
        manager,
        log: CallLog::default(),
    }
}

fn harness() -> Harness {
    harness_with(host_settings(5), MemoryConnector::default())
}

fn save_registry(store: &ConfigStore, entries: Vec<ModuleRegistryEntry>) {
    let registry = ModuleRegistry {
        modules: entries,
        ..Default::default()
    };
    store
        .save(ModuleHostSettings::default().registry_path, &registry, true)
        .expect("save registry");
}

fn load_registry(store: &ConfigStore) -> ModuleRegistry {
    store
        .load(ModuleHostSettings::default().registry_path, false)
        .expect("load registry")
        .expect("registry exists")
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let h = harness();
    let first = MockModule::new("trend", &h.log).arc();
    let second = MockModule::new("trend", &h.log).arc();

    h.manager.register(first).await.expect("first registration");
    let err = h.manager.register(second).await.unwrap_err();

    assert!(matches!(err, HostError::DuplicateModule(ref id) if id == "trend"));
    assert_eq!(h.manager.len(), 1);
    assert_eq!(h.manager.state("trend").await, Some(ModuleState::Registered));
}

#[tokio::test]
async fn test_register_many_reports_duplicates() {
    let h = harness();
    let modules: Vec<Arc<dyn Module>> = vec![
        MockModule::new("a", &h.log).arc(),
        MockModule::new("b", &h.log).arc(),
        MockModule::new("a", &h.log).arc(),
    ];

    let report = h.manager.register_many(modules).await;

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed_ids, vec!["a"]);
}

#[tokio::test]
async fn test_partial_initialization_failure() {
    let h = harness();
    for module in [
        MockModule::new("a", &h.log).arc(),
        MockModule::new("b", &h.log).arc(),
        MockModule::new("c", &h.log).failing_initialize().arc(),
    ] {
        h.manager.register(module).await.expect("register");
    }

    let report = h.manager.initialize_all().await;

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failed_ids, vec!["c"]);
    assert!(report.errors["c"].contains("sensor not responding"));
    assert_eq!(h.manager.state("a").await, Some(ModuleState::Initialized));
    assert_eq!(h.manager.state("b").await, Some(ModuleState::Initialized));
    assert_eq!(h.manager.state("c").await, Some(ModuleState::Error));

    let status = h.manager.status("c").await.expect("status");
    assert!(!status.initialized);
    assert!(status.last_error.is_some());

    let startup = h.manager.startup_all().await;
    assert_eq!(startup.total, 2);
    assert!(startup.is_success());
    assert_eq!(h.log.count("c", "start"), 0);
}

#[tokio::test]
async fn test_initialize_all_skips_already_initialized() {
    let h = harness();
    h.manager
        .register(MockModule::new("a", &h.log).arc())
        .await
        .expect("register");

    assert_eq!(h.manager.initialize_all().await.total, 1);
    assert_eq!(h.manager.initialize_all().await.total, 0);
    assert_eq!(h.log.count("a", "initialize"), 1);
}

#[tokio::test]
async fn test_initialization_timeout_marks_error() {
    let h = harness_with(host_settings(1), MemoryConnector::default());
    h.manager
        .register(MockModule::new("slow", &h.log).slow_initialize(Duration::from_secs(5)).arc())
        .await
        .expect("register");
    h.manager
        .register(MockModule::new("fast", &h.log).arc())
        .await
        .expect("register");

    let report = h.manager.initialize_all().await;

    assert_eq!(report.failed_ids, vec!["slow"]);
    assert!(report.errors["slow"].contains("timed out"));
    assert_eq!(h.manager.state("slow").await, Some(ModuleState::Error));
    assert_eq!(h.manager.state("fast").await, Some(ModuleState::Initialized));
}

#[tokio::test]
async fn test_startup_and_shutdown_order() {
    let h = harness();
    let mut early = ModuleRegistryEntry::new("early");
    early.priority = 10;
    let mut late = ModuleRegistryEntry::new("late");
    late.priority = 200;
    save_registry(&h.store, vec![early, late]);

    for module in [
        MockModule::new("late", &h.log).arc(),
        MockModule::new("mid_b", &h.log).sort_order(2).arc(),
        MockModule::new("mid_a", &h.log).sort_order(1).arc(),
        MockModule::new("early", &h.log).arc(),
    ] {
        h.manager.register(module).await.expect("register");
    }
    h.manager.initialize_all().await;

    let report = h.manager.startup_all().await;
    assert_eq!(report.succeeded, 4);
    assert_eq!(h.log.ids_for("start"), vec!["early", "mid_a", "mid_b", "late"]);

    let ids: Vec<String> = h.manager.list().await.into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["early", "mid_a", "mid_b", "late"]);

    let report = h.manager.shutdown_all().await;
    assert_eq!(report.succeeded, 4);
    assert_eq!(h.log.ids_for("stop"), vec!["late", "mid_b", "mid_a", "early"]);
    for id in ["early", "mid_a", "mid_b", "late"] {
        assert_eq!(h.manager.state(id).await, Some(ModuleState::Initialized));
    }
}

#[tokio::test]
async fn test_disabled_in_registry_is_not_started() {
    let h = harness();
    let mut entry = ModuleRegistryEntry::new("off");
    entry.is_enabled = false;
    save_registry(&h.store, vec![entry]);

    h.manager
        .register(MockModule::new("off", &h.log).arc())
        .await
        .expect("register");
    h.manager.initialize_all().await;
    let report = h.manager.startup_all().await;

    assert_eq!(report.total, 0);
    assert_eq!(h.manager.state("off").await, Some(ModuleState::Initialized));
    assert!(!h.manager.status("off").await.expect("status").enabled);
}

#[tokio::test]
async fn test_start_failure_keeps_state() {
    let h = harness();
    h.manager
        .register(MockModule::new("plc", &h.log).failing_start().arc())
        .await
        .expect("register");
    h.manager.initialize_all().await;

    let report = h.manager.startup_all().await;

    assert_eq!(report.failed_ids, vec!["plc"]);
    let status = h.manager.status("plc").await.expect("status");
    assert_eq!(status.state, ModuleState::Initialized);
    assert!(!status.started);
    assert!(status
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("port in use")));
}

#[tokio::test]
async fn test_start_requires_initialization() {
    let h = harness();
    h.manager
        .register(MockModule::new("a", &h.log).arc())
        .await
        .expect("register");

    let err = h.manager.start_module("a").await.unwrap_err();

    assert!(matches!(
        err,
        HostError::InvalidTransition {
            from: ModuleState::Registered,
            to: ModuleState::Started,
            ..
        }
    ));
    assert_eq!(h.log.count("a", "start"), 0);
}

#[tokio::test]
async fn test_enable_disable_round_trip_without_reinitializing() {
    let h = harness();
    h.manager
        .register(MockModule::new("trend", &h.log).arc())
        .await
        .expect("register");
    h.manager.initialize_all().await;
    h.manager.startup_all().await;

    h.manager.disable_module("trend").await.expect("disable");
    assert_eq!(h.manager.state("trend").await, Some(ModuleState::Disabled));
    assert_eq!(h.log.count("trend", "stop"), 1);
    assert_eq!(h.log.count("trend", "on_disable"), 1);
    assert!(!load_registry(&h.store).find("trend").expect("entry").is_enabled);

    // Disabled modules are left alone by batch startup.
    assert_eq!(h.manager.startup_all().await.total, 0);

    h.manager.enable_module("trend").await.expect("enable");
    assert_eq!(h.manager.state("trend").await, Some(ModuleState::Started));
    assert_eq!(h.log.count("trend", "on_enable"), 1);
    assert_eq!(h.log.count("trend", "start"), 2);
    assert_eq!(h.log.count("trend", "initialize"), 1);
    assert!(load_registry(&h.store).find("trend").expect("entry").is_enabled);

    let status = h.manager.status("trend").await.expect("status");
    assert!(status.initialized && status.started && status.enabled);
}

#[tokio::test]
async fn test_enable_errored_module_is_rejected() {
    let h = harness();
    h.manager
        .register(MockModule::new("bad", &h.log).failing_initialize().arc())
        .await
        .expect("register");
    h.manager.initialize_all().await;

    assert!(h.manager.enable_module("bad").await.is_err());
    assert!(h.manager.disable_module("bad").await.is_err());
    assert_eq!(h.manager.state("bad").await, Some(ModuleState::Error));
}

#[tokio::test]
async fn test_reregister_leaves_error_state() {
    let h = harness();
    h.manager
        .register(MockModule::new("bad", &h.log).failing_initialize().arc())
        .await
        .expect("register");
    h.manager.initialize_all().await;
    assert_eq!(h.manager.state("bad").await, Some(ModuleState::Error));

    h.manager.reregister("bad").await.expect("reregister");

    assert_eq!(h.manager.state("bad").await, Some(ModuleState::Registered));
    assert!(h.manager.status("bad").await.expect("status").last_error.is_none());
}

#[tokio::test]
async fn test_unregister_stops_running_module() {
    let h = harness();
    h.manager
        .register(MockModule::new("a", &h.log).arc())
        .await
        .expect("register");
    h.manager.initialize_all().await;
    h.manager.startup_all().await;

    h.manager.unregister("a").await.expect("unregister");

    assert!(!h.manager.contains("a"));
    assert_eq!(h.log.count("a", "stop"), 1);
    assert!(matches!(
        h.manager.unregister("a").await,
        Err(HostError::ModuleNotFound(_))
    ));
}

#[tokio::test]
async fn test_shutdown_collects_stop_failures() {
    let h = harness();
    h.manager
        .register(MockModule::new("a", &h.log).arc())
        .await
        .expect("register");
    h.manager
        .register(MockModule::new("b", &h.log).failing_stop().arc())
        .await
        .expect("register");
    h.manager.initialize_all().await;
    h.manager.startup_all().await;

    match h.manager.shutdown().await {
        Err(HostError::ShutdownFailed(errors)) => assert_eq!(errors.len(), 1),
        other => panic!("expected shutdown failure, got {other:?}"),
    }
    assert_eq!(h.manager.state("a").await, Some(ModuleState::Initialized));
    assert_eq!(h.manager.state("b").await, Some(ModuleState::Started));
}

#[tokio::test]
async fn test_status_events_are_broadcast() {
    let h = harness();
    let mut events = h.manager.subscribe();

    h.manager
        .register(MockModule::new("a", &h.log).arc())
        .await
        .expect("register");
    h.manager.initialize_module("a").await.expect("initialize");

    let registered = events.try_recv().expect("registered event");
    assert_eq!(registered.module_id, "a");
    assert_eq!(registered.old_state, ModuleState::Unregistered);
    assert_eq!(registered.new_state, ModuleState::Registered);
    let initialized = events.try_recv().expect("initialized event");
    assert_eq!(initialized.new_state, ModuleState::Initialized);
}

#[tokio::test]
async fn test_initialization_provisions_tables() {
    let h = harness();
    let module = MockModule::new("archive", &h.log).with_table(sample_table()).arc();
    h.manager.register(module.clone()).await.expect("register");

    h.manager.initialize_all().await;

    assert_eq!(h.connector.db.table_names(), vec!["archive_samples"]);
    assert!(h.manager.database("archive").await.is_some());
    assert!(module.database_seen.lock().is_some());
    assert_eq!(module.migrations.load(Ordering::SeqCst), 0);
    assert!(h.store.exists("database.json"));
}

#[tokio::test]
async fn test_auto_migration_runs_when_enabled() {
    let h = harness();
    let mut entry = ModuleRegistryEntry::new("archive");
    let mut db = ModuleDatabaseSettings::for_module("archive");
    db.migration_settings.enable_auto_migration = true;
    entry.database = Some(db);
    save_registry(&h.store, vec![entry]);

    let module = MockModule::new("archive", &h.log).with_table(sample_table()).arc();
    h.manager.register(module.clone()).await.expect("register");
    h.manager.initialize_all().await;

    assert_eq!(module.migrations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_provisioning_failure_does_not_fail_initialization() {
    let h = harness_with(host_settings(5), MemoryConnector::refusing());
    h.manager
        .register(MockModule::new("archive", &h.log).with_table(sample_table()).arc())
        .await
        .expect("register");

    let report = h.manager.initialize_all().await;

    assert!(report.is_success());
    let status = h.manager.status("archive").await.expect("status");
    assert_eq!(status.state, ModuleState::Initialized);
    assert!(!status.has_database);
    assert_eq!(h.connector.opened().len(), 1);
}

#[tokio::test]
async fn test_hung_database_hook_is_bounded_by_init_timeout() {
    let h = harness_with(host_settings(1), MemoryConnector::default());
    h.manager
        .register(
            MockModule::new("archive", &h.log)
                .with_table(sample_table())
                .hanging_database_init()
                .arc(),
        )
        .await
        .expect("register");
    h.manager
        .register(MockModule::new("trend", &h.log).arc())
        .await
        .expect("register");

    let report = tokio::time::timeout(Duration::from_secs(5), h.manager.initialize_all())
        .await
        .expect("initialize_all finishes within the init timeout");

    assert!(report.is_success());
    let status = tokio::time::timeout(Duration::from_secs(1), h.manager.status("archive"))
        .await
        .expect("module lock released")
        .expect("status");
    assert_eq!(status.state, ModuleState::Initialized);
    assert!(!status.has_database);
    assert_eq!(h.log.count("archive", "initialize_database"), 1);
    assert_eq!(h.manager.state("trend").await, Some(ModuleState::Initialized));
}

#[tokio::test]
async fn test_settings_document_is_seeded() {
    let h = harness();
    h.manager
        .register(
            MockModule::new("scope", &h.log)
                .with_settings(json!({"gain": 2, "channels": ["A", "B"]}))
                .arc(),
        )
        .await
        .expect("register");

    h.manager.initialize_all().await;

    let settings: serde_json::Value = h
        .store
        .load("modules/scope.json", false)
        .expect("load")
        .expect("settings exist");
    assert_eq!(settings["gain"], json!(2));
}

#[tokio::test]
#[traced_test]
async fn test_initialization_failure_is_logged() {
    let h = harness();
    h.manager
        .register(MockModule::new("c", &h.log).failing_initialize().arc())
        .await
        .expect("register");

    h.manager.initialize_all().await;

    assert!(logs_contain("Module initialization failed"));
    assert!(logs_contain("Batch operation finished with failures"));
}
