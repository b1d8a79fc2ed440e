//! Integration tests for module table provisioning.

mod common;

use common::{host_settings, sample_table, store_in, CallLog, MemoryConnector, MockModule};
use daq_host::config::{ConfigStore, DatabaseConfig};
use daq_host::modules::db::SqliteDatabase;
use daq_host::modules::schema::ColumnType;
use daq_host::modules::{
    Database, ModuleDatabaseSettings, ModuleManager, ModuleRegistry, ModuleRegistryEntry,
    SchemaProvisioner, SqliteConnector, TableDef,
};
use std::sync::Arc;
use tempfile::TempDir;

const REGISTRY: &str = "modules/registry.json";

fn provisioner(store: &ConfigStore) -> SchemaProvisioner {
    SchemaProvisioner::new(store.clone(), Arc::new(SqliteConnector), REGISTRY)
}

fn with_database_settings(store: &ConfigStore, settings: ModuleDatabaseSettings) {
    let mut entry = ModuleRegistryEntry::new(settings.module_id.clone());
    entry.database = Some(settings);
    let registry = ModuleRegistry {
        modules: vec![entry],
        ..Default::default()
    };
    store.save(REGISTRY, &registry, true).expect("save registry");
}

fn tables() -> Vec<TableDef> {
    vec![
        sample_table(),
        TableDef::record("Event", "events").column("message", ColumnType::Text),
    ]
}

#[test]
fn test_create_tables_is_idempotent() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(dir.path());
    let provisioner = provisioner(&store);
    let db = SqliteDatabase::in_memory().expect("db");

    assert!(provisioner.create_tables("scope", &db, &tables()));
    assert!(provisioner.create_tables("scope", &db, &tables()));

    let exist = provisioner.tables_exist("scope", &db, &tables());
    assert_eq!(exist.get("Sample"), Some(&true));
    assert_eq!(exist.get("Event"), Some(&true));
    assert!(db.table_exists("scope_samples").expect("table lookup"));
}

#[test]
fn test_invalid_type_fails_without_blocking_others() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(dir.path());
    let provisioner = provisioner(&store);
    let db = SqliteDatabase::in_memory().expect("db");
    let types = vec![TableDef::record("Base", "base").into_abstract(), sample_table()];

    assert!(!provisioner.create_tables("scope", &db, &types));

    let validity = provisioner.validate_types(&types);
    assert_eq!(validity.get("Base"), Some(&false));
    assert_eq!(validity.get("Sample"), Some(&true));
    assert!(db.table_exists("scope_samples").expect("table lookup"));
    assert!(!db.table_exists("scope_base").expect("table lookup"));
}

#[test]
fn test_drop_requires_registry_opt_in() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(dir.path());
    let provisioner = provisioner(&store);
    let db = SqliteDatabase::in_memory().expect("db");
    provisioner.create_tables("scope", &db, &tables());

    assert!(provisioner.drop_tables("scope", &db, &tables()));
    assert!(db.table_exists("scope_samples").expect("table lookup"));

    let mut settings = ModuleDatabaseSettings::for_module("scope");
    settings.drop_tables_on_unload = true;
    with_database_settings(&store, settings);

    assert!(provisioner.drop_tables("scope", &db, &tables()));
    assert!(!db.table_exists("scope_samples").expect("table lookup"));
    assert!(!db.table_exists("scope_events").expect("table lookup"));
}

#[test]
fn test_disabled_database_is_a_no_op() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(dir.path());
    let mut settings = ModuleDatabaseSettings::for_module("scope");
    settings.enable_database = false;
    with_database_settings(&store, settings);
    let provisioner = provisioner(&store);
    let db = SqliteDatabase::in_memory().expect("db");

    assert!(provisioner.create_tables("scope", &db, &tables()));
    assert!(!db.table_exists("scope_samples").expect("table lookup"));
}

#[test]
fn test_auto_create_can_be_switched_off() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(dir.path());
    let mut settings = ModuleDatabaseSettings::for_module("scope");
    settings.auto_create_tables = false;
    with_database_settings(&store, settings);
    let provisioner = provisioner(&store);
    let db = SqliteDatabase::in_memory().expect("db");

    assert!(provisioner.create_tables("scope", &db, &tables()));
    assert!(provisioner
        .tables_exist("scope", &db, &tables())
        .values()
        .all(|exists| !exists));
}

#[test]
fn test_custom_prefix() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(dir.path());
    let mut settings = ModuleDatabaseSettings::for_module("alarm_journal");
    settings.table_prefix = "aj_".to_string();
    with_database_settings(&store, settings);
    let provisioner = provisioner(&store);
    let db = SqliteDatabase::in_memory().expect("db");

    provisioner.create_tables("alarm_journal", &db, &tables());

    assert!(db.table_exists("aj_samples").expect("table lookup"));
    assert!(!db.table_exists("alarm_journal_samples").expect("table lookup"));
}

#[test]
fn test_default_connection_comes_from_database_document() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(dir.path());
    let provisioner = provisioner(&store);

    let params = provisioner.connection_params("scope").expect("params");

    assert_eq!(params.database_type, "sqlite");
    assert_eq!(
        params.connection_string,
        dir.path().join("data/daq.db").to_string_lossy()
    );
    assert!(store.exists(DatabaseConfig::PATH));
}

#[test]
fn test_custom_connection_parameters() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(dir.path());
    let mut settings = ModuleDatabaseSettings::for_module("scope");
    settings.connection_string = Some("data/scope.db".to_string());
    settings.database_type = Some("sqlite".to_string());
    with_database_settings(&store, settings);
    let provisioner = provisioner(&store);

    let params = provisioner.connection_params("scope").expect("params");
    assert_eq!(
        params.connection_string,
        dir.path().join("data/scope.db").to_string_lossy()
    );

    let db = provisioner.open_connection("scope").expect("open");
    assert_eq!(db.backend(), "sqlite");
    assert!(dir.path().join("data/scope.db").exists());
}

#[test]
fn test_unsupported_backend_fails_to_open() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(dir.path());
    let mut settings = ModuleDatabaseSettings::for_module("scope");
    settings.connection_string = Some("Server=plant;Database=daq".to_string());
    settings.database_type = Some("sqlserver".to_string());
    with_database_settings(&store, settings);

    assert!(provisioner(&store).open_connection("scope").is_err());
}

#[tokio::test]
async fn test_unregister_drops_tables_when_configured() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(dir.path());
    let mut settings = ModuleDatabaseSettings::for_module("scope");
    settings.drop_tables_on_unload = true;
    with_database_settings(&store, settings);

    let connector = Arc::new(MemoryConnector::default());
    let provisioner = SchemaProvisioner::new(store.clone(), connector.clone(), REGISTRY);
    let manager = ModuleManager::new(store.clone(), provisioner, &host_settings(5));
    let log = CallLog::default();
    manager
        .register(MockModule::new("scope", &log).with_table(sample_table()).arc())
        .await
        .expect("register");
    manager.initialize_all().await;
    assert_eq!(connector.db.table_names(), vec!["scope_samples"]);

    manager.unregister("scope").await.expect("unregister");

    assert!(connector.db.table_names().is_empty());
}
