//! Integration tests for watching configuration documents.
//!
//! These rely on real file system notifications, so they run serially and wait with
//! generous margins.

use daq_host::config::{ChangeKind, ConfigChangeEvent, ConfigStore, ConfigType};
use daq_host::settings::StoreSettings;
use serde::{Deserialize, Serialize};
use serial_test::serial;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast::Receiver;

const DEBOUNCE_MS: u64 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Channel {
    name: String,
    gain: f64,
    unit: String,
}

fn channel(gain: f64) -> Channel {
    Channel {
        name: "ai0".to_string(),
        gain,
        unit: "V".to_string(),
    }
}

fn watched_store(dir: &Path) -> ConfigStore {
    let mut settings = StoreSettings::with_root(dir);
    settings.debounce_ms = DEBOUNCE_MS;
    settings.backup_on_save = false;
    ConfigStore::new(settings)
}

fn write_external(path: &Path, value: &Channel) {
    fs::write(path, serde_json::to_vec_pretty(value).expect("serialize")).expect("write");
}

async fn next_event(rx: &mut Receiver<ConfigChangeEvent>, within: Duration) -> Option<ConfigChangeEvent> {
    tokio::time::timeout(within, rx.recv()).await.ok()?.ok()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS * 3)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_burst_of_writes_yields_one_event() {
    let dir = TempDir::new().expect("temp dir");
    let store = watched_store(dir.path());
    store.save("ai0.json", &channel(1.0), true).expect("save");
    store.enable_watch("ai0.json", true).expect("watch");
    let mut rx = store.subscribe();
    let path = store.resolve("ai0.json");

    write_external(&path, &channel(2.0));
    write_external(&path, &channel(3.0));
    write_external(&path, &channel(4.0));

    let event = next_event(&mut rx, Duration::from_secs(5)).await.expect("change event");
    assert_eq!(event.kind, ChangeKind::Modified);
    assert_eq!(event.path, path);
    assert_eq!(event.changed_properties, vec!["gain"]);
    assert!(event.touches("gain"));
    assert_eq!(event.previous.as_ref().map(|v| v["gain"].clone()), Some(serde_json::json!(1.0)));
    assert_eq!(event.current.as_ref().map(|v| v["gain"].clone()), Some(serde_json::json!(4.0)));

    assert!(next_event(&mut rx, Duration::from_millis(DEBOUNCE_MS * 4)).await.is_none());

    // Auto refresh updated the cache.
    let cached: Channel = store.load("ai0.json", true).expect("load").expect("exists");
    assert_eq!(cached.gain, 4.0);
    store.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_delete_is_reported_and_evicts() {
    let dir = TempDir::new().expect("temp dir");
    let store = watched_store(dir.path());
    store.save("ai0.json", &channel(1.0), true).expect("save");
    store.enable_watch("ai0.json", true).expect("watch");
    let mut rx = store.subscribe();

    fs::remove_file(store.resolve("ai0.json")).expect("remove");

    let event = next_event(&mut rx, Duration::from_secs(5)).await.expect("change event");
    assert_eq!(event.kind, ChangeKind::Deleted);
    assert!(event.current.is_none());
    assert!(event.previous.is_some());
    assert!(!store.is_cached("ai0.json"));
    store.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_watch_without_auto_refresh_reports_disk_content() {
    let dir = TempDir::new().expect("temp dir");
    let store = watched_store(dir.path());
    store.save("ai0.json", &channel(1.0), true).expect("save");
    store.enable_watch("ai0.json", false).expect("watch");
    let mut rx = store.subscribe();

    write_external(&store.resolve("ai0.json"), &channel(6.0));

    let event = next_event(&mut rx, Duration::from_secs(5)).await.expect("change event");
    assert_eq!(event.current.as_ref().map(|v| v["gain"].clone()), Some(serde_json::json!(6.0)));
    assert!(event.changed_properties.is_empty());
    store.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_registry_changes_are_classified() {
    let dir = TempDir::new().expect("temp dir");
    let store = watched_store(dir.path());
    let registry = daq_host::modules::ModuleRegistry::default();
    store.save("modules/registry.json", &registry, true).expect("save");
    store.enable_watch("modules/registry.json", true).expect("watch");
    let mut rx = store.subscribe();

    let mut changed = registry.clone();
    changed.load_timeout_seconds = 5;
    fs::write(
        store.resolve("modules/registry.json"),
        serde_json::to_vec_pretty(&changed).expect("serialize"),
    )
    .expect("write");

    let event = next_event(&mut rx, Duration::from_secs(5)).await.expect("change event");
    assert_eq!(event.config_type, ConfigType::ModuleRegistry);
    assert_eq!(event.changed_properties, vec!["loadTimeoutSeconds"]);
    store.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_disabled_watch_is_silent() {
    let dir = TempDir::new().expect("temp dir");
    let store = watched_store(dir.path());
    store.save("ai0.json", &channel(1.0), true).expect("save");
    store.enable_watch("ai0.json", true).expect("watch");
    assert!(store.is_watching("ai0.json"));
    let mut rx = store.subscribe();

    assert!(store.disable_watch("ai0.json"));
    assert!(!store.disable_watch("ai0.json"));
    write_external(&store.resolve("ai0.json"), &channel(2.0));
    settle().await;

    assert!(next_event(&mut rx, Duration::from_millis(DEBOUNCE_MS * 2)).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_shutdown_stops_publishing() {
    let dir = TempDir::new().expect("temp dir");
    let store = watched_store(dir.path());
    store.save("ai0.json", &channel(1.0), true).expect("save");
    store.enable_watch("ai0.json", true).expect("watch");
    let mut rx = store.subscribe();

    store.shutdown();
    write_external(&store.resolve("ai0.json"), &channel(2.0));
    settle().await;

    assert!(next_event(&mut rx, Duration::from_millis(DEBOUNCE_MS * 2)).await.is_none());
    assert!(!store.is_watching("ai0.json"));
    // Plain loads keep working.
    let loaded: Channel = store.load("ai0.json", false).expect("load").expect("exists");
    assert_eq!(loaded.gain, 2.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_classification_ignores_folders_above_the_root() {
    let dir = TempDir::new().expect("temp dir");
    let store = watched_store(&dir.path().join("modules"));
    store.save("daq/custom.json", &channel(1.0), true).expect("save");
    store.save("modules/TrendViewer.json", &channel(1.0), true).expect("save");
    store.enable_watch("daq/custom.json", true).expect("watch");
    store.enable_watch("modules/TrendViewer.json", true).expect("watch");
    let mut rx = store.subscribe();

    write_external(&store.resolve("daq/custom.json"), &channel(2.0));
    let event = next_event(&mut rx, Duration::from_secs(5)).await.expect("change event");
    assert_eq!(event.config_type, ConfigType::Unknown);

    write_external(&store.resolve("modules/TrendViewer.json"), &channel(2.0));
    let event = next_event(&mut rx, Duration::from_secs(5)).await.expect("change event");
    assert_eq!(event.config_type, ConfigType::Module("TrendViewer".to_string()));
    store.shutdown();
}

#[tokio::test(flavor = "current_thread")]
#[serial]
async fn test_change_is_processed_on_single_threaded_runtime() {
    let dir = TempDir::new().expect("temp dir");
    let store = watched_store(dir.path());
    store.save("ai0.json", &channel(1.0), true).expect("save");
    store.enable_watch("ai0.json", true).expect("watch");
    let mut rx = store.subscribe();

    write_external(&store.resolve("ai0.json"), &channel(5.0));

    let event = next_event(&mut rx, Duration::from_secs(5)).await.expect("change event");
    assert_eq!(event.changed_properties, vec!["gain"]);
    store.shutdown();
}
