//! The configuration store.
//!
//! [`ConfigStore`] loads, saves, caches, watches and backs up typed JSON documents keyed
//! by path. Relative paths resolve against the configured root directory. The store is a
//! cheap `Clone` handle; build one at startup and pass it to everything that needs
//! durable settings.
//!
//! # Example
//! ```no_run
//! use daq_host::config::{ConfigStore, PlcConfig};
//! use daq_host::settings::StoreSettings;
//!
//! # fn main() -> daq_host::HostResult<()> {
//! let store = ConfigStore::new(StoreSettings::with_root("/var/lib/daq"));
//! let plc: PlcConfig = store.get_or_create(PlcConfig::PATH, PlcConfig::default, true)?;
//! println!("PLC at {}:{}", plc.host, plc.port);
//! # Ok(())
//! # }
//! ```

use super::backup::{BackupInfo, BackupPolicy};
use super::cache::CacheEntry;
use super::classify::classify_in;
use super::diff::diff_values;
use super::events::{ChangeKind, ConfigChangeEvent};
use super::validation::{Validate, ValidationResult};
use super::watch::{watch_file, Debouncer};
use super::ConfigDocument;
use crate::error::{HostError, HostResult};
use crate::settings::StoreSettings;
use chrono::Utc;
use dashmap::DashMap;
use notify::RecommendedWatcher;
use std::any::TypeId;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct WatchRegistration {
    _watcher: RecommendedWatcher,
    auto_refresh: bool,
}

struct StoreInner {
    settings: StoreSettings,
    cache: DashMap<PathBuf, CacheEntry>,
    watchers: DashMap<PathBuf, WatchRegistration>,
    debouncer: Debouncer,
    backups: BackupPolicy,
    events: broadcast::Sender<ConfigChangeEvent>,
    shut_down: AtomicBool,
}

/// Path-keyed typed document store with caching, watching and backups.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("root", &self.inner.settings.root_dir)
            .field("cached", &self.inner.cache.len())
            .field("watched", &self.inner.watchers.len())
            .finish()
    }
}

impl ConfigStore {
    /// Creates a store from its settings.
    pub fn new(settings: StoreSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let backups = BackupPolicy::new(
            settings.root_dir.clone(),
            settings.backup_dir_name.clone(),
            settings.max_backups,
        );
        let debouncer = Debouncer::new(settings.debounce());
        Self {
            inner: Arc::new(StoreInner {
                settings,
                cache: DashMap::new(),
                watchers: DashMap::new(),
                debouncer,
                backups,
                events,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Store rooted at `root` with default settings.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self::new(StoreSettings::with_root(root))
    }

    /// Configuration root directory.
    pub fn root(&self) -> &Path {
        &self.inner.settings.root_dir
    }

    /// Settings the store was built with.
    pub fn settings(&self) -> &StoreSettings {
        &self.inner.settings
    }

    /// Resolves `path` against the root when relative.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.inner.settings.root_dir.join(path)
        }
    }

    /// Loads the document at `path`.
    ///
    /// Returns `Ok(None)` when the file does not exist. With `use_cache`, a cached value
    /// of the same type is returned as long as it has not expired and the file on disk
    /// is not newer than the cached copy.
    ///
    /// # Errors
    ///
    /// [`HostError::ConfigLoad`] when the file exists but does not parse as `T`,
    /// [`HostError::Io`] when it cannot be read.
    pub fn load<T: ConfigDocument>(&self, path: impl AsRef<Path>, use_cache: bool) -> HostResult<Option<T>> {
        let path = self.resolve(path);
        let disk_modified = modified_time(&path);

        if use_cache {
            if let Some(value) = self.cached::<T>(&path, disk_modified) {
                tracing::trace!(path = %path.display(), "Configuration cache hit");
                return Ok(Some(value));
            }
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.inner.cache.remove(&path);
                return Ok(None);
            }
            Err(e) => return Err(HostError::io(&path, e)),
        };

        let value: T = serde_json::from_slice(&bytes).map_err(|source| HostError::ConfigLoad {
            path: path.clone(),
            source,
        })?;
        self.insert_entry(&path, value.clone(), disk_modified);
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(Some(value))
    }

    /// Writes `value` to `path` as pretty-printed JSON.
    ///
    /// Parent directories are created. When backups on save are enabled and the file
    /// already exists, it is snapshotted first.
    pub fn save<T: ConfigDocument>(&self, path: impl AsRef<Path>, value: &T, update_cache: bool) -> HostResult<()> {
        let path = self.resolve(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| HostError::io(parent, e))?;
        }

        if self.inner.settings.backup_on_save && path.exists() {
            if let Err(e) = self.inner.backups.create(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Backup before save failed");
            }
        }

        let text = serde_json::to_string_pretty(value).map_err(|source| HostError::ConfigSave {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, text.as_bytes())?;

        if update_cache {
            self.insert_entry(&path, value.clone(), modified_time(&path));
        } else {
            self.inner.cache.remove(&path);
        }
        tracing::debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Loads every `*.json` document directly inside `dir`.
    ///
    /// Documents that fail to parse are logged and skipped. A missing directory yields
    /// an empty map.
    pub fn load_all<T: ConfigDocument>(&self, dir: impl AsRef<Path>, use_cache: bool) -> HostResult<BTreeMap<PathBuf, T>> {
        let dir = self.resolve(dir);
        let mut documents = BTreeMap::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(documents),
            Err(e) => return Err(HostError::io(&dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| HostError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.load::<T>(&path, use_cache) {
                Ok(Some(value)) => {
                    documents.insert(path, value);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable configuration");
                }
            }
        }
        Ok(documents)
    }

    /// Loads `path`, or creates it from `default` when it does not exist.
    ///
    /// `default` runs at most once per call and only when the file is missing.
    pub fn get_or_create<T, F>(&self, path: impl AsRef<Path>, default: F, use_cache: bool) -> HostResult<T>
    where
        T: ConfigDocument,
        F: FnOnce() -> T,
    {
        let path = self.resolve(path);
        if let Some(value) = self.load::<T>(&path, use_cache)? {
            return Ok(value);
        }
        let value = default();
        self.save(&path, &value, true)?;
        tracing::info!(path = %path.display(), "Created configuration with defaults");
        Ok(value)
    }

    /// Re-reads one cached document, or every cached document when `path` is `None`.
    ///
    /// For a single path, a reload error is returned. For a full refresh, errors are
    /// logged and the remaining documents are still refreshed.
    pub fn refresh(&self, path: Option<&Path>) -> HostResult<()> {
        match path {
            Some(path) => {
                let path = self.resolve(path);
                let reloader = self.inner.cache.get(&path).map(|e| e.reloader);
                if let Some(reload) = reloader {
                    reload(self, &path)?;
                }
                Ok(())
            }
            None => {
                let targets: Vec<_> = self
                    .inner
                    .cache
                    .iter()
                    .map(|e| (e.key().clone(), e.reloader))
                    .collect();
                for (path, reload) in targets {
                    if let Err(e) = reload(self, &path) {
                        tracing::warn!(path = %path.display(), error = %e, "Refresh failed");
                    }
                }
                Ok(())
            }
        }
    }

    /// Drops one cache entry, or the whole cache when `path` is `None`.
    pub fn clear_cache(&self, path: Option<&Path>) {
        match path {
            Some(path) => {
                self.inner.cache.remove(&self.resolve(path));
            }
            None => self.inner.cache.clear(),
        }
    }

    /// True when a cache entry exists for `path`.
    pub fn is_cached(&self, path: impl AsRef<Path>) -> bool {
        self.inner.cache.contains_key(&self.resolve(path))
    }

    /// Starts watching `path` for changes.
    ///
    /// Change events are published on [`subscribe`](Self::subscribe) once a burst of
    /// file system notifications has settled. With `auto_refresh` the cached value is
    /// reloaded before the event is built. Watching an already watched path only
    /// updates `auto_refresh`.
    ///
    /// # Errors
    ///
    /// [`HostError::NoRuntime`] outside a Tokio runtime, [`HostError::Watch`] when
    /// the watcher cannot be attached.
    pub fn enable_watch(&self, path: impl AsRef<Path>, auto_refresh: bool) -> HostResult<()> {
        let path = self.resolve(path);
        if let Some(mut existing) = self.inner.watchers.get_mut(&path) {
            existing.auto_refresh = auto_refresh;
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| HostError::NoRuntime)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| HostError::io(parent, e))?;
        }

        let weak = Arc::downgrade(&self.inner);
        let watched = path.clone();
        let watcher = watch_file(&path, move |kind| {
            schedule_change(&weak, &runtime, watched.clone(), kind);
        })?;

        self.inner.watchers.insert(
            path.clone(),
            WatchRegistration {
                _watcher: watcher,
                auto_refresh,
            },
        );
        if let Some(mut entry) = self.inner.cache.get_mut(&path) {
            entry.watch_active = true;
        }
        tracing::info!(path = %path.display(), auto_refresh, "Configuration watch enabled");
        Ok(())
    }

    /// Stops watching `path`. Returns false when it was not watched.
    pub fn disable_watch(&self, path: impl AsRef<Path>) -> bool {
        let path = self.resolve(path);
        let removed = self.inner.watchers.remove(&path).is_some();
        self.inner.debouncer.cancel(&path);
        if let Some(mut entry) = self.inner.cache.get_mut(&path) {
            entry.watch_active = false;
        }
        if removed {
            tracing::info!(path = %path.display(), "Configuration watch disabled");
        }
        removed
    }

    /// True when `path` has an active watch.
    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        self.inner.watchers.contains_key(&self.resolve(path))
    }

    /// True when the document exists on disk.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).is_file()
    }

    /// Copies the document to `dest`, or to a new timestamped backup when `dest` is
    /// `None`. Returns the backup location.
    pub fn backup(&self, path: impl AsRef<Path>, dest: Option<&Path>) -> HostResult<PathBuf> {
        let path = self.resolve(path);
        if !path.is_file() {
            return Err(HostError::NotFound(path));
        }
        match dest {
            Some(dest) => {
                let dest = self.resolve(dest);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| HostError::io(parent, e))?;
                }
                fs::copy(&path, &dest).map_err(|e| HostError::io(&dest, e))?;
                tracing::info!(path = %path.display(), backup = %dest.display(), "Configuration backed up");
                Ok(dest)
            }
            None => self.inner.backups.create(&path),
        }
    }

    /// Replaces the document with the content of `source`.
    ///
    /// The source must parse as JSON. The current document (if any) is backed up first
    /// and the cache entry is invalidated.
    pub fn restore(&self, path: impl AsRef<Path>, source: impl AsRef<Path>) -> HostResult<()> {
        let path = self.resolve(path);
        let source = self.resolve(source);
        let bytes = match fs::read(&source) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(HostError::NotFound(source)),
            Err(e) => return Err(HostError::io(&source, e)),
        };
        serde_json::from_slice::<serde_json::Value>(&bytes).map_err(|e| HostError::ConfigLoad {
            path: source.clone(),
            source: e,
        })?;

        if path.is_file() {
            self.inner.backups.create(&path)?;
        } else if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| HostError::io(parent, e))?;
        }
        write_atomic(&path, &bytes)?;
        self.inner.cache.remove(&path);
        tracing::info!(path = %path.display(), source = %source.display(), "Configuration restored");
        Ok(())
    }

    /// Backups of `path`, newest first.
    pub fn list_backups(&self, path: impl AsRef<Path>) -> HostResult<Vec<BackupInfo>> {
        self.inner.backups.list(&self.resolve(path))
    }

    /// Runs the document's constraints and validation hook.
    pub fn validate<T: Validate>(&self, value: &T) -> ValidationResult {
        let result = value.validate();
        if !result.is_valid() {
            tracing::debug!(errors = result.errors.len(), warnings = result.warnings.len(), "Configuration failed validation");
        }
        result
    }

    /// Receiver for change events of watched documents.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.inner.events.subscribe()
    }

    /// Detaches every watcher and cancels pending change timers. No events are
    /// published afterwards. Load and save keep working.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.watchers.clear();
        self.inner.debouncer.cancel_all();
        for mut entry in self.inner.cache.iter_mut() {
            entry.watch_active = false;
        }
        tracing::info!("Configuration store shut down");
    }

    fn cached<T: ConfigDocument>(&self, path: &Path, disk_modified: Option<SystemTime>) -> Option<T> {
        let entry = self.inner.cache.get(path)?;
        if !entry.is_fresh(self.inner.settings.cache_expiration(), disk_modified) {
            tracing::debug!(path = %path.display(), "Cached configuration is stale");
            return None;
        }
        let value = entry.get::<T>();
        if value.is_none() {
            tracing::debug!(
                path = %path.display(),
                cached = entry.type_name,
                requested = std::any::type_name::<T>(),
                "Cached configuration has a different type"
            );
        }
        value
    }

    fn insert_entry<T: ConfigDocument>(&self, path: &Path, value: T, file_modified: Option<SystemTime>) {
        let snapshot = serde_json::to_value(&value).unwrap_or_default();
        let watch_active = self.inner.watchers.contains_key(path);
        self.inner.cache.insert(
            path.to_path_buf(),
            CacheEntry::new(value, snapshot, file_modified, watch_active),
        );
    }

    /// Handles one settled change of a watched document.
    fn process_change(&self, path: PathBuf, kind: ChangeKind) {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let Some(auto_refresh) = self.inner.watchers.get(&path).map(|w| w.auto_refresh) else {
            return;
        };

        let previous = self
            .inner
            .cache
            .get(&path)
            .map(|e| (e.snapshot.clone(), e.type_id, e.reloader));
        let previous_type = previous.as_ref().map(|(_, type_id, _)| *type_id);

        let (current, current_type): (Option<serde_json::Value>, Option<TypeId>) = if !path.exists() {
            self.inner.cache.remove(&path);
            (None, None)
        } else if let (true, Some((_, type_id, reload))) = (auto_refresh, previous.as_ref()) {
            match reload(self, &path) {
                Ok(value) => (value, Some(*type_id)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Reload after change failed, keeping cached value");
                    return;
                }
            }
        } else {
            (read_raw(&path), None)
        };

        let previous = previous.map(|(snapshot, _, _)| snapshot);
        let changed_properties = match (&previous, &current) {
            (Some(_), Some(_)) if previous_type.is_some() && previous_type == current_type => {
                diff_values(previous.as_ref(), current.as_ref())
            }
            _ => Vec::new(),
        };

        let event = ConfigChangeEvent {
            config_type: classify_in(self.root(), &path),
            path: path.clone(),
            kind,
            changed_properties,
            previous,
            current,
            timestamp: Utc::now(),
        };
        tracing::info!(
            path = %path.display(),
            kind = ?event.kind,
            config_type = %event.config_type,
            changed = ?event.changed_properties,
            "Configuration changed"
        );
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.watchers.clear();
        self.debouncer.cancel_all();
    }
}

fn schedule_change(weak: &Weak<StoreInner>, runtime: &Handle, path: PathBuf, kind: ChangeKind) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    if inner.shut_down.load(Ordering::SeqCst) {
        return;
    }
    let weak = weak.clone();
    let key = path.clone();
    let blocking = runtime.clone();
    inner.debouncer.schedule(runtime, key, kind, move |kind| {
        // Reading and parsing the document is file I/O.
        blocking.spawn_blocking(move || {
            if let Some(inner) = weak.upgrade() {
                ConfigStore { inner }.process_change(path, kind);
            }
        });
    });
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_raw(path: &Path) -> Option<serde_json::Value> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Writes through a sibling temp file and renames it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> HostResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, bytes).map_err(|e| HostError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        HostError::io(path, e)
    })
}
