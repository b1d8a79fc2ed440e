//! Type-erased cache entries for the configuration store.

use super::ConfigDocument;
use super::store::ConfigStore;
use crate::error::HostResult;
use std::any::{Any, TypeId};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Re-reads a document from disk with the type the entry was created for and
/// returns its JSON snapshot (`None` when the file is gone).
pub(crate) type Reloader = fn(&ConfigStore, &Path) -> HostResult<Option<serde_json::Value>>;

/// One cached document.
///
/// Entries are replaced wholesale on reload, never patched in place.
#[derive(Clone)]
pub(crate) struct CacheEntry {
    pub value: Arc<dyn Any + Send + Sync>,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub snapshot: serde_json::Value,
    pub cached_at: Instant,
    pub file_modified: Option<SystemTime>,
    pub watch_active: bool,
    pub reloader: Reloader,
}

impl CacheEntry {
    pub fn new<T: ConfigDocument>(
        value: T,
        snapshot: serde_json::Value,
        file_modified: Option<SystemTime>,
        watch_active: bool,
    ) -> Self {
        Self {
            value: Arc::new(value),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            snapshot,
            cached_at: Instant::now(),
            file_modified,
            watch_active,
            reloader: reload_as::<T>,
        }
    }

    /// Typed view of the cached value; `None` on a type-tag mismatch.
    pub fn get<T: ConfigDocument>(&self) -> Option<T> {
        if self.type_id != TypeId::of::<T>() {
            return None;
        }
        self.value.downcast_ref::<T>().cloned()
    }

    /// True when the entry may be returned without touching the disk contents.
    ///
    /// `disk_modified` is the current modification time of the backing file.
    pub fn is_fresh(&self, expiration: Option<Duration>, disk_modified: Option<SystemTime>) -> bool {
        if let Some(max_age) = expiration {
            if self.cached_at.elapsed() > max_age {
                return false;
            }
        }
        match (self.file_modified, disk_modified) {
            (Some(cached), Some(disk)) => disk <= cached,
            (None, None) => true,
            _ => false,
        }
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("type_name", &self.type_name)
            .field("cached_at", &self.cached_at)
            .field("file_modified", &self.file_modified)
            .field("watch_active", &self.watch_active)
            .finish()
    }
}

fn reload_as<T: ConfigDocument>(
    store: &ConfigStore,
    path: &Path,
) -> HostResult<Option<serde_json::Value>> {
    Ok(store.load::<T>(path, false)?.and_then(|v| serde_json::to_value(v).ok()))
}
