//! File watching for configuration documents.
//!
//! Each watched document gets its own [`RecommendedWatcher`] attached to the parent
//! directory (non-recursive) and filtered to the document's file name. Raw notifications
//! are coalesced per path by a [`Debouncer`]: every new event cancels the pending timer
//! for that path and starts a fresh one, so a burst of writes settles into one callback.

use super::events::ChangeKind;
use crate::error::{HostError, HostResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use notify::{
    event::{ModifyKind, RenameMode},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

struct Pending {
    generation: u64,
    kind: ChangeKind,
    handle: JoinHandle<()>,
}

/// One cancellable delayed task per key, replaced on every new event.
pub struct Debouncer {
    delay: Duration,
    pending: Arc<DashMap<PathBuf, Pending>>,
    generation: AtomicU64,
}

impl Debouncer {
    /// Creates a debouncer with the given quiet period.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Quiet period.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Records an event for `key`. `on_settled` runs on `runtime` once no further event
    /// for `key` arrived for the quiet period, receiving the merged change kind.
    pub fn schedule<F>(&self, runtime: &Handle, key: PathBuf, kind: ChangeKind, on_settled: F)
    where
        F: FnOnce(ChangeKind) + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        match self.pending.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get().handle.abort();
                let merged = occupied.get().kind.merge(kind);
                let handle = self.spawn_timer(runtime, key, generation, merged, on_settled);
                occupied.insert(Pending {
                    generation,
                    kind: merged,
                    handle,
                });
            }
            Entry::Vacant(vacant) => {
                let handle = self.spawn_timer(runtime, key, generation, kind, on_settled);
                vacant.insert(Pending {
                    generation,
                    kind,
                    handle,
                });
            }
        }
    }

    fn spawn_timer<F>(
        &self,
        runtime: &Handle,
        key: PathBuf,
        generation: u64,
        kind: ChangeKind,
        on_settled: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(ChangeKind) + Send + 'static,
    {
        let pending = Arc::clone(&self.pending);
        let delay = self.delay;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // Only the newest timer for the key may fire.
            if pending
                .remove_if(&key, |_, p| p.generation == generation)
                .is_some()
            {
                on_settled(kind);
            }
        })
    }

    /// Cancels the pending timer for `key`, if any.
    pub fn cancel(&self, key: &Path) -> bool {
        match self.pending.remove(key) {
            Some((_, pending)) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending timer.
    pub fn cancel_all(&self) {
        self.pending.retain(|_, pending| {
            pending.handle.abort();
            false
        });
    }

    /// Number of keys with a timer in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Maps a raw notification to a change kind for the watched file.
///
/// `index` is the position of the watched file in `event.paths`; for a two-path
/// rename the second path is the destination.
pub(crate) fn classify_event(event: &Event, index: usize) -> Option<ChangeKind> {
    match &event.kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Modified),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if index == 1 => {
            Some(ChangeKind::Modified)
        }
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Renamed),
        EventKind::Modify(_) | EventKind::Any => Some(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Other => None,
    }
}

/// Attaches a watcher to the directory containing `file`, invoking `on_event` for every
/// relevant notification concerning that file name.
pub(crate) fn watch_file<F>(file: &Path, on_event: F) -> HostResult<RecommendedWatcher>
where
    F: Fn(ChangeKind) + Send + 'static,
{
    let parent = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| HostError::Configuration(format!("{} has no parent directory", file.display())))?;
    let file_name: OsString = file
        .file_name()
        .ok_or_else(|| HostError::Configuration(format!("{} has no file name", file.display())))?
        .to_os_string();

    let watched = file.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for (index, path) in event.paths.iter().enumerate() {
                if path.file_name() != Some(file_name.as_os_str()) {
                    continue;
                }
                if let Some(kind) = classify_event(&event, index) {
                    tracing::trace!(path = %watched.display(), ?kind, "Raw configuration file event");
                    on_event(kind);
                }
            }
        }
        Err(e) => {
            tracing::warn!(path = %watched.display(), error = %e, "File watcher error");
        }
    })?;

    watcher.watch(parent, RecursiveMode::NonRecursive)?;
    tracing::debug!(file = %file.display(), dir = %parent.display(), "Watching configuration file");
    Ok(watcher)
}
