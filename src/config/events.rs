//! Change notifications raised by watched configuration documents.

use super::classify::ConfigType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// File appeared.
    Created,
    /// File content or metadata changed.
    Modified,
    /// File was removed.
    Deleted,
    /// File was renamed onto or away from the watched name.
    Renamed,
}

impl ChangeKind {
    /// Folds two raw notifications for the same path into the kind reported after
    /// debouncing. A trailing delete wins; a create followed by writes stays a create.
    pub fn merge(self, next: ChangeKind) -> ChangeKind {
        match (self, next) {
            (_, ChangeKind::Deleted) => ChangeKind::Deleted,
            (ChangeKind::Deleted, ChangeKind::Modified) => ChangeKind::Created,
            (ChangeKind::Created, ChangeKind::Modified) => ChangeKind::Created,
            (_, next) => next,
        }
    }
}

/// One debounced change of a configuration document.
///
/// Events are fire-and-forget: they are broadcast to current subscribers and never
/// queued for late ones. Values are JSON snapshots of the typed document so that
/// subscribers do not need to know the document type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChangeEvent {
    /// Absolute path of the document
    pub path: PathBuf,
    /// Category of the document
    pub config_type: ConfigType,
    /// Kind of change
    pub kind: ChangeKind,
    /// Top-level fields whose value changed (empty when no typed comparison was possible)
    pub changed_properties: Vec<String>,
    /// Cached value before the change
    pub previous: Option<serde_json::Value>,
    /// Value after the change
    pub current: Option<serde_json::Value>,
    /// When the event was processed
    pub timestamp: DateTime<Utc>,
}

impl ConfigChangeEvent {
    /// True when `property` is listed as changed.
    pub fn touches(&self, property: &str) -> bool {
        self.changed_properties.iter().any(|p| p == property)
    }
}
