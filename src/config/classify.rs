//! Maps document paths to logical configuration categories.
//!
//! Every category has one canonical location relative to the configuration root:
//!
//! | Category        | Relative path                                 |
//! |-----------------|-----------------------------------------------|
//! | System          | `system.json`                                 |
//! | Database        | `database.json`                               |
//! | Plc             | `plc.json`                                    |
//! | History         | `history.json`                                |
//! | Alarm           | `alarm.json`                                  |
//! | ModuleRegistry  | `modules/registry.json`                       |
//! | Module(id)      | `modules/<id>.json` or `modules/<id>/*.json`  |
//!
//! Paths are matched relative to the configuration root. File names of the fixed
//! documents compare case-insensitively; module ids keep their original spelling. Module
//! documents are recognized before the fixed names, so a module called `history` owns
//! `modules/history.json`. The registry is the one file under `modules/` that is not a
//! module document.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Canonical relative path of the system document.
pub const SYSTEM_CONFIG: &str = "system.json";
/// Canonical relative path of the default database document.
pub const DATABASE_CONFIG: &str = "database.json";
/// Canonical relative path of the PLC document.
pub const PLC_CONFIG: &str = "plc.json";
/// Canonical relative path of the history document.
pub const HISTORY_CONFIG: &str = "history.json";
/// Canonical relative path of the alarm document.
pub const ALARM_CONFIG: &str = "alarm.json";
/// Canonical relative path of the module registry document.
pub const MODULE_REGISTRY: &str = "modules/registry.json";
/// Directory holding per-module documents.
pub const MODULES_DIR: &str = "modules";

/// Logical category of a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigType {
    /// Application-wide settings
    System,
    /// System-wide default database settings
    Database,
    /// PLC connection settings
    Plc,
    /// History/archiving settings
    History,
    /// Alarm settings
    Alarm,
    /// The module registry
    ModuleRegistry,
    /// Settings owned by one module
    Module(String),
    /// Anything else
    Unknown,
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigType::System => write!(f, "system"),
            ConfigType::Database => write!(f, "database"),
            ConfigType::Plc => write!(f, "plc"),
            ConfigType::History => write!(f, "history"),
            ConfigType::Alarm => write!(f, "alarm"),
            ConfigType::ModuleRegistry => write!(f, "module-registry"),
            ConfigType::Module(id) => write!(f, "module:{id}"),
            ConfigType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classifies `path`, taken relative to the configuration root.
///
/// Absolute paths do not match any template; use [`classify_in`] for those.
pub fn classify(path: &Path) -> ConfigType {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let normalized = normalized.trim_start_matches("./");
    let segments: Vec<&str> = normalized.split('/').collect();

    if normalized.eq_ignore_ascii_case(MODULE_REGISTRY) {
        return ConfigType::ModuleRegistry;
    }
    if let Some(id) = module_id_from(&segments) {
        return ConfigType::Module(id);
    }

    let [file] = segments.as_slice() else {
        return ConfigType::Unknown;
    };
    let fixed = [
        (SYSTEM_CONFIG, ConfigType::System),
        (DATABASE_CONFIG, ConfigType::Database),
        (PLC_CONFIG, ConfigType::Plc),
        (HISTORY_CONFIG, ConfigType::History),
        (ALARM_CONFIG, ConfigType::Alarm),
    ];
    fixed
        .into_iter()
        .find(|(template, _)| file.eq_ignore_ascii_case(template))
        .map_or(ConfigType::Unknown, |(_, config_type)| config_type)
}

/// Classifies an absolute `path` against the configuration `root`.
///
/// Paths outside `root` are [`ConfigType::Unknown`].
pub fn classify_in(root: &Path, path: &Path) -> ConfigType {
    match path.strip_prefix(root) {
        Ok(relative) => classify(relative),
        Err(_) if path.is_relative() => classify(path),
        Err(_) => ConfigType::Unknown,
    }
}

/// Relative path of the settings document of `module_id`.
pub fn module_settings_path(module_id: &str) -> String {
    format!("{MODULES_DIR}/{module_id}.json")
}

fn is_json(file: &str) -> bool {
    file.len() > ".json".len() && file.to_ascii_lowercase().ends_with(".json")
}

fn module_id_from(segments: &[&str]) -> Option<String> {
    let (dir, rest) = segments.split_first()?;
    if !dir.eq_ignore_ascii_case(MODULES_DIR) {
        return None;
    }
    match rest {
        // modules/<id>.json
        [file] if is_json(file) => Some(file[..file.len() - ".json".len()].to_string()),
        // modules/<id>/<anything>.json
        [id, .., file] if !id.is_empty() && is_json(file) => Some((*id).to_string()),
        _ => None,
    }
}
