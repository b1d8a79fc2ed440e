//! Field-level change detection between two snapshots of a configuration document.
//!
//! Documents are compared through their `serde_json` representation. Top-level fields
//! are visited in declaration order (the `preserve_order` feature keeps struct field
//! order). Scalar fields compare by value; arrays and objects compare their canonical
//! serialized text, which is order-sensitive.
//!
//! # Example
//! ```
//! use daq_host::config::diff;
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Plc { host: String, port: u16 }
//!
//! let old = Plc { host: "10.0.0.5".into(), port: 502 };
//! let new = Plc { host: "10.0.0.5".into(), port: 503 };
//! assert_eq!(diff::diff(Some(&old), Some(&new)), vec!["port".to_string()]);
//! ```

use serde::Serialize;
use serde_json::Value;

/// Placeholder reported when two non-object values differ as a whole.
pub const WHOLE_VALUE: &str = "*";

/// Names of the top-level fields that differ between `old` and `new`.
///
/// When exactly one side is absent every field of the present side is reported.
/// A side that fails to serialize is treated as absent.
pub fn diff<T: Serialize>(old: Option<&T>, new: Option<&T>) -> Vec<String> {
    let old = old.and_then(|v| to_value(v));
    let new = new.and_then(|v| to_value(v));
    diff_values(old.as_ref(), new.as_ref())
}

/// Same as [`diff`] for documents already in JSON form.
pub fn diff_values(old: Option<&Value>, new: Option<&Value>) -> Vec<String> {
    match (old, new) {
        (None, None) => Vec::new(),
        (None, Some(present)) | (Some(present), None) => all_fields(present),
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            let mut changed = Vec::new();
            for (key, old_field) in a {
                match b.get(key) {
                    Some(new_field) if field_equal(old_field, new_field) => {}
                    _ => changed.push(key.clone()),
                }
            }
            for key in b.keys() {
                if !a.contains_key(key) {
                    changed.push(key.clone());
                }
            }
            changed
        }
        (Some(a), Some(b)) => {
            if field_equal(a, b) {
                Vec::new()
            } else {
                vec![WHOLE_VALUE.to_string()]
            }
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!(error = %e, "Snapshot could not be serialized for diffing");
            None
        }
    }
}

fn all_fields(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => map.keys().cloned().collect(),
        _ => vec![WHOLE_VALUE.to_string()],
    }
}

fn field_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            a.to_string() == b.to_string()
        }
        _ => a == b,
    }
}
