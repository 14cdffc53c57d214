//! Schema migration of stored spectrum documents.
//!
//! Documents without a `version` field predate version 1 and use singular
//! key names inside their range and zone trees. Migration is total: anything
//! it does not recognise passes through untouched.

use serde_json::Value;

pub const CURRENT_VERSION: u64 = 1;

/// Pre-v1 key names and their replacements inside `ranges`/`zones` subtrees
const V0_RENAMES: [(&str, &str); 4] = [
    ("j", "js"),
    ("signal", "signals"),
    ("integral", "integration"),
    ("peak", "peaks"),
];

/// Version recorded in a document; None for pre-v1 documents (absent or null)
pub fn document_version(doc: &Value) -> Option<u64> {
    doc.get("version").and_then(Value::as_u64)
}

/// Bring a document up to `CURRENT_VERSION`.
///
/// Non-object roots and documents already carrying a version other than 0
/// are returned unchanged.
pub fn migrate(mut doc: Value) -> Value {
    if !doc.is_object() {
        return doc;
    }
    match doc.get("version") {
        None | Some(Value::Null) => {}
        Some(v) if v.as_u64() == Some(0) => {}
        // Version 1 and later, or an unreadable version, stays as is
        Some(_) => return doc,
    }
    rename_v0_keys(&mut doc, false);
    if let Value::Object(map) = &mut doc {
        map.insert("version".to_string(), Value::from(CURRENT_VERSION));
    }
    log::info!("Migrated pre-v1 document to version {}", CURRENT_VERSION);
    doc
}

fn rename_v0_keys(value: &mut Value, inside_annotations: bool) {
    match value {
        Value::Object(map) => {
            if inside_annotations {
                for (old, new) in V0_RENAMES {
                    if map.contains_key(new) {
                        continue;
                    }
                    if let Some(v) = map.remove(old) {
                        map.insert(new.to_string(), v);
                    }
                }
            }
            for (key, child) in map.iter_mut() {
                let inside = inside_annotations || key == "ranges" || key == "zones";
                rename_v0_keys(child, inside);
            }
        }
        Value::Array(items) => {
            for item in items {
                rename_v0_keys(item, inside_annotations);
            }
        }
        _ => {}
    }
}
