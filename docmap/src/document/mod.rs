// Wire documents - dotted paths, partial updates, filters

use serde_json::{Map, Value};

/// A raw wire document: wire key -> JSON value.
pub type Document = Map<String, Value>;

/// A partial update: dotted path -> replacement value (`$set` semantics).
pub type Delta = Map<String, Value>;

/// Equality filter: dotted path -> expected value.
pub type Filter = Map<String, Value>;

/// A document as a driver streams it: ordered key/value pairs.
pub type RawDocument = Vec<(String, Value)>;

pub const ID_KEY: &str = "_id";
pub const CREATED_AT_KEY: &str = "created_at";
pub const MODIFIED_AT_KEY: &str = "modified_at";
pub const ACTIVE_KEY: &str = "active";

/// Top-level keys managed by the engine on every persisted document.
pub const RESERVED_KEYS: [&str; 4] = [ID_KEY, CREATED_AT_KEY, MODIFIED_AT_KEY, ACTIVE_KEY];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Extend a dotted namespace by one segment.
pub fn join_path(namespace: Option<&str>, segment: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}.{segment}"),
        _ => segment.to_string(),
    }
}

/// Read the value at a dotted path. Numeric segments index into arrays.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Replace the value at a dotted path, creating intermediate objects as needed.
///
/// Mirrors `$set`: a numeric segment addresses an array element, padding the
/// array with nulls when the index is past the end. A scalar in the way of the
/// path is replaced by an object.
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;

    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let index = segment.parse::<usize>().ok();

        current = match (current, index) {
            (Value::Array(items), Some(index)) => {
                if items.len() <= index {
                    items.resize(index + 1, Value::Null);
                }
                if last {
                    items[index] = value;
                    return;
                }
                if !items[index].is_object() && !items[index].is_array() {
                    items[index] = Value::Object(Map::new());
                }
                &mut items[index]
            }
            (node, _) => {
                if !node.is_object() {
                    *node = Value::Object(Map::new());
                }
                let Value::Object(map) = node else {
                    unreachable!("coerced to an object above")
                };
                if last {
                    map.insert(segment.to_string(), value);
                    return;
                }
                map.entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()))
            }
        };
    }
}

/// Apply every entry of a partial update to a document.
pub fn apply_delta(doc: &mut Value, delta: &Delta) {
    for (path, value) in delta {
        set_path(doc, path, value.clone());
    }
}

/// Whether a document satisfies every equality in the filter.
pub fn matches(doc: &Value, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(path, expected)| get_path(doc, path) == Some(expected))
}

/// Flatten a document into the key/value stream a driver hands to an entity.
pub fn to_pairs(doc: Document) -> RawDocument {
    doc.into_iter().collect()
}

/// Values treated as "nothing entered" by required checks.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => matches!(s.as_str(), "" | " " | "None"),
        _ => false,
    }
}
