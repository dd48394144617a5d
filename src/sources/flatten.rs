//! Flattening of nested JSON documents into dotted configuration keys.
//!
//! - Scalars and arrays become items keyed by their dotted path
//! - An object whose keys are a subset of `value`, `encrypted`, `deleted` and
//!   `lastUpdate` and that contains `value` is an item descriptor
//! - Any other object is a namespace and is walked recursively
//!
//! # Example
//! ```
//! use serde_json::json;
//! use dynprops::sources::flatten_items;
//!
//! let doc = json!({
//!     "server": { "port": 8080 },
//!     "db": { "password": { "value": "c1ph3r", "encrypted": true } }
//! });
//! let (items, skipped) = flatten_items(&doc);
//! // items: server.port = 8080, db.password = "c1ph3r" (encrypted)
//! assert_eq!(items.len(), 2);
//! assert!(skipped.is_empty());
//! ```

use crate::types::ConfigurationItem;
use serde_json::{Map, Value};

const DESCRIPTOR_KEYS: [&str; 4] = ["value", "encrypted", "deleted", "lastUpdate"];

/// Flatten `document` into items.
///
/// Returns the items plus a description of every entry that was skipped
/// because it was malformed. A non-object document yields nothing.
pub fn flatten_items(document: &Value) -> (Vec<ConfigurationItem>, Vec<String>) {
    let mut items = Vec::new();
    let mut skipped = Vec::new();
    if let Value::Object(map) = document {
        walk(None, map, &mut items, &mut skipped);
    }
    (items, skipped)
}

fn walk(
    prefix: Option<&str>,
    map: &Map<String, Value>,
    items: &mut Vec<ConfigurationItem>,
    skipped: &mut Vec<String>,
) {
    for (key, value) in map {
        let key = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) if is_descriptor(inner) => match descriptor_item(&key, inner) {
                Ok(item) => items.push(item),
                Err(reason) => skipped.push(format!("{}: {}", key, reason)),
            },
            Value::Object(inner) => walk(Some(&key), inner, items, skipped),
            scalar => items.push(ConfigurationItem::new(key, scalar.clone())),
        }
    }
}

fn is_descriptor(map: &Map<String, Value>) -> bool {
    map.contains_key("value") && map.keys().all(|k| DESCRIPTOR_KEYS.contains(&k.as_str()))
}

fn descriptor_item(key: &str, map: &Map<String, Value>) -> Result<ConfigurationItem, String> {
    let flag = |name: &str| -> Result<bool, String> {
        match map.get(name) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(format!("'{}' must be a boolean, got {}", name, other)),
        }
    };

    let encrypted = flag("encrypted")?;
    let deleted = flag("deleted")?;
    let value = map.get("value").cloned().unwrap_or(Value::Null);
    if encrypted && !value.is_string() {
        return Err("encrypted values must be strings".to_string());
    }

    let last_update = match map.get("lastUpdate") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => return Err(format!("'lastUpdate' must be a string, got {}", other)),
    };

    Ok(ConfigurationItem {
        key: key.to_string(),
        value,
        last_update,
        encrypted,
        deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn find<'a>(items: &'a [ConfigurationItem], key: &str) -> &'a ConfigurationItem {
        items
            .iter()
            .find(|i| i.key == key)
            .unwrap_or_else(|| panic!("missing {}", key))
    }

    #[test]
    fn test_flat_scalars() {
        let (items, skipped) = flatten_items(&json!({"a": 1, "b": "two", "c": false, "d": null}));
        assert_eq!(items.len(), 4);
        assert!(skipped.is_empty());
        assert_eq!(find(&items, "a").value, json!(1));
        assert_eq!(find(&items, "d").value, Value::Null);
    }

    #[test]
    fn test_nested_namespaces() {
        let (items, _) = flatten_items(&json!({
            "server": {"http": {"port": 8080}, "host": "localhost"}
        }));
        assert_eq!(find(&items, "server.http.port").value, json!(8080));
        assert_eq!(find(&items, "server.host").value, json!("localhost"));
    }

    #[test]
    fn test_arrays_are_values() {
        let (items, _) = flatten_items(&json!({"hosts": ["a", "b"]}));
        assert_eq!(find(&items, "hosts").value, json!(["a", "b"]));
    }

    #[test]
    fn test_descriptor_items() {
        let (items, skipped) = flatten_items(&json!({
            "secret": {"value": "cipher", "encrypted": true},
            "gone": {"value": null, "deleted": true, "lastUpdate": "2024-05-01"}
        }));
        assert!(skipped.is_empty());
        let secret = find(&items, "secret");
        assert!(secret.encrypted);
        assert_eq!(secret.value, json!("cipher"));
        let gone = find(&items, "gone");
        assert!(gone.deleted);
        assert_eq!(gone.last_update.as_deref(), Some("2024-05-01"));
    }

    #[test]
    fn test_object_with_extra_keys_is_namespace() {
        let (items, _) = flatten_items(&json!({"limits": {"value": 3, "max": 10}}));
        assert_eq!(find(&items, "limits.value").value, json!(3));
        assert_eq!(find(&items, "limits.max").value, json!(10));
    }

    #[test]
    fn test_malformed_descriptor_skipped_rest_kept() {
        let (items, skipped) = flatten_items(&json!({
            "bad": {"value": "x", "encrypted": "yes"},
            "good": "ok"
        }));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "good");
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].starts_with("bad:"));
    }

    #[test]
    fn test_non_object_document() {
        let (items, skipped) = flatten_items(&json!(["a", "b"]));
        assert!(items.is_empty());
        assert!(skipped.is_empty());
    }
}
