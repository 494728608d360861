//! Helpers that reshape listing results into lookup tables
//!
//! All are pure functions over the item list. Items lacking the identifier
//! field are skipped.

use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// Render an identifier value as a map key
fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn identifier_key(item: &Value, identifier: &str) -> Option<String> {
    let key = item.get(identifier).and_then(key_of);
    if key.is_none() {
        debug!("Skipping item without '{}': {}", identifier, item);
    }
    key
}

/// The `identifier` field of every item, in order
pub fn get_identifier_list(items: &[Value], identifier: &str) -> Vec<Value> {
    items
        .iter()
        .filter_map(|item| item.get(identifier).cloned())
        .collect()
}

/// `identifier` → `value` for every item. Later duplicates overwrite earlier ones.
pub fn get_all_identifiers(
    items: &[Value],
    identifier: &str,
    value: &str,
) -> HashMap<String, Value> {
    items
        .iter()
        .filter_map(|item| {
            let key = identifier_key(item, identifier)?;
            Some((key, item.get(value).cloned().unwrap_or(Value::Null)))
        })
        .collect()
}

/// `identifier` → whole item
pub fn response_to_dict(items: &[Value], identifier: &str) -> HashMap<String, Value> {
    items
        .iter()
        .filter_map(|item| Some((identifier_key(item, identifier)?, item.clone())))
        .collect()
}

/// Lower-cased `identifier` → every matching item's selected `values`
pub fn get_all_identifiers_multiple(
    items: &[Value],
    identifier: &str,
    values: &[&str],
) -> HashMap<String, Vec<Map<String, Value>>> {
    let mut identifiers: HashMap<String, Vec<Map<String, Value>>> = HashMap::new();
    for item in items {
        let Some(key) = identifier_key(item, identifier) else {
            continue;
        };
        let selected = values
            .iter()
            .map(|v| (v.to_string(), item.get(*v).cloned().unwrap_or(Value::Null)))
            .collect();
        identifiers.entry(key.to_lowercase()).or_default().push(selected);
    }
    identifiers
}
