//! Combining layers into one JSON document.
//!
//! Objects merge key by key and any other value replaces what is below it.
//! A key present in the requirements document is locked: later layers may
//! add siblings under a locked object but never change a locked leaf.

use log::debug;
use serde_json::{Map, Value};

/// Apply `layer` on top of `base`, skipping keys locked by `lock`.
pub(super) fn overlay(base: &mut Value, layer: &Value, lock: Option<&Value>) {
    let lock = match lock {
        None => None,
        Some(Value::Object(map)) => Some(map),
        Some(_) => return,
    };
    let Value::Object(incoming) = layer else {
        if lock.is_none() {
            *base = layer.clone();
        }
        return;
    };
    if !base.is_object() {
        if lock.is_none() {
            *base = layer.clone();
            return;
        }
        *base = Value::Object(Map::new());
    }
    let Value::Object(target) = base else {
        return;
    };
    for (key, value) in incoming {
        let key_lock = lock.and_then(|map| map.get(key));
        if key_lock.is_some_and(|locked| !locked.is_object()) {
            debug!("ignoring override of locked config key (key={key})");
            continue;
        }
        let slot = target.entry(key.clone()).or_insert(Value::Null);
        overlay(slot, value, key_lock);
    }
}
