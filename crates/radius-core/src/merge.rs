//! Recursive deep merge over JSON values.
//!
//! Mapping-valued keys merge recursively; every other type (scalars and
//! sequences alike) is replaced by the overlay.

use serde_json::{Map, Value};

/// Merge `overlay` onto `base` in place.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            deep_merge_maps(base_map, overlay_map);
        },
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Merge `overlay` onto `base` key by key.
pub fn deep_merge_maps(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, overlay_value) in overlay {
        match base.get_mut(key) {
            Some(base_value @ Value::Object(_)) if overlay_value.is_object() => {
                deep_merge(base_value, overlay_value);
            },
            _ => {
                base.insert(key.clone(), overlay_value.clone());
            },
        }
    }
}
