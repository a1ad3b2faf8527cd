//! Stable JSON rendering and call fingerprints.
//!
//! The repetition guard keys its streaks on a digest of the tool call.
//! Two calls with the same arguments in a different key order must produce
//! the same fingerprint, so objects are rendered with keys sorted ascending
//! before hashing.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Render a JSON value with object keys sorted ascending.
#[must_use]
pub fn stable_json(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, item)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String((*key).clone()));
                write_stable(item, out);
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        },
        other => {
            let _ = write!(out, "{other}");
        },
    }
}

/// Lowercase hex SHA-256 of the input.
#[must_use]
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Fingerprint of a tool call: SHA-256 over `tool:stable_json(arguments)`.
#[must_use]
pub fn call_fingerprint(tool: &str, arguments: &Map<String, Value>) -> String {
    let stable = stable_json(&Value::Object(arguments.clone()));
    sha256_hex(format!("{tool}:{stable}").as_bytes())
}
