use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::util::errors::Result;

/// Hex sha256 of the value's canonical JSON form (object keys sorted at every level).
pub fn content_hash<T: Serialize>(value: &T) -> Result<String> {
    let value = canonicalize(serde_json::to_value(value)?);
    let bytes = serde_json::to_vec(&value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, canonicalize(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
