//! Deterministic cache keys
//!
//! Keys have the form `{operation}:{canonical json}`. Object keys are sorted
//! at every depth so equal arguments always produce the same key, whatever
//! field order the serializer emitted.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CacheError;

pub fn derive_key<A>(operation: &str, args: &A) -> Result<String, CacheError>
where
    A: Serialize + ?Sized,
{
    let value = serde_json::to_value(args).map_err(|source| CacheError::KeyDerivation {
        operation: operation.to_string(),
        source,
    })?;

    Ok(format!("{}:{}", operation, canonical(value)))
}

/// Prefix shared by every key of an operation
pub fn operation_prefix(operation: &str) -> String {
    format!("{}:", operation)
}

fn canonical(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, canonical(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        other => other,
    }
}
