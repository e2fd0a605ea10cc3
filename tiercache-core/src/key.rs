//! Cache key derivation.
//!
//! Keys are `"{namespace}:cache:{sha256}"` where the hash covers a canonical
//! JSON rendering of the input. Object members are emitted in sorted key
//! order at every depth, so `{a:1,b:2}` and `{b:2,a:1}` hash identically
//! regardless of how the caller built them.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CacheError, CacheResult};

/// Separator between the namespace and the hash.
pub const KEY_INFIX: &str = ":cache:";

/// Derive a namespaced storage key from any serializable input.
pub fn derive_key<K>(namespace: &str, input: &K) -> CacheResult<String>
where
    K: Serialize + ?Sized,
{
    let value = serde_json::to_value(input).map_err(|e| CacheError::Serialization {
        reason: format!("cache key input: {}", e),
    })?;

    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    Ok(format!("{}{}{}", namespace, KEY_INFIX, hash_hex(canonical.as_bytes())))
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, member)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(member, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
