//! Subscription identity.
//!
//! The id is the SHA-256 of a canonical JSON encoding (object keys sorted
//! at every depth, no whitespace), so field order in the payload never
//! changes the id.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::errors::ClientError;
use crate::request::{RequestName, normalize_subscribe_payload};

/// Canonical JSON text of `value`.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
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

/// Hex SHA-256 of the canonical encoding of `value`.
pub fn content_hash(value: &Value) -> String {
    format!("{:x}", Sha256::digest(canonical_json(value).as_bytes()))
}

/// Identifier of a subscription request.
///
/// The payload is normalized first, so flat and nested payload shapes
/// map to the same id.
pub fn subscription_id(name: RequestName, payload: Option<&Value>) -> Result<String, ClientError> {
    let fields = normalize_subscribe_payload(payload)?;
    let mut key = Map::new();
    let _ = key.insert("name".into(), Value::String(name.as_str().into()));
    let _ = key.insert("payload".into(), Value::Object(fields));
    Ok(content_hash(&Value::Object(key)))
}
