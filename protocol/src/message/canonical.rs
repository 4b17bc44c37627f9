//! Canonical serialization.
//!
//! The HMAC input is:
//!
//! ```text
//! transactionId | direction | timestamp | nonce | sortedJSON(data)
//! ```
//!
//! `sortedJSON` is compact JSON with object keys sorted lexicographically
//! (by UTF-8 bytes, which is Unicode code point order) at every depth. Array
//! order is preserved: arrays are ordered data, objects are not.
//!
//! A peer sorting by UTF-16 code units (JavaScript's default `sort()`)
//! agrees on every key made of BMP characters. It disagrees only when keys
//! differ at a character outside the BMP compared against one in
//! U+E000..=U+FFFF; such peers must sort by code point to interoperate. We write it by hand rather than relying on
//! `serde_json::Map` ordering, which flips to insertion order the moment
//! anyone in the dependency graph enables `preserve_order`.

use serde_json::{Map, Value};

use super::types::Payload;
use crate::config::CANONICAL_SEPARATOR;
use crate::crypto::sha256_hex;

/// Serializes a JSON value with recursively sorted object keys.
///
/// # Example
///
/// ```
/// use nexus_bridge::message::canonical_json;
/// use serde_json::json;
///
/// let v = json!({"b": 1, "a": {"d": true, "c": null}});
/// assert_eq!(canonical_json(&v), r#"{"a":{"c":null,"d":true},"b":1}"#);
/// ```
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Canonical JSON of a `data` map.
pub fn canonical_data(data: &Map<String, Value>) -> String {
    let mut out = String::new();
    write_object(data, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
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
        // Scalars: serde_json's own compact encoding (escaping included).
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_object(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&map[key], out);
    }
    out.push('}');
}

/// Builds the exact string that gets signed for `payload` under `nonce`.
///
/// Never log or return this string: together with a signature it is a
/// known-plaintext pair for the shared secret.
pub fn canonical_string(payload: &Payload, nonce: &str) -> String {
    let sep = CANONICAL_SEPARATOR;
    format!(
        "{}{sep}{}{sep}{}{sep}{}{sep}{}",
        payload.transaction_id(),
        payload.direction().as_str(),
        payload.timestamp_str(),
        nonce,
        canonical_data(payload.data()),
    )
}

/// `SHA-256(sortedJSON(data))`, hex-encoded. The audit fingerprint of a
/// payload; independent of nonce and signature.
pub fn payload_hash(data: &Map<String, Value>) -> String {
    sha256_hex(canonical_data(data).as_bytes())
}
