//! Webhook payload signing.
//!
//! The crypto processor signs IPN callbacks with HMAC-SHA512 over the JSON
//! payload serialized with all object keys sorted alphabetically at every
//! nesting level. The same canonical form is used when verifying inbound
//! webhooks and when producing signatures for the testing endpoint.

use crate::payments::error::{PaymentError, PaymentResult};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value as JsonValue};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Rebuild `value` with object keys in ascending order at every depth.
/// Arrays keep their element order; primitives pass through untouched.
fn sort_keys(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Compact serialization of the key-sorted payload.
pub fn canonical_json(value: &JsonValue) -> String {
    sort_keys(value).to_string()
}

/// HMAC-SHA512 hex signature over the canonical form of `value`.
pub fn sign_payload(value: &JsonValue, secret: &str) -> PaymentResult<String> {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).map_err(|_| PaymentError::Internal {
            message: "invalid webhook signing key".to_string(),
        })?;
    mac.update(canonical_json(value).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify `signature` against the canonical form of the raw JSON `payload`.
/// Malformed JSON fails closed. The computed digest never leaves this
/// function.
pub fn verify_signature(payload: &[u8], secret: &str, signature: &str) -> bool {
    let parsed: JsonValue = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let computed = match sign_payload(&parsed, secret) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
