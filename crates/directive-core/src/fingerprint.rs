//! Request fingerprinting: SHA-256 over a canonical JSON serialization.
//!
//! Canonical form: object keys sorted at every depth, no insignificant whitespace, strings
//! escaped as serde_json escapes them. Two payloads that differ only in key order hash the same;
//! payloads carrying timestamps or nonces must have them stripped by the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 digest identifying a canonical request. Correction store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps an existing hex digest (e.g. one received from an operator for `correct`).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprints a raw request payload.
pub fn fingerprint(payload: &Value) -> Fingerprint {
    let canonical = canonical_json(payload);
    let digest = Sha256::digest(canonical.as_bytes());
    Fingerprint(hex::encode(digest))
}

/// Canonical serialization used as hash input.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(item, out);
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
        Value::String(s) => write_string(s, out),
        // null, bool and number have a single compact rendering.
        other => out.push_str(&other.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_string()).to_string());
}
