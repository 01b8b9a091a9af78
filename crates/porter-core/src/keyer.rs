//! Idempotency keys
//!
//! An [`IdempotencyKey`] is a Blake3 digest over the canonical JSON encoding
//! of the tuple `[kind, source_id, parameters]`. Canonical encoding sorts
//! object keys bytewise and renders integral numbers without a fraction, so
//! the key is identical across processes, machines and map orderings.

use crate::types::ActionKind;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt::{self, Display, Formatter};
use std::fmt::Write as _;

const KEY_PREFIX: &str = "ik1_";
const DOMAIN: &[u8] = b"porter.idempotency.v1\0";

/// Deterministic fingerprint of an action
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Wrap a previously produced key string
    ///
    /// # Errors
    /// Returns error if the string is not a well-formed key
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        let hex_part = s
            .strip_prefix(KEY_PREFIX)
            .ok_or_else(|| KeyError::MissingPrefix(s.to_string()))?;
        let bytes = hex::decode(hex_part)?;
        if bytes.len() != 32 {
            return Err(KeyError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Key as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines (prefix plus 12 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> &str {
        let end = (KEY_PREFIX.len() + 12).min(self.0.len());
        &self.0[..end]
    }
}

impl Display for IdempotencyKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from parsing idempotency keys
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key {0:?} is missing the ik1_ prefix")]
    MissingPrefix(String),

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid digest length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Derives idempotency keys
///
/// Stateless; exists as a type so callers can name the seam.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdempotencyKeyer;

impl IdempotencyKeyer {
    /// Create a new keyer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Derive the key for `(kind, source_id, parameters)`
    #[must_use]
    pub fn key(&self, kind: ActionKind, source_id: &str, parameters: &Value) -> IdempotencyKey {
        let tuple = Value::Array(vec![
            Value::String(kind.as_str().to_string()),
            Value::String(source_id.to_string()),
            parameters.clone(),
        ]);
        let canonical = canonical_json(&tuple);

        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN);
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();

        IdempotencyKey(format!("{KEY_PREFIX}{}", hex::encode(digest.as_bytes())))
    }
}

/// Digest of arbitrary canonicalized JSON (hex)
#[must_use]
pub fn canonical_digest(value: &Value) -> String {
    let canonical = canonical_json(value);
    hex::encode(blake3::hash(canonical.as_bytes()).as_bytes())
}

/// Render a JSON value in canonical form
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
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
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(k, out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
    }
}

/// Integral values print as integers regardless of how they were parsed
/// (`1`, `1.0` and `1e0` are the same key input).
fn write_number(n: &Number, out: &mut String) {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(out, "{u}");
    } else if let Some(f) = n.as_f64() {
        // 2^53: beyond this f64 cannot represent every integer exactly
        if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
            #[allow(clippy::cast_possible_truncation)]
            let _ = write!(out, "{}", f as i64);
        } else {
            let _ = write!(out, "{n}");
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => out.push_str("\"\""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_deterministic() {
        let keyer = IdempotencyKeyer::new();
        let params = json!({"name": "bug", "color": "d73a4a"});
        let k1 = keyer.key(ActionKind::LabelCreate, "bug", &params);
        let k2 = keyer.key(ActionKind::LabelCreate, "bug", &params);
        assert_eq!(k1, k2);
    }

    #[test]
    fn key_ignores_object_key_order() {
        let keyer = IdempotencyKeyer::new();
        let a: Value = serde_json::from_str(r#"{"a":1,"b":{"y":2,"x":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":{"x":3,"y":2},"a":1}"#).unwrap();
        assert_eq!(
            keyer.key(ActionKind::IssueCreate, "1", &a),
            keyer.key(ActionKind::IssueCreate, "1", &b)
        );
    }

    #[test]
    fn key_normalizes_integral_floats() {
        let keyer = IdempotencyKeyer::new();
        let a: Value = serde_json::from_str(r#"{"n":1}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"n":1.0}"#).unwrap();
        assert_eq!(
            keyer.key(ActionKind::IssueCreate, "1", &a),
            keyer.key(ActionKind::IssueCreate, "1", &b)
        );
    }

    #[test]
    fn key_distinguishes_tuple_members() {
        let keyer = IdempotencyKeyer::new();
        let params = json!({});
        let base = keyer.key(ActionKind::LabelCreate, "a", &params);
        assert_ne!(base, keyer.key(ActionKind::MilestoneCreate, "a", &params));
        assert_ne!(base, keyer.key(ActionKind::LabelCreate, "b", &params));
        assert_ne!(base, keyer.key(ActionKind::LabelCreate, "a", &json!({"x": 1})));
    }

    #[test]
    fn concatenation_ambiguity_does_not_collide() {
        let keyer = IdempotencyKeyer::new();
        let params = json!({});
        assert_ne!(
            keyer.key(ActionKind::LabelCreate, "ab", &json!({"c": ""})),
            keyer.key(ActionKind::LabelCreate, "a", &json!({"bc": ""}))
        );
        assert_ne!(
            keyer.key(ActionKind::LabelCreate, "a\",\"b", &params),
            keyer.key(ActionKind::LabelCreate, "a", &params)
        );
    }

    #[test]
    fn canonical_form_sorts_keys() {
        let v: Value = serde_json::from_str(r#"{"z":[1,{"b":true,"a":null}],"m":"x"}"#).unwrap();
        assert_eq!(canonical_json(&v), r#"{"m":"x","z":[1,{"a":null,"b":true}]}"#);
    }

    #[test]
    fn parse_round_trip() {
        let key = IdempotencyKeyer::new().key(ActionKind::WikiPush, "wiki", &json!({}));
        let parsed = IdempotencyKey::parse(key.as_str()).unwrap();
        assert_eq!(parsed, key);
        assert!(IdempotencyKey::parse("nope").is_err());
        assert!(IdempotencyKey::parse("ik1_abcd").is_err());
        assert_eq!(key.short().len(), KEY_PREFIX.len() + 12);
    }
}
