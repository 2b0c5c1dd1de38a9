//! Canonical entity bytes.
//!
//! Entity ids hash these bytes, so an object must serialize identically no
//! matter how it was built: compact output, object keys in lexicographic
//! order at every depth, arrays in their given order. Scalars use the plain
//! `serde_json` rendering.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Canonical string form of `value`.
///
/// ```
/// use serde_json::json;
/// use evees_core::cas::canonical::canonicalize_json;
///
/// let node = json!({"type": "Paragraph", "text": "hi", "links": ["b", "a"]});
/// assert_eq!(
///     canonicalize_json(&node),
///     r#"{"links":["b","a"],"text":"hi","type":"Paragraph"}"#
/// );
/// ```
#[must_use]
pub fn canonicalize_json(value: &Value) -> String {
    let mut out = String::new();
    push_value(value, &mut out);
    out
}

/// Canonical string form of any serializable value.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String> {
    Ok(canonicalize_json(&serde_json::to_value(value)?))
}

fn push_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (n, key) in keys.into_iter().enumerate() {
                if n != 0 {
                    out.push(',');
                }
                push_str(key, out);
                out.push(':');
                push_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (n, item) in items.iter().enumerate() {
                if n != 0 {
                    out.push(',');
                }
                push_value(item, out);
            }
            out.push(']');
        }
        Value::String(text) => push_str(text, out),
        other => out.push_str(&other.to_string()),
    }
}

fn push_str(text: &str, out: &mut String) {
    // Display on a string Value emits it quoted and escaped
    out.push_str(&Value::from(text).to_string());
}
