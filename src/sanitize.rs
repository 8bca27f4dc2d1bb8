//! Sanitize structured data written to a container's `data` attribute.
//!
//! Top-level keys starting with `__` are framework metadata injected by the
//! host's own tooling and are stripped before the payload is forwarded to
//! the child. Nested `__proto__` keys are rejected outright since payloads
//! are rebuilt as plain objects inside the script engine.

use crate::error::{HostError, Result};
use serde_json::{Map, Value};

/// Maximum recursion depth for nested objects/arrays
const MAX_DEPTH: usize = 32;

/// Keys that could be used for prototype pollution
const DANGEROUS_KEYS: &[&str] = &["__proto__"];

/// Clean a payload destined for a child application.
///
/// # Errors
/// Returns an error if:
/// - The payload is not an object
/// - A dangerous key is found below the top level
/// - Nesting depth exceeds MAX_DEPTH (32)
pub fn sanitize_data(value: Value) -> Result<Map<String, Value>> {
    let Value::Object(map) = value else {
        return Err(HostError::InvalidData(format!(
            "expected an object, got {}",
            type_name(&value)
        )));
    };

    let mut cleaned = Map::new();
    for (key, val) in map {
        if key.starts_with("__") {
            continue;
        }
        cleaned.insert(key, sanitize_recursive(val, 1)?);
    }
    Ok(cleaned)
}

fn sanitize_recursive(value: Value, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(HostError::InvalidData(format!(
            "nesting too deep (max {} levels)",
            MAX_DEPTH
        )));
    }

    match value {
        Value::Object(map) => {
            if let Some(key) = map.keys().find(|key| DANGEROUS_KEYS.contains(&key.as_str())) {
                return Err(HostError::InvalidData(format!("'{}' key is forbidden", key)));
            }

            let mut sanitized = Map::new();
            for (key, val) in map {
                sanitized.insert(key, sanitize_recursive(val, depth + 1)?);
            }
            Ok(Value::Object(sanitized))
        }
        Value::Array(arr) => {
            let sanitized: Result<Vec<Value>> = arr
                .into_iter()
                .map(|v| sanitize_recursive(v, depth + 1))
                .collect();
            Ok(Value::Array(sanitized?))
        }
        other => Ok(other),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_object_passes() {
        let data = json!({
            "page": "home",
            "user": { "name": "Alice", "settings": { "theme": "dark" } },
            "items": [1, 2, {"nested": true}]
        });

        let result = sanitize_data(data.clone()).unwrap();
        assert_eq!(Value::Object(result), data);
    }

    #[test]
    fn test_strips_double_underscore_keys() {
        let data = json!({
            "__ob__": {"dep": 1},
            "__v_skip": true,
            "_private": 1,
            "visible": "yes"
        });

        let result = sanitize_data(data).unwrap();
        assert_eq!(Value::Object(result), json!({"_private": 1, "visible": "yes"}));
    }

    #[test]
    fn test_nested_double_underscore_keys_are_kept() {
        let data = json!({"outer": {"__meta": 1}});
        let result = sanitize_data(data.clone()).unwrap();
        assert_eq!(Value::Object(result), data);
    }

    #[test]
    fn test_rejects_nested_proto() {
        let data = json!({
            "items": [{"safe": true}, {"__proto__": {"polluted": true}}]
        });

        let err = sanitize_data(data).unwrap_err();
        assert!(err.to_string().contains("__proto__"));
    }

    #[test]
    fn test_rejects_non_objects() {
        for value in [json!("text"), json!([1, 2]), json!(null), json!(3)] {
            assert!(matches!(sanitize_data(value), Err(HostError::InvalidData(_))));
        }
    }

    #[test]
    fn test_depth_limit() {
        let mut value = json!({"leaf": true});
        for _ in 0..35 {
            value = json!({"nested": value});
        }

        let result = sanitize_data(value);
        assert!(result.unwrap_err().to_string().contains("too deep"));
    }
}
