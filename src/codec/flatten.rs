//! Flattening nested values into delimited key/value pairs.

use super::path::{self, KEY_DELIMITER};
use crate::error::Result;
use crate::store::KvPair;
use serde::Serialize;
use serde_json::Value;

/// Flatten `value` into one pair per leaf, keyed below `prefix`.
///
/// Objects contribute their field names as segments and sequences their
/// indices. Scalars are rendered with [`stringify`]. Empty objects and
/// sequences produce no pairs.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidKey`](crate::error::ConfigError::InvalidKey)
/// when a field name contains the key delimiter.
///
/// # Examples
///
/// ```rust
/// use keeper_config::codec::flatten;
/// use serde_json::json;
///
/// let pairs = flatten("svc", &json!({ "Writable": { "LogLevel": "INFO" }, "Ports": [80, 443] })).unwrap();
/// let keys: Vec<_> = pairs.iter().map(|p| p.key.as_str()).collect();
/// assert_eq!(keys, ["svc/Ports/0", "svc/Ports/1", "svc/Writable/LogLevel"]);
/// ```
pub fn flatten(prefix: &str, value: &Value) -> Result<Vec<KvPair>> {
    flatten_with_delimiter(prefix, value, KEY_DELIMITER)
}

/// Like [`flatten`], with a custom delimiter.
pub fn flatten_with_delimiter(prefix: &str, value: &Value, delimiter: &str) -> Result<Vec<KvPair>> {
    let mut pairs = Vec::new();
    flatten_into(prefix, value, delimiter, &mut pairs)?;
    Ok(pairs)
}

/// Serialize `value` and flatten the result below `prefix`.
pub fn flatten_serializable<S: Serialize + ?Sized>(prefix: &str, value: &S) -> Result<Vec<KvPair>> {
    let value = serde_json::to_value(value)?;
    flatten(prefix, &value)
}

fn flatten_into(prefix: &str, value: &Value, delimiter: &str, pairs: &mut Vec<KvPair>) -> Result<()> {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let key = path::join(prefix, &index.to_string(), delimiter);
                flatten_into(&key, item, delimiter, pairs)?;
            }
        }
        Value::Object(fields) => {
            for (name, item) in fields {
                path::validate_segment(name, delimiter)?;
                let key = path::join(prefix, name, delimiter);
                flatten_into(&key, item, delimiter, pairs)?;
            }
        }
        scalar => pairs.push(KvPair::new(prefix, Value::String(stringify(scalar)))),
    }
    Ok(())
}

/// Render a scalar the way the store expects it.
///
/// Booleans become `true`/`false`, integers are written without exponent,
/// floats use the shortest round-trippable form and `null` becomes the
/// empty string. Strings are returned as-is.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string())
            }
        }
        Value::String(s) => s.clone(),
        // containers only reach here when a caller stringifies them directly
        other => other.to_string(),
    }
}
