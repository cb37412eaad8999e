//! Reconstructing structured configuration from flat key/value pairs.
//!
//! The target's own serde implementation acts as its schema. Decoding
//! serializes the target to get its current shape, merges the pairs into
//! that tree and deserializes the result back:
//!
//! - leaves the target already has a type for (bool, integer, float, string)
//!   are parsed as that type, and a parse failure names the offending key;
//! - leaves whose type is unknown at this point (inside an empty `Vec`, a
//!   `None` option or a map) are kept as text and coerced by the `config`
//!   crate's lenient deserializer;
//! - fields the pairs don't mention keep their value, so a single changed
//!   key only touches one leaf;
//! - keys the target type doesn't declare are ignored, even when they
//!   disagree with each other about their shape;
//! - an index past the end of a sequence pads the gap with zero values shaped
//!   like the other elements.
//!
//! On error the target is left untouched.

use super::flatten::stringify;
use super::path::{self, KEY_DELIMITER};
use crate::error::{ConfigError, Result};
use crate::store::KvPair;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Largest sequence index a key may address.
const MAX_SEQUENCE_INDEX: usize = u16::MAX as usize;

/// Decode `pairs` found below `prefix` onto `target`.
///
/// Pairs outside `prefix` are skipped. The merge is all-or-nothing: when any
/// pair fails to decode, `target` keeps its previous value.
///
/// # Errors
///
/// - [`ConfigError::Decode`] when a value cannot be parsed as the type the
///   target declares at that key (including integers out of range for the
///   declared width), or a key descends through a declared scalar
/// - [`ConfigError::Deserialization`] when the merged tree doesn't fit the
///   target type for a reason that can't be tied to a key
///
/// # Examples
///
/// ```rust
/// use keeper_config::codec::decode;
/// use keeper_config::store::KvPair;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// struct Writable {
///     port: u16,
///     log_level: String,
/// }
///
/// let mut target = Writable { port: 80, log_level: "INFO".into() };
/// decode("svc", &[KvPair::new("svc/port", "8080")], &mut target).unwrap();
/// assert_eq!(target.port, 8080);
/// assert_eq!(target.log_level, "INFO");
/// ```
pub fn decode<T>(prefix: &str, pairs: &[KvPair], target: &mut T) -> Result<()>
where
    T: Serialize + DeserializeOwned,
{
    let mut tree = serde_json::to_value(&*target)?;
    merge_pairs(prefix, pairs, &mut tree, KEY_DELIMITER)?;
    *target = from_tree(prefix, tree)?;
    Ok(())
}

/// Merge `pairs` into a dynamically typed tree.
///
/// Same rules as [`decode`], except that every key is kept since a bare
/// value has no declared fields to filter on.
pub fn decode_value(prefix: &str, pairs: &[KvPair], target: &mut Value) -> Result<()> {
    decode_value_with_delimiter(prefix, pairs, target, KEY_DELIMITER)
}

/// Like [`decode_value`], with a custom delimiter.
pub fn decode_value_with_delimiter(
    prefix: &str,
    pairs: &[KvPair],
    target: &mut Value,
    delimiter: &str,
) -> Result<()> {
    let mut tree = target.clone();
    merge_pairs(prefix, pairs, &mut tree, delimiter)?;
    *target = tree;
    Ok(())
}

/// Whether a node is part of the target's serialized shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Declared,
    /// Below a field the target doesn't have (or a new map entry).
    Undeclared,
}

/// A sequence slot padded because a later index was addressed first.
struct Gap {
    key: String,
    region: Region,
}

/// Bookkeeping for one merge, keyed by JSON pointer.
#[derive(Default)]
struct MergeState {
    /// Padded sequence slots.
    gaps: BTreeMap<String, Gap>,
    /// Object entries the merge inserted.
    created: BTreeSet<String>,
}

enum Descent<'a> {
    Into(&'a mut Value, Region),
    Skip,
}

fn merge_pairs(prefix: &str, pairs: &[KvPair], tree: &mut Value, delimiter: &str) -> Result<()> {
    let mut state = MergeState::default();
    for pair in pairs {
        let Some(segments) = path::relative_segments(prefix, &pair.key, delimiter) else {
            tracing::debug!(key = %pair.key, prefix, "skipping pair outside prefix");
            continue;
        };
        merge_pair(tree, &segments, &pair.value, &pair.key, &mut state)?;
    }
    fill_gaps(tree, state.gaps)
}

fn merge_pair(
    root: &mut Value,
    segments: &[&str],
    incoming: &Value,
    key: &str,
    state: &mut MergeState,
) -> Result<()> {
    // a key equal to the prefix addresses no field
    if segments.is_empty() {
        return Ok(());
    }

    let mut node = root;
    let mut region = Region::Declared;
    let mut pointer = String::new();
    for segment in segments {
        match child_mut(node, segment, key, region, &mut pointer, state)? {
            Descent::Into(child, child_region) => {
                node = child;
                region = child_region;
            }
            Descent::Skip => {
                tracing::debug!(key, "skipping key the target doesn't declare");
                return Ok(());
            }
        }
    }

    match coerce(node, incoming, key) {
        Ok(value) => *node = value,
        Err(_) if region == Region::Undeclared => {
            tracing::debug!(key, "skipping key the target doesn't declare");
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

/// Descend one segment, creating containers where the shape is still unknown.
///
/// `pointer` is extended with the child's position.
fn child_mut<'a>(
    node: &'a mut Value,
    segment: &str,
    key: &str,
    region: Region,
    pointer: &mut String,
    state: &mut MergeState,
) -> Result<Descent<'a>> {
    if node.is_null() {
        *node = match segment.parse::<usize>() {
            Ok(_) => Value::Array(Vec::new()),
            Err(_) => Value::Object(Map::new()),
        };
    }

    match node {
        Value::Object(fields) => {
            pointer.push('/');
            pointer.push_str(&segment.replace('~', "~0").replace('/', "~1"));
            let region = if !fields.contains_key(segment) {
                state.created.insert(pointer.clone());
                Region::Undeclared
            } else if state.created.contains(pointer.as_str()) {
                Region::Undeclared
            } else {
                region
            };
            Ok(Descent::Into(
                fields.entry(segment).or_insert(Value::Null),
                region,
            ))
        }
        Value::Array(items) => {
            let Some(index) = segment
                .parse::<usize>()
                .ok()
                .filter(|index| *index <= MAX_SEQUENCE_INDEX)
            else {
                return conflict(region, key, "sequence index");
            };
            for gap in items.len()..index {
                state.gaps.insert(
                    format!("{}/{}", pointer, gap),
                    Gap {
                        key: key.to_string(),
                        region,
                    },
                );
            }
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            pointer.push('/');
            pointer.push_str(&index.to_string());
            Ok(Descent::Into(&mut items[index], region))
        }
        scalar => conflict(region, key, type_name(scalar)),
    }
}

/// A shape conflict is an error inside the target's shape and a skip outside it.
fn conflict<'a>(region: Region, key: &str, expected: &str) -> Result<Descent<'a>> {
    match region {
        Region::Declared => Err(ConfigError::decode(key, expected)),
        Region::Undeclared => Ok(Descent::Skip),
    }
}

/// Give padded slots nothing filled the zero value of a sibling's shape.
fn fill_gaps(tree: &mut Value, gaps: BTreeMap<String, Gap>) -> Result<()> {
    for (pointer, gap) in gaps {
        let Some((parent, _)) = pointer.rsplit_once('/') else {
            continue;
        };
        let template = tree
            .pointer(parent)
            .and_then(Value::as_array)
            .and_then(|items| items.iter().find(|item| !item.is_null()))
            .map(zeroed);

        let Some(slot) = tree.pointer_mut(&pointer) else {
            continue;
        };
        if !slot.is_null() {
            continue;
        }
        match template {
            Some(value) => *slot = value,
            None if gap.region == Region::Declared => {
                return Err(ConfigError::decode(gap.key, "contiguous sequence index"));
            }
            None => {}
        }
    }
    Ok(())
}

fn zeroed(template: &Value) -> Value {
    match template {
        Value::Null => Value::Null,
        Value::Bool(_) => Value::Bool(false),
        Value::Number(n) if n.is_f64() => Value::from(0.0),
        Value::Number(_) => Value::from(0),
        Value::String(_) => Value::String(String::new()),
        Value::Array(_) => Value::Array(Vec::new()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), zeroed(value)))
                .collect(),
        ),
    }
}

/// Convert `incoming` to the type `existing` declares.
fn coerce(existing: &Value, incoming: &Value, key: &str) -> Result<Value> {
    match existing {
        Value::Null => Ok(match incoming {
            Value::String(s) if s.is_empty() => Value::Null,
            other => other.clone(),
        }),
        Value::Bool(_) => parse_bool(incoming).ok_or_else(|| ConfigError::decode(key, "boolean")),
        Value::Number(n) if n.is_f64() => {
            parse_float(incoming).ok_or_else(|| ConfigError::decode(key, "floating-point number"))
        }
        Value::Number(_) => parse_integer(incoming).ok_or_else(|| ConfigError::decode(key, "integer")),
        Value::String(_) => Ok(Value::String(stringify(incoming))),
        container => Err(ConfigError::decode(key, type_name(container))),
    }
}

fn parse_bool(value: &Value) -> Option<Value> {
    if let Value::Bool(b) = value {
        return Some(Value::Bool(*b));
    }
    let text = stringify(value);
    match text.trim() {
        t if t.eq_ignore_ascii_case("true") || t == "1" => Some(Value::Bool(true)),
        t if t.eq_ignore_ascii_case("false") || t == "0" => Some(Value::Bool(false)),
        _ => None,
    }
}

fn parse_integer(value: &Value) -> Option<Value> {
    if let Value::Number(n) = value {
        if n.is_i64() || n.is_u64() {
            return Some(value.clone());
        }
    }
    let text = stringify(value);
    let text = text.trim();
    text.parse::<i64>()
        .map(Value::from)
        .or_else(|_| text.parse::<u64>().map(Value::from))
        .ok()
}

fn parse_float(value: &Value) -> Option<Value> {
    let float = match value {
        Value::Number(n) => n.as_f64()?,
        other => stringify(other).trim().parse::<f64>().ok()?,
    };
    Number::from_f64(float).map(Value::Number)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "floating-point number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "object",
    }
}

fn from_tree<T: DeserializeOwned>(prefix: &str, tree: Value) -> Result<T> {
    json_value_to_config_value(tree)
        .try_deserialize::<T>()
        .map_err(|e| match e {
            config::ConfigError::Type {
                key: Some(key),
                expected,
                ..
            } => ConfigError::decode(store_key(prefix, &key), expected),
            other => ConfigError::Deserialization(other.to_string()),
        })
}

/// Turn a `config` key such as `hosts[0].name` into a store key below `prefix`.
fn store_key(prefix: &str, key: &str) -> String {
    let relative: String = key
        .chars()
        .filter(|c| *c != ']')
        .map(|c| if c == '.' || c == '[' { '/' } else { c })
        .collect();
    path::join(prefix, relative.trim_start_matches('/'), KEY_DELIMITER)
}

/// Convert a serde_json::Value to a config::Value.
fn json_value_to_config_value(value: Value) -> config::Value {
    let kind = match value {
        Value::Null => config::ValueKind::Nil,
        Value::Bool(b) => config::ValueKind::Boolean(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                config::ValueKind::I64(i)
            } else if let Some(u) = n.as_u64() {
                config::ValueKind::U64(u)
            } else {
                config::ValueKind::Float(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => config::ValueKind::String(s),
        Value::Array(items) => config::ValueKind::Array(
            items.into_iter().map(json_value_to_config_value).collect(),
        ),
        Value::Object(fields) => {
            let mut table = HashMap::new();
            for (name, item) in fields {
                table.insert(name, json_value_to_config_value(item));
            }
            config::ValueKind::Table(table)
        }
    };
    config::Value::new(None, kind)
}
