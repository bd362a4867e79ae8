//! Field types: default value, request encoding and in-memory predicate.

use crate::types::{Entry, Timestamp};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Behaviour of a caller-defined field type.
///
/// `encode` is optional: a kind that does not encode is only filtered locally
/// and never sent to the remote source.
pub trait FieldKind: Send + Sync {
    /// Filter value used when a query omits the field.
    fn default_value(&self) -> Value;

    /// Query-string fragment for `value`, or `None` to send nothing.
    fn encode(&self, _name: &str, _value: &Value) -> Option<String> {
        None
    }

    /// Whether `entry` (whose field holds `field`) passes `filter`.
    fn matches(&self, field: Option<&Value>, filter: &Value, entry: &Entry) -> bool;
}

/// Registered field type.
#[derive(Clone)]
pub enum FieldType {
    /// Single key picked from a selection map `{key: bool}`.
    Enumeration,

    /// Every selected tag must be present on the entry.
    Tags,

    /// Substring match.
    String,

    /// Inclusive lower bound on the entry time.
    FromDate,

    /// Inclusive upper bound on the entry time.
    ToDate,

    /// Result cap; never filters.
    Limit { default: usize },

    /// Caller-registered behaviour.
    Custom(Arc<dyn FieldKind>),
}

impl fmt::Debug for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Enumeration => write!(f, "Enumeration"),
            FieldType::Tags => write!(f, "Tags"),
            FieldType::String => write!(f, "String"),
            FieldType::FromDate => write!(f, "FromDate"),
            FieldType::ToDate => write!(f, "ToDate"),
            FieldType::Limit { default } => write!(f, "Limit({})", default),
            FieldType::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl FieldType {
    pub fn default_value(&self) -> Value {
        match self {
            FieldType::Enumeration | FieldType::Tags => Value::Object(Default::default()),
            FieldType::String => Value::String(String::new()),
            FieldType::FromDate | FieldType::ToDate => Value::Null,
            FieldType::Limit { default } => Value::from(*default),
            FieldType::Custom(kind) => kind.default_value(),
        }
    }

    pub fn encode(&self, name: &str, value: &Value) -> Option<String> {
        match self {
            FieldType::Enumeration => {
                let keys = selected_keys(value);
                if keys.is_empty() {
                    return None;
                }
                let joined: Vec<String> = keys.iter().map(|k| form_encode(k)).collect();
                Some(format!("{}={}", name, joined.join(",")))
            }
            FieldType::Tags => {
                let keys = selected_keys(value);
                if keys.is_empty() {
                    return None;
                }
                let pairs: Vec<String> = keys
                    .iter()
                    .map(|k| format!("{}=True", form_encode(k)))
                    .collect();
                Some(pairs.join("&"))
            }
            FieldType::String => match value.as_str() {
                Some(s) if !s.is_empty() => Some(format!("{}={}", name, form_encode(s))),
                _ => None,
            },
            FieldType::FromDate => {
                Timestamp::from_value(value).map(|t| format!("{}={}", name, t.secs_floor()))
            }
            FieldType::ToDate => {
                Timestamp::from_value(value).map(|t| format!("{}={}", name, t.secs_ceil()))
            }
            FieldType::Limit { .. } => value.as_u64().map(|n| format!("{}={}", name, n)),
            FieldType::Custom(kind) => kind.encode(name, value),
        }
    }

    pub fn matches(&self, field: Option<&Value>, filter: &Value, entry: &Entry) -> bool {
        match self {
            FieldType::Enumeration => {
                if no_selection(filter) {
                    return true;
                }
                field
                    .and_then(value_key)
                    .is_some_and(|key| is_selected(filter, &key))
            }
            // Presence only: the tag's value on the entry is not compared.
            FieldType::Tags => {
                no_selection(filter)
                    || selected_keys(filter)
                        .iter()
                        .all(|tag| entry.get(tag).is_some())
            }
            FieldType::String => {
                let needle = filter.as_str().unwrap_or_default();
                if needle.is_empty() {
                    return true;
                }
                match field {
                    Some(Value::String(s)) => s.contains(needle),
                    Some(Value::Null) | None => false,
                    Some(other) => other.to_string().contains(needle),
                }
            }
            FieldType::FromDate => {
                Timestamp::from_value(filter).map_or(true, |bound| entry.time() >= bound)
            }
            FieldType::ToDate => {
                Timestamp::from_value(filter).map_or(true, |bound| entry.time() <= bound)
            }
            FieldType::Limit { .. } => true,
            FieldType::Custom(kind) => kind.matches(field, filter, entry),
        }
    }
}

/// Encoding for fields whose type is not registered: `name=value`.
pub(crate) fn encode_identity(name: &str, value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(format!("{}={}", name, form_encode(s))),
        other => Some(format!("{}={}", name, form_encode(&other.to_string()))),
    }
}

/// JavaScript-style truthiness of a filter value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Keys a selection value marks as active.
///
/// Objects select the keys mapped to a truthy value; arrays select every
/// string item (or the `label` of object items); a bare string selects itself.
pub fn selected_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| is_truthy(v))
            .map(|(k, _)| k.clone())
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(obj) => obj.get("label").and_then(value_key),
                other => value_key(other),
            })
            .collect(),
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn no_selection(filter: &Value) -> bool {
    selected_keys(filter).is_empty()
}

fn is_selected(filter: &Value, key: &str) -> bool {
    match filter {
        Value::Object(map) => map.get(key).is_some_and(is_truthy),
        other => selected_keys(other).iter().any(|k| k == key),
    }
}

fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
