//! Field registry and queries.

use super::fields::{encode_identity, FieldKind, FieldType};
use crate::types::{Entry, Timestamp};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const FROM_DATE: &str = "fromDate";
pub const TO_DATE: &str = "toDate";
pub const LIMIT: &str = "limit";

/// A consumer query: time bounds, optional result cap and named filters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    /// Oldest time of interest (inclusive).
    pub from_date: Option<Timestamp>,

    /// Newest time of interest.
    pub to_date: Option<Timestamp>,

    /// Result cap. A query with a limit is served from a one-off fetch
    /// instead of the contiguous timeline.
    pub limit: Option<usize>,

    /// Caller-defined filter values by field name.
    pub filters: BTreeMap<String, Value>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_date(mut self, from: Timestamp) -> Self {
        self.from_date = Some(from);
        self
    }

    pub fn to_date(mut self, to: Timestamp) -> Self {
        self.to_date = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.filters.insert(name.into(), value);
        self
    }

    /// True when the query carries a result cap.
    pub fn is_limited(&self) -> bool {
        self.limit.is_some()
    }

    /// Value of a named field, if the query sets it.
    pub fn value(&self, name: &str) -> Option<Value> {
        match name {
            FROM_DATE => self.from_date.map(|t| Value::from(t.0)),
            TO_DATE => self.to_date.map(|t| Value::from(t.0)),
            LIMIT => self.limit.map(Value::from),
            other => self.filters.get(other).cloned(),
        }
    }
}

/// How a named field is read and typed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldSpec {
    /// Registered type name; defaults to the field name.
    pub kind: Option<String>,

    /// Entry field read by the predicate; defaults to the field name.
    pub key: Option<String>,
}

impl FieldSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Ordered set of fields plus the type table they resolve against.
#[derive(Clone, Debug)]
pub struct FieldRegistry {
    fields: Vec<(String, FieldSpec)>,
    types: HashMap<String, FieldType>,
}

impl FieldRegistry {
    /// Registry with the built-in types and the `fromDate`, `toDate` and
    /// `limit` fields.
    pub fn new(default_limit: usize) -> Self {
        let types = HashMap::from([
            ("enumeration".to_string(), FieldType::Enumeration),
            ("tags".to_string(), FieldType::Tags),
            ("string".to_string(), FieldType::String),
            (FROM_DATE.to_string(), FieldType::FromDate),
            (TO_DATE.to_string(), FieldType::ToDate),
            (
                LIMIT.to_string(),
                FieldType::Limit {
                    default: default_limit,
                },
            ),
        ]);

        Self {
            fields: vec![
                (FROM_DATE.to_string(), FieldSpec::new()),
                (TO_DATE.to_string(), FieldSpec::new()),
                (LIMIT.to_string(), FieldSpec::new()),
            ],
            types,
        }
    }

    /// Add a field, or replace the spec of an existing one.
    pub fn register_field(&mut self, name: impl Into<String>, spec: FieldSpec) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = spec,
            None => self.fields.push((name, spec)),
        }
    }

    /// Add a caller-defined type.
    pub fn register_type(&mut self, name: impl Into<String>, kind: Arc<dyn FieldKind>) {
        self.types.insert(name.into(), FieldType::Custom(kind));
    }

    /// Registered field names, in encoding order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    fn resolve(&self, name: &str, spec: &FieldSpec) -> Option<&FieldType> {
        self.types.get(spec.kind.as_deref().unwrap_or(name))
    }

    /// Encode every set field of `query` into a query string.
    ///
    /// The string doubles as the identity of a query in the cache.
    pub fn encode(&self, query: &Query) -> String {
        self.fields
            .iter()
            .filter_map(|(name, spec)| {
                let value = query.value(name)?;
                match self.resolve(name, spec) {
                    Some(kind) => kind.encode(name, &value),
                    None => encode_identity(name, &value),
                }
            })
            .filter(|fragment| !fragment.is_empty())
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Whether `entry` passes every registered field of `query`.
    pub fn matches(&self, entry: &Entry, query: &Query) -> bool {
        self.fields.iter().all(|(name, spec)| {
            // Unregistered types never reject.
            let Some(kind) = self.resolve(name, spec) else {
                return true;
            };
            let filter = query.value(name).unwrap_or_else(|| kind.default_value());
            let field = entry.get(spec.key.as_deref().unwrap_or(name));
            kind.matches(field, &filter, entry)
        })
    }

    /// Entries passing `query`, in input order.
    pub fn filter<'a>(&self, entries: impl IntoIterator<Item = &'a Entry>, query: &Query) -> Vec<Entry> {
        entries
            .into_iter()
            .filter(|entry| self.matches(entry, query))
            .cloned()
            .collect()
    }
}
