//! Core types for the log cache.

use crate::error::{CacheError, Result};
use chrono::DateTime;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Magnitude of the unbounded sentinels, in milliseconds.
pub const END_TIMES: i64 = 8_640_000_000_000_000;

/// Default name of the entry field holding its time.
pub const DEFAULT_TIME_FIELD: &str = "timestamp";

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Lower sentinel, standing for "unbounded in the past".
    pub const MIN: Timestamp = Timestamp(-END_TIMES);

    /// Upper sentinel, standing for "unbounded in the future".
    pub const MAX: Timestamp = Timestamp(END_TIMES);

    /// The next representable instant.
    pub fn next(self) -> Self {
        Timestamp(self.0.saturating_add(1))
    }

    /// True unless this is one of the sentinels.
    pub fn is_bounded(self) -> bool {
        self > Self::MIN && self < Self::MAX
    }

    /// Whole seconds, rounded down.
    pub fn secs_floor(self) -> i64 {
        self.0.div_euclid(1000)
    }

    /// Whole seconds, rounded up.
    pub fn secs_ceil(self) -> i64 {
        -(-self.0).div_euclid(1000)
    }

    /// Parse a time value: integer or float milliseconds, or an RFC 3339 string.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .map(Timestamp),
            Value::String(s) => s
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    DateTime::parse_from_rfc3339(s)
                        .ok()
                        .map(|dt| dt.timestamp_millis())
                })
                .map(Timestamp),
            _ => None,
        }
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MIN => write!(f, "-inf"),
            Self::MAX => write!(f, "+inf"),
            Timestamp(ms) => write!(f, "{}", ms),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(ms: i64) -> Self {
        Timestamp(ms)
    }
}

/// Half-open time range `[low, high)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalKey {
    pub low: Timestamp,
    pub high: Timestamp,
}

impl IntervalKey {
    /// The whole timeline, `[-inf, +inf)`.
    pub const WHOLE: IntervalKey = IntervalKey {
        low: Timestamp::MIN,
        high: Timestamp::MAX,
    };

    pub fn new(low: Timestamp, high: Timestamp) -> Self {
        Self { low, high }
    }

    /// Build a key from raw millisecond bounds.
    pub fn millis(low: i64, high: i64) -> Self {
        Self::new(Timestamp(low), Timestamp(high))
    }

    /// True when the range holds no instant.
    pub fn is_empty(&self) -> bool {
        self.low >= self.high
    }

    pub fn contains(&self, time: Timestamp) -> bool {
        self.low <= time && time < self.high
    }

    /// Ranges share at least one instant.
    pub fn overlaps(&self, other: &IntervalKey) -> bool {
        self.low < other.high && other.low < self.high
    }

    /// Ranges overlap or meet end to end.
    pub fn touches(&self, other: &IntervalKey) -> bool {
        self.low <= other.high && other.low <= self.high
    }
}

impl fmt::Debug for IntervalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}, {:?})", self.low, self.high)
    }
}

/// A single log entry: a JSON object plus its extracted time.
///
/// Two entries are equal when their time and every field are equal.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    time: Timestamp,
    fields: Map<String, Value>,
}

impl Entry {
    /// Build an entry from a JSON object, reading its time from `time_field`.
    pub fn from_value(value: Value, time_field: &str) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(CacheError::NotAnObject);
        };

        let raw = fields
            .get(time_field)
            .ok_or_else(|| CacheError::MissingTimeField(time_field.to_string()))?;

        let time = Timestamp::from_value(raw).ok_or_else(|| CacheError::InvalidTime {
            field: time_field.to_string(),
            value: raw.to_string(),
        })?;

        Ok(Self { time, fields })
    }

    /// Build an entry with an explicit time.
    pub fn new(time: Timestamp, fields: Map<String, Value>) -> Self {
        Self { time, fields }
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// Look up a field of the underlying record.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Give back the underlying record.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}
