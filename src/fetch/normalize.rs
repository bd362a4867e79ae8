//! Raw record normalization.

use crate::error::Result;
use crate::types::Entry;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Caller transform: `(record, index, batch, streamed) -> record`.
pub type Transform = Arc<dyn Fn(&Value, usize, &[Value], bool) -> Value + Send + Sync>;

/// Caller transform applied to push messages before [`Transform`].
pub type StreamTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Turns raw records into entries.
#[derive(Clone)]
pub struct Normalizer {
    time_field: String,
    transform: Option<Transform>,
    stream_transform: Option<StreamTransform>,
}

impl fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Normalizer")
            .field("time_field", &self.time_field)
            .field("transform", &self.transform.is_some())
            .field("stream_transform", &self.stream_transform.is_some())
            .finish()
    }
}

impl Normalizer {
    pub fn new(time_field: impl Into<String>) -> Self {
        Self {
            time_field: time_field.into(),
            transform: None,
            stream_transform: None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_stream_transform(mut self, transform: StreamTransform) -> Self {
        self.stream_transform = Some(transform);
        self
    }

    pub fn time_field(&self) -> &str {
        &self.time_field
    }

    /// Normalize a fetched batch. Records without a usable time are skipped.
    pub fn normalize(&self, batch: &[Value]) -> Vec<Entry> {
        batch
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| {
                let value = match &self.transform {
                    Some(transform) => transform(raw, index, batch, false),
                    None => raw.clone(),
                };
                match Entry::from_value(value, &self.time_field) {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!(index, ?err, "skipping fetched record");
                        None
                    }
                }
            })
            .collect()
    }

    /// Normalize one push message.
    pub fn normalize_message(&self, raw: &str) -> Result<Entry> {
        let mut value: Value = serde_json::from_str(raw)?;
        if let Some(stream_transform) = &self.stream_transform {
            value = stream_transform(value);
        }
        if let Some(transform) = &self.transform {
            let batch = [value];
            value = transform(&batch[0], 0, &batch, true);
        }
        Entry::from_value(value, &self.time_field)
    }
}
