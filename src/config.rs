//! Cache configuration.

use crate::types::DEFAULT_TIME_FIELD;
use std::time::Duration;

/// Default page cap for a single remote request.
pub const DEFAULT_FETCH_LIMIT: usize = 20_000;

/// Default delay between two polls (and before retrying a failed one).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// How fresh entries reach the cache. The two modes are exclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestMode {
    /// Repeatedly fetch from the newest cached time to now.
    Polling { interval: Duration },

    /// Keep a push stream open and fold each message into the newest segment.
    Push,
}

impl Default for IngestMode {
    fn default() -> Self {
        IngestMode::Polling {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Cache configuration.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Entry field holding the ordering time.
    pub time_field: String,

    /// Page cap sent with every timeline fetch.
    /// A response this long is treated as truncated.
    pub fetch_limit: usize,

    /// Entries kept in the newest segment once nothing demands it.
    pub max_entries: usize,

    /// Ingestion mode.
    pub ingest: IngestMode,

    /// Capacity of channel-based subscriptions before the subscriber is dropped.
    pub subscriber_buffer: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            time_field: DEFAULT_TIME_FIELD.to_string(),
            fetch_limit: DEFAULT_FETCH_LIMIT,
            max_entries: DEFAULT_FETCH_LIMIT,
            ingest: IngestMode::default(),
            subscriber_buffer: 16,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry time field.
    pub fn with_time_field(mut self, field: impl Into<String>) -> Self {
        self.time_field = field.into();
        self
    }

    /// Set the per-request page cap.
    pub fn with_fetch_limit(mut self, limit: usize) -> Self {
        self.fetch_limit = limit.max(1);
        self
    }

    /// Set the retention cap of the newest segment.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }

    /// Poll every `interval`.
    pub fn with_polling(mut self, interval: Duration) -> Self {
        self.ingest = IngestMode::Polling { interval };
        self
    }

    /// Ingest from the transport's push stream.
    pub fn with_push(mut self) -> Self {
        self.ingest = IngestMode::Push;
        self
    }

    /// Set the buffer of channel subscriptions.
    pub fn with_subscriber_buffer(mut self, size: usize) -> Self {
        self.subscriber_buffer = size.max(1);
        self
    }
}
