//! Transport seam to the remote log source.

use crate::error::{CacheError, Result};
use crate::types::Timestamp;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

/// Raw push messages, one JSON document each.
pub type MessageStream = BoxStream<'static, String>;

/// One request for a range of entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    /// Oldest time requested, `None` when unbounded.
    pub from: Option<Timestamp>,

    /// End of the requested range, `None` when unbounded.
    pub to: Option<Timestamp>,

    /// Page cap. A response this long may have been cut short.
    pub limit: usize,

    /// Encoded query string (`fromDate=..&toDate=..&limit=..&...`).
    pub params: String,
}

/// Remote source of log entries.
///
/// Implementations perform the actual I/O; the cache only sees raw JSON
/// records and push messages.
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Fetch the records matching `request`, in any order.
    async fn fetch_range(&self, request: &FetchRequest) -> Result<Vec<Value>>;

    /// Open the live push stream.
    async fn open_stream(&self) -> Result<MessageStream> {
        Err(CacheError::StreamUnavailable(
            "transport does not support push".to_string(),
        ))
    }
}
