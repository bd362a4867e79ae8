//! # Log Cache
//!
//! A client-side, gap-aware cache for a timestamp-ordered log stream that is
//! fetched incrementally from a remote source.
//!
//! ## Core Concepts
//!
//! - **Timeline**: non-overlapping segments of contiguous, time-ordered entries
//! - **Demand**: refcounted ranges that live subscriptions need kept cached
//! - **Orphans**: entries from limited queries that sit outside the timeline
//! - **Backfill**: recursive, cancellable fetches that close absent ranges
//! - **Ingestion**: polling or a push stream keeps the newest segment fresh
//!
//! ## Example
//!
//! ```ignore
//! use logcache::{CacheConfig, FieldSpec, LogCache, Query, Timestamp};
//!
//! let cache = LogCache::builder(transport)
//!     .config(CacheConfig::new().with_polling(Duration::from_secs(3)))
//!     .field("level", FieldSpec::of_type("enumeration"))
//!     .build();
//! cache.start()?;
//!
//! // Keep the last hour cached and get every change
//! let subscription = cache.subscribe(
//!     Query::new().from_date(Timestamp(now - 3_600_000)),
//!     |entries| println!("{} entries", entries.len()),
//! );
//!
//! // Read what is cached, filtered in memory
//! let errors = cache.filter(&Query::new().filter("level", json!({"error": true})));
//! ```

pub mod cache;
pub mod config;
pub mod demand;
mod engine;
pub mod error;
pub mod fetch;
pub mod orphans;
pub mod query;
mod state;
pub mod subscriptions;
pub mod timeline;
pub mod types;

// Re-exports
pub use cache::{LogCache, LogCacheBuilder};
pub use config::{CacheConfig, IngestMode, DEFAULT_FETCH_LIMIT, DEFAULT_POLL_INTERVAL};
pub use demand::DemandTracker;
pub use error::{CacheError, Result};
pub use fetch::{CancelToken, FetchRequest, LogTransport, MessageStream, Normalizer, StreamTransform, Transform};
pub use orphans::{OrphanEntry, OrphanStore, Placement};
pub use query::{FieldKind, FieldRegistry, FieldSpec, FieldType, Query};
pub use state::CacheStats;
pub use subscriptions::{
    CacheEvent, Callback, DropReason, Subscription, SubscriptionHandle, SubscriptionId,
    SubscriptionManager,
};
pub use timeline::{Coverage, Segment, TimelineCache};
pub use types::*;
