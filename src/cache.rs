//! Public cache handle.

use crate::config::{CacheConfig, IngestMode};
use crate::engine::Engine;
use crate::error::{CacheError, Result};
use crate::fetch::{LogTransport, Normalizer, StreamTransform, Transform};
use crate::orphans::OrphanEntry;
use crate::query::{FieldKind, FieldRegistry, FieldSpec, Query};
use crate::state::CacheStats;
use crate::subscriptions::{Subscription, SubscriptionHandle};
use crate::types::{Entry, IntervalKey, Timestamp};
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Builder for [`LogCache`].
pub struct LogCacheBuilder {
    transport: Arc<dyn LogTransport>,
    config: CacheConfig,
    fields: Vec<(String, FieldSpec)>,
    types: Vec<(String, Arc<dyn FieldKind>)>,
    transform: Option<Transform>,
    stream_transform: Option<StreamTransform>,
}

impl LogCacheBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a query field. Fields are encoded in registration order,
    /// after `fromDate`, `toDate` and `limit`.
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.push((name.into(), spec));
        self
    }

    /// Register a caller-defined field type.
    pub fn field_type(mut self, name: impl Into<String>, kind: Arc<dyn FieldKind>) -> Self {
        self.types.push((name.into(), kind));
        self
    }

    /// Transform applied to every raw record before it enters the cache.
    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&Value, usize, &[Value], bool) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Transform applied to push messages, ahead of [`Self::transform`].
    pub fn stream_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.stream_transform = Some(Arc::new(transform));
        self
    }

    pub fn build(self) -> LogCache {
        let mut registry = FieldRegistry::new(self.config.fetch_limit);
        for (name, kind) in self.types {
            registry.register_type(name, kind);
        }
        for (name, spec) in self.fields {
            registry.register_field(name, spec);
        }

        let mut normalizer = Normalizer::new(self.config.time_field.clone());
        if let Some(transform) = self.transform {
            normalizer = normalizer.with_transform(transform);
        }
        if let Some(transform) = self.stream_transform {
            normalizer = normalizer.with_stream_transform(transform);
        }

        LogCache {
            engine: Arc::new(Engine::new(
                self.config,
                registry,
                self.transport,
                normalizer,
            )),
        }
    }
}

/// Client-side cache of a timestamp-ordered log stream.
///
/// Keeps a gap-aware view of the remote timeline for its subscribers:
/// missing ranges are backfilled on demand, fresh entries arrive by polling
/// or push, and ranges nobody needs any more are evicted.
///
/// Dropping the cache stops its background tasks.
pub struct LogCache {
    engine: Arc<Engine>,
}

impl LogCache {
    pub fn builder(transport: Arc<dyn LogTransport>) -> LogCacheBuilder {
        LogCacheBuilder {
            transport,
            config: CacheConfig::default(),
            fields: Vec::new(),
            types: Vec::new(),
            transform: None,
            stream_transform: None,
        }
    }

    /// Cache with `config` and no extra fields.
    pub fn new(transport: Arc<dyn LogTransport>, config: CacheConfig) -> Self {
        Self::builder(transport).config(config).build()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.engine.config
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.engine.registry
    }

    // --- Lifecycle ---

    /// Spawn the configured ingestion loop on the current runtime.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        if self.engine.shutdown.is_cancelled() {
            return Err(CacheError::Shutdown);
        }
        let handle = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        let engine = Arc::clone(&self.engine);

        Ok(match self.engine.config.ingest {
            IngestMode::Polling { interval } => handle.spawn(engine.run_polling(interval)),
            IngestMode::Push => handle.spawn(engine.run_push()),
        })
    }

    /// Stop ingestion and in-flight backfills and drop every subscriber.
    pub fn shutdown(&self) {
        self.engine.shutdown.cancel();
        for token in self.engine.state.lock().backfills.values() {
            token.cancel();
        }
        self.engine.subscribers.close_all();
    }

    /// Fetch everything newer than the cached timeline, once.
    pub async fn poll_once(&self) -> Result<bool> {
        self.engine.poll_once().await
    }

    /// Backfill the gaps `query` needs and wait for it to finish.
    pub async fn fill_gaps(&self, query: &Query) {
        self.engine.fill_gaps(query).await
    }

    /// Feed one raw push message, as the push loop does.
    pub fn ingest_message(&self, raw: &str) -> bool {
        self.engine.ingest_message(raw)
    }

    // --- Subscriptions ---

    /// Call `callback` with the full cached view on every change.
    ///
    /// Without a limit, the query's range is kept cached (and backfilled
    /// from `from_date`) while the subscription lives. With a limit, the
    /// query is fetched once and its result shared by identical
    /// subscriptions.
    pub fn subscribe<F>(&self, query: Query, callback: F) -> Subscription
    where
        F: Fn(&[Entry]) + Send + Sync + 'static,
    {
        let id = self.engine.subscribers.subscribe_callback(Arc::new(callback));
        self.engine.subscribe(id, query)
    }

    /// Like [`Self::subscribe`], delivering snapshots over a bounded channel.
    pub fn subscribe_events(&self, query: Query) -> (SubscriptionHandle, Subscription) {
        let handle = self.engine.subscribers.subscribe_channel();
        let subscription = self.engine.subscribe(handle.id, query);
        (handle, subscription)
    }

    pub fn subscription_count(&self) -> usize {
        self.engine.subscribers.subscription_count()
    }

    /// Recompute the watermark and broadcast the current view.
    pub fn update(&self) {
        self.engine.update()
    }

    // --- Reads ---

    /// Every cached entry, newest first. Never fetches.
    pub fn get(&self) -> Vec<Entry> {
        self.engine.state.lock().view()
    }

    /// Cached entries passing `query`, newest first. Never fetches.
    pub fn filter(&self, query: &Query) -> Vec<Entry> {
        let view = self.get();
        self.engine.registry.filter(&view, query)
    }

    /// Cached result of a limited query, if it was fetched.
    pub fn query_result(&self, query: &Query) -> Option<Vec<Entry>> {
        let key = self.engine.registry.encode(query);
        self.engine
            .state
            .lock()
            .orphan_queries
            .get(&key)
            .and_then(|q| q.list.clone())
    }

    /// Drop the cached result of a limited query and fetch it again for
    /// its current subscribers. Returns false when nothing holds the query.
    pub fn forget_query(&self, query: &Query) -> bool {
        let key = self.engine.registry.encode(query);
        if !self.engine.state.lock().reset_query(&key) {
            return false;
        }
        let engine = Arc::clone(&self.engine);
        self.engine.spawn(engine.fetch_orphans(key, query.clone()));
        true
    }

    /// Oldest cached timeline time, or `Timestamp::MIN` before any data.
    pub fn watermark(&self) -> Timestamp {
        self.engine.state.lock().watermark
    }

    /// Uncovered sub-ranges of `[from, to)`.
    pub fn absent_ranges(&self, from: Option<Timestamp>, to: Timestamp) -> Vec<IntervalKey> {
        self.engine.state.lock().timeline.absent_ranges(from, to)
    }

    /// Keys of the cached segments, oldest first.
    pub fn segments(&self) -> Vec<IntervalKey> {
        self.engine.state.lock().timeline.keys()
    }

    pub fn last_segment(&self) -> Option<IntervalKey> {
        self.engine.state.lock().timeline.last_key()
    }

    /// Demanded ranges with their refcounts.
    pub fn demand(&self) -> Vec<(IntervalKey, usize)> {
        self.engine.state.lock().demand.ranges()
    }

    /// Orphaned entries with their refcounts, oldest first.
    pub fn orphans(&self) -> Vec<OrphanEntry> {
        self.engine
            .state
            .lock()
            .orphans
            .iter_ascending()
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.engine.state.lock().stats()
    }
}

impl Drop for LogCache {
    fn drop(&mut self) {
        self.engine.shutdown.cancel();
    }
}
