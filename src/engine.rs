//! Cache engine: shared state plus the subscribe/update lifecycle.

use crate::config::CacheConfig;
use crate::fetch::{CancelToken, LogTransport, Normalizer};
use crate::query::{FieldRegistry, Query};
use crate::state::CacheState;
use crate::subscriptions::{Subscription, SubscriptionId, SubscriptionManager, Ticket};
use crate::types::{IntervalKey, Timestamp};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

/// Shared core behind a [`crate::LogCache`].
///
/// All cache mutation goes through `state`. The lock is never held across
/// an await point, and listeners are called with it released.
pub(crate) struct Engine {
    pub(crate) config: CacheConfig,
    pub(crate) registry: FieldRegistry,
    pub(crate) transport: Arc<dyn LogTransport>,
    pub(crate) normalizer: Normalizer,
    pub(crate) state: Mutex<CacheState>,
    pub(crate) subscribers: SubscriptionManager,
    pub(crate) shutdown: CancelToken,
}

impl Engine {
    pub(crate) fn new(
        config: CacheConfig,
        registry: FieldRegistry,
        transport: Arc<dyn LogTransport>,
        normalizer: Normalizer,
    ) -> Self {
        let subscribers = SubscriptionManager::new(config.subscriber_buffer);
        Self {
            config,
            registry,
            transport,
            normalizer,
            state: Mutex::new(CacheState::default()),
            subscribers,
            shutdown: CancelToken::new(),
        }
    }

    /// Recompute the watermark and broadcast the current view.
    pub(crate) fn update(&self) {
        let view = {
            let mut state = self.state.lock();
            state.refresh_watermark();
            Arc::new(state.view())
        };
        self.subscribers.broadcast(view);
    }

    /// Register a listener for `query` and take the matching references.
    pub(crate) fn subscribe(self: &Arc<Self>, id: SubscriptionId, query: Query) -> Subscription {
        let ticket = if query.is_limited() {
            let key = self.registry.encode(&query);
            let is_new = self.state.lock().hold_query(&key);
            if is_new {
                self.spawn(Arc::clone(self).fetch_orphans(key.clone(), query));
            }
            Ticket::Limited(key)
        } else {
            let range = {
                let mut state = self.state.lock();
                state.unbounded += 1;
                let range = IntervalKey::new(
                    query.from_date.unwrap_or(state.watermark),
                    query.to_date.unwrap_or(Timestamp::MAX),
                );
                state.demand.add(range);
                range
            };
            if query.from_date.is_some() {
                let engine = Arc::clone(self);
                self.spawn(async move { engine.fill_gaps(&query).await });
            }
            Ticket::Unbounded(range)
        };

        Subscription::new(id, ticket, Arc::downgrade(self))
    }

    /// Stop the listener now, release its references one tick later.
    pub(crate) fn unsubscribe(self: &Arc<Self>, id: SubscriptionId, ticket: Ticket) {
        self.subscribers.unsubscribe(id);

        let engine = Arc::clone(self);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    engine.release(ticket);
                });
            }
            Err(_) => engine.release(ticket),
        }
    }

    fn release(&self, ticket: Ticket) {
        let changed = {
            let mut state = self.state.lock();
            match ticket {
                Ticket::Unbounded(range) => state.release_unbounded(range, self.config.max_entries),
                Ticket::Limited(key) => state.release_query(&key),
            }
        };
        if changed {
            self.update();
        }
    }

    /// Run `future` on the current runtime.
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(future);
            }
            Err(_) => debug!("no async runtime; background fetch skipped"),
        }
    }
}
