//! Subscription manager for broadcasting cache snapshots.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{Callback, CacheEvent, DropReason, SubscriptionHandle, SubscriptionId};
use crate::types::Entry;

/// Where a subscription's snapshots go.
enum Sink {
    Callback(Callback),
    Channel(Sender<CacheEvent>),
}

impl Sink {
    /// Try to send an event. Returns false if buffer is full (subscriber will be dropped).
    fn try_send(&self, event: CacheEvent) -> bool {
        match self {
            Sink::Callback(_) => true,
            Sink::Channel(sender) => sender.try_send(event).is_ok(),
        }
    }
}

/// Manages subscriptions and broadcasts snapshots.
pub struct SubscriptionManager {
    /// Active subscriptions by ID, in subscription order.
    subscriptions: RwLock<BTreeMap<SubscriptionId, Sink>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Capacity of channel subscriptions.
    buffer_size: usize,
}

impl SubscriptionManager {
    /// Create a manager whose channel subscriptions buffer `buffer_size` events.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            subscriptions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Register a callback.
    pub fn subscribe_callback(&self, callback: Callback) -> SubscriptionId {
        let id = self.next_id();
        self.subscriptions.write().insert(id, Sink::Callback(callback));
        id
    }

    /// Register a bounded channel.
    pub fn subscribe_channel(&self) -> SubscriptionHandle {
        let id = self.next_id();
        let (sender, receiver) = bounded(self.buffer_size);
        self.subscriptions.write().insert(id, Sink::Channel(sender));
        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = self.subscriptions.write().remove(&id);
        if let Some(sink) = removed {
            // Best effort
            let _ = sink.try_send(CacheEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Drop every subscription.
    pub fn close_all(&self) {
        let subs = std::mem::take(&mut *self.subscriptions.write());
        for sink in subs.into_values() {
            let _ = sink.try_send(CacheEvent::Dropped {
                reason: DropReason::Shutdown,
            });
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Deliver `entries` to every subscription.
    ///
    /// Channel subscribers that cannot keep up are dropped. Callbacks run
    /// after the subscription lock is released, so they may subscribe or
    /// unsubscribe.
    pub fn broadcast(&self, entries: Arc<Vec<Entry>>) {
        let mut callbacks = Vec::new();
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sink) in subs.iter() {
                match sink {
                    Sink::Callback(callback) => callbacks.push(Arc::clone(callback)),
                    Sink::Channel(_) => {
                        let event = CacheEvent::Snapshot {
                            entries: Arc::clone(&entries),
                        };
                        if !sink.try_send(event) {
                            to_remove.push(*id);
                        }
                    }
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(Sink::Channel(sender)) = subs.remove(&id) {
                    // Might fail, that's ok
                    let _ = sender.try_send(CacheEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }

        for callback in callbacks {
            callback(&entries);
        }
    }
}
