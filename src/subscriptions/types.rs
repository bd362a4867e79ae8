//! Subscription types.

use crate::types::Entry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Listener invoked with the full cached view on every change.
pub type Callback = Arc<dyn Fn(&[Entry]) + Send + Sync>;

/// Events delivered to channel subscriptions.
#[derive(Clone, Debug)]
pub enum CacheEvent {
    /// The cached view changed. Entries are newest first.
    Snapshot { entries: Arc<Vec<Entry>> },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// The cache shut down.
    Shutdown,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiving end of a channel subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<CacheEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<CacheEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<CacheEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<CacheEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain pending events and return the most recent snapshot, if any.
    pub fn latest(&self) -> Option<Arc<Vec<Entry>>> {
        let mut latest = None;
        while let Ok(event) = self.receiver.try_recv() {
            if let CacheEvent::Snapshot { entries } = event {
                latest = Some(entries);
            }
        }
        latest
    }
}
