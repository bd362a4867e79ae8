//! Unsubscribe guard.

use super::types::SubscriptionId;
use crate::engine::Engine;
use crate::types::IntervalKey;
use std::sync::Weak;

/// What a subscription holds on the cache until it is released.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Ticket {
    /// Demand on a range of the timeline.
    Unbounded(IntervalKey),
    /// A reference on a cached limited query, by encoded key.
    Limited(String),
}

/// Live subscription. Unsubscribes when dropped.
///
/// The listener stops receiving immediately; the demand or orphan references
/// it holds are released one scheduling tick later, so an immediate
/// resubscribe with the same query does not evict anything.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    id: SubscriptionId,
    ticket: Option<Ticket>,
    engine: Weak<Engine>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, ticket: Ticket, engine: Weak<Engine>) -> Self {
        Self {
            id,
            ticket: Some(ticket),
            engine,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribe now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        if let Some(engine) = self.engine.upgrade() {
            engine.unsubscribe(self.id, ticket);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("ticket", &self.ticket)
            .finish()
    }
}
