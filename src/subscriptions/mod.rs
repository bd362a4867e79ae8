//! Subscriptions to cache updates.
//!
//! Every change to the cached view is broadcast as a full snapshot, newest
//! entry first. Two kinds of listeners are supported:
//! - callbacks, invoked in subscription order with no cache lock held
//! - bounded channels, dropped when the consumer falls behind
//!
//! # Example
//!
//! ```ignore
//! let (handle, subscription) = cache.subscribe_events(Query::new());
//!
//! loop {
//!     match handle.recv() {
//!         Ok(CacheEvent::Snapshot { entries }) => println!("{} entries", entries.len()),
//!         Ok(CacheEvent::Dropped { reason }) => break,
//!         Err(_) => break,
//!     }
//! }
//! drop(subscription);
//! ```

mod guard;
mod manager;
mod types;

pub use guard::Subscription;
pub(crate) use guard::Ticket;
pub use manager::SubscriptionManager;
pub use types::{Callback, CacheEvent, DropReason, SubscriptionHandle, SubscriptionId};
