//! Side-store for entries returned by limited or filtered one-off queries.

use crate::types::{Entry, IntervalKey, Timestamp};
use std::collections::BTreeMap;

/// An orphaned entry and the number of query results holding it.
#[derive(Clone, Debug, PartialEq)]
pub struct OrphanEntry {
    pub entry: Entry,
    pub subs: usize,
}

/// Outcome of [`OrphanStore::insert_or_find_duplicate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// The entry was new and is now stored.
    Inserted,
    /// An equal entry was already stored; its refcount was raised.
    Duplicate,
}

/// Orphans ordered by time, deduplicated by value equality.
#[derive(Clone, Debug, Default)]
pub struct OrphanStore {
    by_time: BTreeMap<Timestamp, Vec<OrphanEntry>>,
    len: usize,
}

impl OrphanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `entry` held `subs` times, or add `subs` to an equal stored entry.
    pub fn insert_or_find_duplicate(&mut self, entry: Entry, subs: usize) -> Placement {
        let bucket = self.by_time.entry(entry.time()).or_default();
        if let Some(existing) = bucket.iter_mut().find(|o| o.entry == entry) {
            existing.subs += subs;
            return Placement::Duplicate;
        }
        bucket.push(OrphanEntry { entry, subs });
        self.len += 1;
        Placement::Inserted
    }

    /// Add one holder to each stored entry equal to one of `entries`.
    pub fn retain(&mut self, entries: &[Entry]) {
        for entry in entries {
            if let Some(existing) = self.find_mut(entry) {
                existing.subs += 1;
            }
        }
    }

    /// Drop one holder from each stored entry equal to one of `entries`,
    /// deleting those no longer held. Returns how many were deleted.
    pub fn release(&mut self, entries: &[Entry]) -> usize {
        let mut removed = 0;
        for entry in entries {
            let Some(bucket) = self.by_time.get_mut(&entry.time()) else {
                continue;
            };
            let Some(pos) = bucket.iter().position(|o| o.entry == *entry) else {
                continue;
            };
            bucket[pos].subs = bucket[pos].subs.saturating_sub(1);
            if bucket[pos].subs == 0 {
                bucket.remove(pos);
                removed += 1;
            }
            if bucket.is_empty() {
                self.by_time.remove(&entry.time());
            }
        }
        self.len -= removed;
        removed
    }

    /// Evict every orphan inside `key`. Returns how many were evicted.
    pub fn remove_range(&mut self, key: IntervalKey) -> usize {
        if key.is_empty() {
            return 0;
        }
        let times: Vec<Timestamp> = self
            .by_time
            .range(key.low..key.high)
            .map(|(t, _)| *t)
            .collect();

        let mut removed = 0;
        for t in times {
            if let Some(bucket) = self.by_time.remove(&t) {
                removed += bucket.len();
            }
        }
        self.len -= removed;
        removed
    }

    /// Orphans, oldest first.
    pub fn iter_ascending(&self) -> impl DoubleEndedIterator<Item = &OrphanEntry> + '_ {
        self.by_time.values().flatten()
    }

    /// Stored entry equal to `entry`.
    pub fn get(&self, entry: &Entry) -> Option<&OrphanEntry> {
        self.by_time
            .get(&entry.time())?
            .iter()
            .find(|o| o.entry == *entry)
    }

    fn find_mut(&mut self, entry: &Entry) -> Option<&mut OrphanEntry> {
        self.by_time
            .get_mut(&entry.time())?
            .iter_mut()
            .find(|o| o.entry == *entry)
    }
}
