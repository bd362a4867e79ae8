//! Mutable cache state, owned by a single writer.

use crate::demand::DemandTracker;
use crate::fetch::CancelToken;
use crate::orphans::OrphanStore;
use crate::timeline::{Segment, TimelineCache};
use crate::types::{Entry, IntervalKey, Timestamp};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// A cached limited query.
#[derive(Clone, Debug, Default)]
pub(crate) struct OrphanQuery {
    /// Live subscriptions using this result.
    pub subs: usize,

    /// Raw fetch result; `None` until a fetch succeeds.
    pub list: Option<Vec<Entry>>,

    /// Entries of `list` placed in the orphan store.
    pub held: Vec<Entry>,
}

/// Size counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub segments: usize,
    pub timeline_entries: usize,
    pub demand_ranges: usize,
    pub orphans: usize,
    pub orphan_queries: usize,
    pub backfills_in_flight: usize,
    pub unbounded_subscribers: usize,
}

/// Everything mutated by fetch results and subscription changes.
#[derive(Debug)]
pub(crate) struct CacheState {
    pub timeline: TimelineCache,
    pub demand: DemandTracker,
    pub orphans: OrphanStore,
    pub orphan_queries: HashMap<String, OrphanQuery>,
    pub backfills: HashMap<String, CancelToken>,
    pub watermark: Timestamp,
    pub unbounded: usize,
    /// Low bound the whole-time sentinel was narrowed to, while the
    /// subscription holding it is still live.
    sentinel_low: Option<Timestamp>,
}

impl Default for CacheState {
    fn default() -> Self {
        Self {
            timeline: TimelineCache::new(),
            demand: DemandTracker::new(),
            orphans: OrphanStore::new(),
            orphan_queries: HashMap::new(),
            backfills: HashMap::new(),
            watermark: Timestamp::MIN,
            unbounded: 0,
            sentinel_low: None,
        }
    }
}

impl CacheState {
    /// Merge covered entries into the timeline. Orphans inside the merged
    /// range are dropped: timeline coverage wins.
    pub fn apply(&mut self, key: IntervalKey, entries: Vec<Entry>) -> IntervalKey {
        let merged = self.timeline.insert(key, entries);
        let evicted = self.orphans.remove_range(merged);
        if evicted > 0 {
            debug!(?merged, evicted, "orphans superseded by timeline");
        }
        merged
    }

    /// Fold a live entry into the timeline.
    pub fn push(&mut self, entry: Entry) -> bool {
        let t = entry.time();
        if !self.timeline.push(entry) {
            return false;
        }
        if let Some(seg) = self.timeline.segment_at(t) {
            self.orphans.remove_range(seg.key());
        }
        true
    }

    /// Recompute the watermark from the oldest timeline entry and narrow the
    /// whole-timeline demand once it is known.
    pub fn refresh_watermark(&mut self) {
        if let Some(oldest) = self.timeline.oldest() {
            self.watermark = oldest;
        }
        if self.watermark.is_bounded() && self.demand.narrow_sentinel(self.watermark) {
            self.sentinel_low = Some(self.watermark);
        }
    }

    /// Drop the demand held by an unbounded subscription and evict what it
    /// alone protected.
    ///
    /// A ticket for the whole timeline is released as the range the
    /// sentinel was narrowed to, so the other subscribers' ranges keep
    /// their counts.
    pub fn release_unbounded(&mut self, mut range: IntervalKey, max_entries: usize) -> bool {
        self.unbounded = self.unbounded.saturating_sub(1);
        if range == IntervalKey::WHOLE {
            if let Some(low) = self.sentinel_low.take() {
                range = IntervalKey::new(low, Timestamp::MAX);
            }
        }
        let mut changed = false;
        for key in self.demand.remove(range) {
            changed |= self.evict(key, max_entries);
        }
        changed
    }

    /// Evict what `released` demand no longer protects.
    ///
    /// Segments overlapping `released` go unless they are the Last Segment
    /// or still demanded elsewhere. The Last Segment is only ever truncated
    /// to `max_entries`, and only when no unbounded subscription is left or
    /// nothing demands it.
    pub fn evict(&mut self, released: IntervalKey, max_entries: usize) -> bool {
        let last = self.timeline.last_key();

        let victims: Vec<IntervalKey> = self
            .timeline
            .query(released)
            .map(Segment::key)
            .filter(|key| Some(*key) != last && !self.demand.has_any(*key))
            .collect();

        let mut changed = !victims.is_empty();
        for key in victims {
            debug!(?key, "evicting segment");
            self.timeline.remove_key(key.low);
        }

        if let Some(last) = last {
            if self.unbounded == 0 || !self.demand.has_any(last) {
                if let Some(key) = self.timeline.truncate_last(max_entries) {
                    debug!(?key, max_entries, "truncated last segment");
                    changed = true;
                }
            }
        }
        changed
    }

    /// Take a reference on a limited query. Returns true when the query is
    /// new and must be fetched.
    pub fn hold_query(&mut self, key: &str) -> bool {
        match self.orphan_queries.get_mut(key) {
            Some(query) => {
                query.subs += 1;
                self.orphans.retain(&query.held);
                false
            }
            None => {
                self.orphan_queries.insert(
                    key.to_string(),
                    OrphanQuery {
                        subs: 1,
                        ..Default::default()
                    },
                );
                true
            }
        }
    }

    /// Drop a reference on a limited query, releasing its orphans. The query
    /// is forgotten once nothing holds it.
    pub fn release_query(&mut self, key: &str) -> bool {
        let Some(query) = self.orphan_queries.get_mut(key) else {
            return false;
        };
        query.subs = query.subs.saturating_sub(1);
        let removed = self.orphans.release(&query.held);
        if query.subs == 0 {
            self.orphan_queries.remove(key);
        }
        removed > 0
    }

    /// Discard the result of a limited query, releasing its orphans, so it
    /// can be fetched again. Returns false when nothing holds the query.
    pub fn reset_query(&mut self, key: &str) -> bool {
        let Some(query) = self.orphan_queries.get_mut(key) else {
            return false;
        };
        for _ in 0..query.subs {
            self.orphans.release(&query.held);
        }
        query.held.clear();
        query.list = None;
        true
    }

    /// Store the fetched result of a limited query.
    ///
    /// Entries already covered by the timeline are not stored. Returns false
    /// when the result arrives for a query nobody holds any more or one that
    /// already has a result.
    pub fn merge_orphan_result(&mut self, key: &str, entries: Vec<Entry>) -> bool {
        let Some(query) = self.orphan_queries.get_mut(key) else {
            return false;
        };
        if query.subs == 0 || query.list.is_some() {
            return false;
        }

        let held: Vec<Entry> = entries
            .iter()
            .filter(|e| !self.timeline.covers(e.time()))
            .cloned()
            .collect();
        for entry in &held {
            self.orphans.insert_or_find_duplicate(entry.clone(), query.subs);
        }

        query.held = held;
        query.list = Some(entries);
        true
    }

    /// Timeline entries interleaved with orphans, newest first.
    pub fn view(&self) -> Vec<Entry> {
        let timeline = self.timeline.merged_view();
        if self.orphans.is_empty() {
            return timeline;
        }

        let mut view = Vec::with_capacity(timeline.len() + self.orphans.len());
        let mut orphans = self.orphans.iter_ascending().rev().peekable();
        for entry in timeline {
            while let Some(orphan) = orphans.next_if(|o| o.entry.time() > entry.time()) {
                view.push(orphan.entry.clone());
            }
            view.push(entry);
        }
        view.extend(orphans.map(|o| o.entry.clone()));
        view
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            segments: self.timeline.len(),
            timeline_entries: self.timeline.entry_count(),
            demand_ranges: self.demand.total_ranges(),
            orphans: self.orphans.len(),
            orphan_queries: self.orphan_queries.len(),
            backfills_in_flight: self.backfills.len(),
            unbounded_subscribers: self.unbounded,
        }
    }
}
