//! Segment index.

use super::coverage::truncate_at_boundary;
use crate::types::{Entry, IntervalKey, Timestamp};
use std::collections::BTreeMap;

/// A contiguous covered range and its entries, newest first.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    key: IntervalKey,
    entries: Vec<Entry>,
}

impl Segment {
    pub fn key(&self) -> IntervalKey {
        self.key
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert in time order. Returns false when an equal entry is already held.
    fn insert_sorted(&mut self, entry: Entry) -> bool {
        let t = entry.time();
        let start = self.entries.partition_point(|e| e.time() > t);
        let end = self.entries.partition_point(|e| e.time() >= t);
        if self.entries[start..end].contains(&entry) {
            return false;
        }
        self.entries.insert(end, entry);
        true
    }
}

/// Non-overlapping, non-touching segments keyed by their lower bound.
#[derive(Clone, Debug, Default)]
pub struct TimelineCache {
    segments: BTreeMap<Timestamp, Segment>,
}

impl TimelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of stored segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Total entries across all segments.
    pub fn entry_count(&self) -> usize {
        self.segments.values().map(Segment::len).sum()
    }

    /// Merge `entries` (all inside `key`) into the timeline.
    ///
    /// Every segment overlapping or touching `key` is folded into one
    /// segment spanning the union. Inside a previously covered range the
    /// stored entries are kept; new entries only fill what was absent.
    /// Returns the key of the resulting segment.
    pub fn insert(&mut self, key: IntervalKey, entries: Vec<Entry>) -> IntervalKey {
        if key.is_empty() {
            return key;
        }

        let neighbours: Vec<Timestamp> = self
            .segments
            .range(..=key.high)
            .rev()
            .take_while(|(_, seg)| seg.key.high >= key.low)
            .map(|(low, _)| *low)
            .collect();

        let mut existing = Vec::with_capacity(neighbours.len());
        for low in neighbours {
            if let Some(seg) = self.segments.remove(&low) {
                existing.push(seg);
            }
        }

        let low = existing.iter().map(|s| s.key.low).fold(key.low, Ord::min);
        let high = existing.iter().map(|s| s.key.high).fold(key.high, Ord::max);

        let mut merged: Vec<Entry> = entries
            .into_iter()
            .filter(|e| key.contains(e.time()))
            .filter(|e| !existing.iter().any(|s| s.key.contains(e.time())))
            .collect();
        for seg in existing {
            merged.extend(seg.entries);
        }
        merged.sort_by(|a, b| b.time().cmp(&a.time()));

        let key = IntervalKey::new(low, high);
        self.segments.insert(
            low,
            Segment {
                key,
                entries: merged,
            },
        );
        key
    }

    /// Drop the segment starting at `low`.
    pub fn remove_key(&mut self, low: Timestamp) -> Option<Segment> {
        self.segments.remove(&low)
    }

    /// Segments overlapping `key`, oldest first.
    pub fn query(&self, key: IntervalKey) -> impl Iterator<Item = &Segment> + '_ {
        let start = self
            .segment_at(key.low)
            .map(|seg| seg.key.low)
            .unwrap_or(key.low);
        let end = key.high.max(start);
        self.segments.range(start..end).map(|(_, seg)| seg)
    }

    /// Sub-ranges of `[from, to)` not covered by any segment, oldest first.
    ///
    /// Nothing is reported without a lower bound, or when `from` is the
    /// lower bound of the Last Segment.
    pub fn absent_ranges(&self, from: Option<Timestamp>, to: Timestamp) -> Vec<IntervalKey> {
        let Some(from) = from else {
            return Vec::new();
        };
        if from >= to || self.last_key().is_some_and(|last| last.low == from) {
            return Vec::new();
        }

        let mut absent = Vec::new();
        let mut cursor = from;
        for seg in self.query(IntervalKey::new(from, to)) {
            if seg.key.low > cursor {
                absent.push(IntervalKey::new(cursor, seg.key.low));
            }
            cursor = cursor.max(seg.key.high);
        }
        if cursor < to {
            absent.push(IntervalKey::new(cursor, to));
        }
        absent
    }

    /// Fold one live entry into the timeline.
    ///
    /// Entries at or past the Last Segment's upper bound extend it. Late
    /// entries go into the segment covering them, or become a one
    /// millisecond segment stitched with its neighbours. Returns false when
    /// the entry was already cached.
    pub fn push(&mut self, entry: Entry) -> bool {
        let t = entry.time();

        if let Some((_, last)) = self.segments.iter_mut().next_back() {
            if t >= last.key.high {
                last.key.high = t.next();
                last.entries.insert(0, entry);
                return true;
            }
        }

        if let Some(low) = self.segment_at(t).map(|seg| seg.key.low) {
            return match self.segments.get_mut(&low) {
                Some(seg) => seg.insert_sorted(entry),
                None => false,
            };
        }

        self.insert(IntervalKey::new(t, t.next()), vec![entry]);
        true
    }

    /// Segment whose range contains `t`.
    pub fn segment_at(&self, t: Timestamp) -> Option<&Segment> {
        self.segments
            .range(..=t)
            .next_back()
            .map(|(_, seg)| seg)
            .filter(|seg| seg.key.contains(t))
    }

    pub fn covers(&self, t: Timestamp) -> bool {
        self.segment_at(t).is_some()
    }

    /// Time of the oldest cached entry.
    pub fn oldest(&self) -> Option<Timestamp> {
        self.segments
            .values()
            .find_map(|seg| seg.entries.last().map(Entry::time))
    }

    /// The Last Segment: the one with the most recent bounds.
    pub fn last(&self) -> Option<&Segment> {
        self.segments.values().next_back()
    }

    pub fn last_key(&self) -> Option<IntervalKey> {
        self.last().map(Segment::key)
    }

    /// Every segment key, oldest first.
    pub fn keys(&self) -> Vec<IntervalKey> {
        self.segments.values().map(Segment::key).collect()
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.segments.values()
    }

    /// All cached entries, newest first.
    pub fn merged_view(&self) -> Vec<Entry> {
        let mut view = Vec::with_capacity(self.entry_count());
        for seg in self.segments.values().rev() {
            view.extend(seg.entries.iter().cloned());
        }
        view
    }

    /// Keep only the newest `capacity` entries of the Last Segment, raising
    /// its lower bound to the cut. Returns the new key when it shrank.
    pub fn truncate_last(&mut self, capacity: usize) -> Option<IntervalKey> {
        let low = *self.segments.keys().next_back()?;
        let seg = self.segments.get_mut(&low)?;
        let new_low = truncate_at_boundary(&mut seg.entries, capacity)?;

        let mut seg = self.segments.remove(&low)?;
        seg.key.low = new_low;
        let key = seg.key;
        self.segments.insert(new_low, seg);
        Some(key)
    }
}
