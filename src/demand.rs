//! Demand tracking for unbounded subscriptions.
//!
//! Keeps a refcount per time range. Ranges are split where subscriptions
//! overlap and coalesced again when neighbours end up with equal counts, so
//! the map stays as small as the current demand allows.

use crate::types::{IntervalKey, Timestamp};
use std::collections::BTreeMap;

/// Interval to refcount index of ranges consumers still need.
#[derive(Clone, Debug, Default)]
pub struct DemandTracker {
    /// low -> (high, count); ranges never overlap and counts are positive.
    ranges: BTreeMap<Timestamp, (Timestamp, usize)>,
}

impl DemandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more consumer of `key`.
    pub fn add(&mut self, key: IntervalKey) {
        if key.is_empty() {
            return;
        }

        self.split_at(key.low);
        self.split_at(key.high);

        let inside: Vec<(Timestamp, Timestamp)> = self
            .ranges
            .range(key.low..key.high)
            .map(|(low, (high, _))| (*low, *high))
            .collect();

        let mut cursor = key.low;
        for (low, high) in inside {
            if low > cursor {
                self.ranges.insert(cursor, (low, 1));
            }
            if let Some((_, count)) = self.ranges.get_mut(&low) {
                *count += 1;
            }
            cursor = high;
        }
        if cursor < key.high {
            self.ranges.insert(cursor, (key.high, 1));
        }

        self.coalesce();
    }

    /// Drop one consumer of `key`.
    ///
    /// Returns the ranges whose count reached zero; those are no longer
    /// protected from eviction.
    pub fn remove(&mut self, key: IntervalKey) -> Vec<IntervalKey> {
        if key.is_empty() {
            return Vec::new();
        }

        self.split_at(key.low);
        self.split_at(key.high);

        let inside: Vec<Timestamp> = self
            .ranges
            .range(key.low..key.high)
            .map(|(low, _)| *low)
            .collect();

        let mut released: Vec<IntervalKey> = Vec::new();
        for low in inside {
            let Some((high, count)) = self.ranges.get_mut(&low) else {
                continue;
            };
            *count -= 1;
            if *count > 0 {
                continue;
            }
            let high = *high;
            self.ranges.remove(&low);
            match released.last_mut() {
                Some(prev) if prev.high == low => prev.high = high,
                _ => released.push(IntervalKey::new(low, high)),
            }
        }

        self.coalesce();
        released
    }

    /// Whether any demanded range overlaps `key`.
    pub fn has_any(&self, key: IntervalKey) -> bool {
        if let Some((_, (high, _))) = self.ranges.range(..=key.low).next_back() {
            if *high > key.low {
                return true;
            }
        }
        key.low < key.high
            && self
                .ranges
                .range(key.low..key.high)
                .next()
                .is_some()
    }

    /// Number of distinct ranges.
    pub fn total_ranges(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Every range with its count, oldest first.
    pub fn ranges(&self) -> Vec<(IntervalKey, usize)> {
        self.ranges
            .iter()
            .map(|(low, (high, count))| (IntervalKey::new(*low, *high), *count))
            .collect()
    }

    /// Replace the whole-timeline demand with `[watermark, +inf)`.
    ///
    /// Applies only while the sole demand is the single whole-timeline range
    /// held once. Returns true when the range was narrowed.
    pub fn narrow_sentinel(&mut self, watermark: Timestamp) -> bool {
        if !watermark.is_bounded()
            || self.ranges.get(&Timestamp::MIN) != Some(&(Timestamp::MAX, 1))
        {
            return false;
        }
        self.ranges.remove(&Timestamp::MIN);
        self.ranges.insert(watermark, (Timestamp::MAX, 1));
        true
    }

    /// Split the range straddling `t` into two with the same count.
    fn split_at(&mut self, t: Timestamp) {
        let Some((&low, &(high, count))) = self.ranges.range(..t).next_back() else {
            return;
        };
        if high > t {
            self.ranges.insert(low, (t, count));
            self.ranges.insert(t, (high, count));
        }
    }

    /// Merge adjacent ranges holding equal counts.
    fn coalesce(&mut self) {
        let mut merged: BTreeMap<Timestamp, (Timestamp, usize)> = BTreeMap::new();
        let mut current: Option<(Timestamp, Timestamp, usize)> = None;

        for (&low, &(high, count)) in &self.ranges {
            current = match current {
                Some((start, end, c)) if end == low && c == count => Some((start, high, c)),
                Some((start, end, c)) => {
                    merged.insert(start, (end, c));
                    Some((low, high, count))
                }
                None => Some((low, high, count)),
            };
        }
        if let Some((start, end, c)) = current {
            merged.insert(start, (end, c));
        }

        self.ranges = merged;
    }
}
