//! Deriving the covered range of a fetch result.

use crate::types::{Entry, IntervalKey, Timestamp};

/// Dates travel to the remote source as whole seconds, so a request's upper
/// bound is rounded up to the next multiple of this.
const WIRE_STEP_MS: i64 = 1000;

/// What a fetch for `requested` actually covers.
#[derive(Clone, Debug, PartialEq)]
pub struct Coverage {
    /// Range the entries are known to be complete for. Empty when the page
    /// told nothing about `requested`.
    pub key: IntervalKey,

    /// Entries inside `key`, newest first.
    pub entries: Vec<Entry>,

    /// Leading slice of the request still missing after a capped response.
    pub remainder: Option<IntervalKey>,
}

impl Coverage {
    /// Resolve the coverage of `entries` fetched for `requested`.
    ///
    /// A complete response covers the whole request. A `truncated` one (the
    /// page cap was hit) is only trusted down to, but not including, its
    /// oldest timestamp group. That cut is taken over the whole page, entries
    /// outside `requested` included, since the remote source sees the range
    /// widened to whole seconds. Entries outside the trusted range are
    /// dropped.
    ///
    /// When a capped page lies entirely above `requested`, the remainder is
    /// lowered to a second boundary under the page so the next request can
    /// not be filled by the same entries. Returns `None` when nothing usable
    /// came back.
    pub fn resolve(requested: IntervalKey, mut entries: Vec<Entry>, truncated: bool) -> Option<Self> {
        entries.sort_by(|a, b| b.time().cmp(&a.time()));
        let newest = entries.first()?.time();
        let oldest = entries.last()?.time();

        // Every entry sharing one time: keep them, the group cannot be split.
        let cut = truncated
            .then(|| if oldest == newest { oldest } else { oldest.next() })
            .filter(|cut| *cut > requested.low);

        entries.retain(|e| requested.contains(e.time()) && cut.map_or(true, |c| e.time() >= c));

        let high = if requested.high == Timestamp::MAX {
            entries.first()?.time().next()
        } else {
            requested.high
        };

        let Some(cut) = cut else {
            let low = if requested.low == Timestamp::MIN {
                entries.last()?.time()
            } else {
                requested.low
            };
            if entries.is_empty() {
                return None;
            }
            return Some(Self {
                key: IntervalKey::new(low, high),
                entries,
                remainder: None,
            });
        };

        if cut < high {
            return Some(Self {
                key: IntervalKey::new(cut, high),
                entries,
                remainder: Some(IntervalKey::new(requested.low, cut)),
            });
        }

        let below = Timestamp((cut.0 - 1).div_euclid(WIRE_STEP_MS) * WIRE_STEP_MS);
        let remainder = IntervalKey::new(requested.low, below.min(high));
        Some(Self {
            key: IntervalKey::new(high, high),
            entries,
            remainder: (!remainder.is_empty()).then_some(remainder),
        })
    }
}

/// Keep at most `capacity` of the newest `entries` (sorted newest first),
/// cutting on a timestamp boundary so no time group is split.
///
/// Returns the new lower bound when anything was dropped.
pub fn truncate_at_boundary(entries: &mut Vec<Entry>, capacity: usize) -> Option<Timestamp> {
    if capacity == 0 || entries.len() <= capacity {
        return None;
    }

    let cut = entries[capacity].time();
    // The newest group alone exceeds the capacity.
    if cut == entries[0].time() {
        return None;
    }
    let low = cut.next();
    entries.retain(|e| e.time() >= low);
    Some(low)
}
