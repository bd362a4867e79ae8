//! Timeline cache.
//!
//! An interval-indexed store of contiguous, time-ordered segments. Segments
//! never overlap and never touch: any insert that meets a neighbour is
//! stitched into it. The segment with the greatest bounds is the Last
//! Segment, the one extended by live ingestion.

mod cache;
mod coverage;

pub use cache::{Segment, TimelineCache};
pub use coverage::{truncate_at_boundary, Coverage};
