//! Fetch orchestration.
//!
//! Everything that talks to the remote source lives here: the transport
//! seam, normalization of raw records into entries, cancellation of stale
//! backfills, and the orchestrator that decides what to fetch and how the
//! results land in the cache.

mod cancel;
mod normalize;
mod orchestrator;
mod transport;

pub use cancel::CancelToken;
pub use normalize::{Normalizer, StreamTransform, Transform};
pub use transport::{FetchRequest, LogTransport, MessageStream};
