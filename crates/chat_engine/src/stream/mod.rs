//! Reply streaming into session messages.

mod aggregator;

pub use aggregator::{FinalizeHook, StreamHandle, StreamOutcome, StreamTarget, StreamingAggregator};
