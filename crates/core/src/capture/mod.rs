//! Real-time capture pipeline: frame sampling, deduplication, event span
//! tracking and blocklist gating.

pub mod blocklist;
pub mod dedup;
pub mod events;
pub mod pipeline;
pub mod ports;

pub use blocklist::BlocklistService;
pub use dedup::{dhash, hamming_distance, DuplicateCheck, DuplicateTracker};
pub use events::EventTracker;
pub use pipeline::{CapturePipeline, CaptureStats, CaptureWorker, TickSummary};
pub use ports::{
    BlocklistStore, CaptureStore, FrameBlobStore, PlatformProbes, RawFrame, StoredFrame,
};
