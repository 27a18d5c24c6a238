//! Port interfaces for the capture worker.
//!
//! Everything here is synchronous: the capture tick runs on a dedicated
//! thread with a hard latency budget and must not depend on an executor.
//! Probe implementations are required to bound themselves with a deadline
//! and report [`trace_domain::TraceError::PlatformUnavailable`] instead of
//! blocking the tick.

use chrono::NaiveDateTime;
use trace_domain::types::{
    BlocklistEntry, EventSpan, ForegroundInfo, LocationInfo, MediaInfo, PageInfo,
    PermissionReport, Screenshot,
};
use trace_domain::Result;

/// A frame sampled from one monitor, not yet deduplicated or persisted.
pub struct RawFrame {
    pub monitor_id: i64,
    pub image: image::DynamicImage,
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("monitor_id", &self.monitor_id)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

/// Result of persisting an accepted frame's blob.
#[derive(Debug, Clone)]
pub struct StoredFrame {
    /// Blob path relative to the data root.
    pub path: String,
    pub width: u32,
    pub height: u32,
}

/// OS-facing samplers. Implementations never leak OS APIs into the core and
/// must be cancellable: an operation exceeding its deadline returns
/// `PlatformUnavailable` without affecting sibling probes.
pub trait PlatformProbes: Send + Sync {
    fn sample_frames(&self) -> Result<Vec<RawFrame>>;

    fn foreground(&self) -> Result<ForegroundInfo>;

    /// URL and title of the frontmost tab when `bundle_id` is a browser.
    fn browser_url(&self, bundle_id: &str) -> Result<Option<PageInfo>>;

    fn now_playing(&self) -> Result<Option<MediaInfo>>;

    fn location(&self) -> Result<Option<LocationInfo>>;

    fn permissions(&self) -> PermissionReport;
}

/// Synchronous persistence used by the capture tick.
pub trait CaptureStore: Send + Sync {
    fn insert_screenshot(&self, screenshot: &Screenshot) -> Result<()>;

    /// Insert or replace the event row (events are rewritten on close).
    fn upsert_event(&self, event: &EventSpan) -> Result<()>;
}

/// Screenshot blob persistence: downscale, encode, write.
pub trait FrameBlobStore: Send + Sync {
    fn store_frame(
        &self,
        frame: &RawFrame,
        ts: NaiveDateTime,
        short_id: &str,
        jpeg_quality: u8,
    ) -> Result<StoredFrame>;

    fn delete_blob(&self, relative_path: &str) -> Result<()>;
}

/// Blocklist row persistence. Upserts conflict on `(block_type, pattern)`.
pub trait BlocklistStore: Send + Sync {
    fn list_entries(&self, include_disabled: bool) -> Result<Vec<BlocklistEntry>>;

    fn upsert_entry(&self, entry: &BlocklistEntry) -> Result<BlocklistEntry>;

    fn remove_entry(&self, blocklist_id: &str) -> Result<bool>;

    fn set_enabled(&self, blocklist_id: &str, enabled: bool) -> Result<bool>;
}
