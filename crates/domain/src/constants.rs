//! Domain constants shared across the pipeline.

/// Current schema version stamped into note payloads and front-matter.
pub const SUMMARY_SCHEMA_VERSION: i32 = 1;

/// dHash grid size; the fingerprint is `HASH_SIZE * HASH_SIZE` bits.
pub const HASH_SIZE: u32 = 16;

/// Maximum Hamming distance between two fingerprints (16x16 bits).
pub const MAX_HASH_DISTANCE: u32 = HASH_SIZE * HASH_SIZE;

/// Default Hamming threshold at or under which a frame is a duplicate.
pub const DEFAULT_DEDUP_THRESHOLD: u32 = 5;

/// Default capture tick period in milliseconds.
pub const DEFAULT_TICK_MILLIS: u64 = 1_000;

/// Default total token budget for text evidence per hour.
pub const DEFAULT_MAX_TEXT_TOKENS: usize = 4_000;

/// Default per-snippet token cap.
pub const DEFAULT_MAX_SNIPPET_TOKENS: usize = 500;

/// Maximum keyframes selected per hour.
pub const DEFAULT_MAX_KEYFRAMES: usize = 15;

/// Keyframes actually attached to the LLM call.
pub const MAX_KEYFRAMES_FOR_LLM: usize = 10;

/// Minimum seconds between two selected keyframes.
pub const DEFAULT_DIVERSITY_WINDOW_SECS: i64 = 30;

/// Gaps longer than this get a coverage anchor inserted.
pub const DEFAULT_ANCHOR_INTERVAL_SECS: i64 = 300;

/// Rows (screenshots + events) an hour needs before backfill considers it active.
pub const MIN_ACTIVITY_THRESHOLD: i64 = 5;

/// Default backfill lookback in hours.
pub const DEFAULT_BACKFILL_LOOKBACK_HOURS: i64 = 4;

/// Sleep shorter than this (seconds) does not trigger a wake backfill.
pub const WAKE_BACKFILL_MIN_SLEEP_SECS: f64 = 300.0;

/// Supervisor health check interval in seconds.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

/// Restart attempts before a service is marked failed.
pub const MAX_RESTART_ATTEMPTS: u32 = 3;

/// Bound on the pending summarization job queue.
pub const JOB_QUEUE_CAPACITY: usize = 24;

/// Default JPEG quality for stored screenshots.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Screenshots are downscaled to fit within this box before encoding.
pub const MAX_SCREENSHOT_WIDTH: u32 = 1920;
pub const MAX_SCREENSHOT_HEIGHT: u32 = 1080;

/// Minimum interval between location probe fetches, in seconds.
pub const DEFAULT_LOCATION_INTERVAL_SECS: u64 = 300;

/// Cooperative shutdown join timeout in seconds.
pub const SHUTDOWN_JOIN_TIMEOUT_SECS: u64 = 5;

/// Browser bundle identifiers whose URL participates in event context.
pub const BROWSER_BUNDLE_IDS: &[&str] = &[
    "com.apple.Safari",
    "com.google.Chrome",
    "org.mozilla.firefox",
    "com.microsoft.Edge",
    "com.brave.Browser",
    "com.operasoftware.Opera",
];

/// Whether a bundle id belongs to a known browser.
pub fn is_browser_bundle(bundle_id: &str) -> bool {
    BROWSER_BUNDLE_IDS.contains(&bundle_id)
}
