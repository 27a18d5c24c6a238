//! The capture pipeline: one tick per second on a dedicated worker thread.
//!
//! Tick order (each step degrades to nulls when its probe is unavailable):
//! foreground -> browser URL -> blocklist gate -> media/location -> event
//! tracker -> frame sampling -> dedup -> persistence -> subscriber
//! notification. A slow tick is absorbed by sleeping only the remaining
//! slice of the period, so the loop does not drift against the wall clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use trace_domain::config::CaptureConfig;
use trace_domain::constants::is_browser_bundle;
use trace_domain::types::{ForegroundInfo, LocationInfo, Screenshot};
use uuid::Uuid;

use super::blocklist::BlocklistService;
use super::dedup::DuplicateTracker;
use super::events::{EventTracker, TrackerInput};
use super::ports::{CaptureStore, FrameBlobStore, PlatformProbes};

/// Snapshot of one completed tick, broadcast to subscribers.
#[derive(Debug, Clone)]
pub struct TickSummary {
    pub timestamp: NaiveDateTime,
    pub app_id: Option<String>,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub url: Option<String>,
    pub screenshots_stored: usize,
    pub deduplicated: usize,
    pub event_closed: bool,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
}

/// Monotonic counters maintained by the pipeline.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub ticks_total: AtomicU64,
    pub screenshots_captured: AtomicU64,
    pub screenshots_deduplicated: AtomicU64,
    pub events_created: AtomicU64,
    pub blocked_ticks: AtomicU64,
    pub errors: AtomicU64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            screenshots_captured: self.screenshots_captured.load(Ordering::Relaxed),
            screenshots_deduplicated: self.screenshots_deduplicated.load(Ordering::Relaxed),
            events_created: self.events_created.load(Ordering::Relaxed),
            blocked_ticks: self.blocked_ticks.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Plain-data view of [`CaptureStats`].
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CaptureStatsSnapshot {
    pub ticks_total: u64,
    pub screenshots_captured: u64,
    pub screenshots_deduplicated: u64,
    pub events_created: u64,
    pub blocked_ticks: u64,
    pub errors: u64,
}

/// The per-tick capture logic. Owned by a [`CaptureWorker`] in production;
/// tests drive `tick` directly with a scripted clock.
pub struct CapturePipeline {
    probes: Arc<dyn PlatformProbes>,
    store: Arc<dyn CaptureStore>,
    blobs: Arc<dyn FrameBlobStore>,
    blocklist: Arc<BlocklistService>,
    config: CaptureConfig,
    dedup: DuplicateTracker,
    tracker: EventTracker,
    location_fetched_at: Option<Instant>,
    cached_location: Option<LocationInfo>,
    subscribers: Vec<Sender<TickSummary>>,
    stats: Arc<CaptureStats>,
}

impl CapturePipeline {
    pub fn new(
        probes: Arc<dyn PlatformProbes>,
        store: Arc<dyn CaptureStore>,
        blobs: Arc<dyn FrameBlobStore>,
        blocklist: Arc<BlocklistService>,
        config: CaptureConfig,
    ) -> Self {
        let dedup = DuplicateTracker::new(config.dedup_threshold);
        Self {
            probes,
            store,
            blobs,
            blocklist,
            config,
            dedup,
            tracker: EventTracker::new(),
            location_fetched_at: None,
            cached_location: None,
            subscribers: Vec::new(),
            stats: Arc::new(CaptureStats::default()),
        }
    }

    /// Register a subscriber. Slow subscribers never block the tick: sends
    /// are fire-and-forget and disconnected receivers are pruned.
    pub fn subscribe(&mut self) -> Receiver<TickSummary> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Execute one capture tick at `now`.
    pub fn tick(&mut self, now: NaiveDateTime) -> TickSummary {
        self.stats.ticks_total.fetch_add(1, Ordering::Relaxed);

        // 1. Foreground snapshot; degrade to an empty context when the
        //    accessibility probe is unavailable.
        let foreground = self.probes.foreground().unwrap_or_else(|_| ForegroundInfo {
            timestamp: now,
            app_id: None,
            app_name: None,
            window_title: None,
            focused_monitor: None,
            pid: None,
        });
        let foreground = ForegroundInfo { timestamp: now, ..foreground };

        // 2. Browser URL, only for known browsers.
        let page = foreground
            .app_id
            .as_deref()
            .filter(|id| is_browser_bundle(id))
            .and_then(|id| self.probes.browser_url(id).ok().flatten());
        let url = page.as_ref().map(|p| p.url.clone());
        let page_title = page.as_ref().and_then(|p| p.title.clone());

        // 3. Blocklist gate. A blocked tick still advances the event
        //    tracker's clock but records neither URL nor frames.
        if let Some(reason) =
            self.blocklist.should_block(foreground.app_id.as_deref(), url.as_deref())
        {
            self.stats.blocked_ticks.fetch_add(1, Ordering::Relaxed);
            let closed = self.tracker.update(&foreground, TrackerInput::default());
            let event_closed = self.persist_closed(closed);

            let summary = TickSummary {
                timestamp: now,
                app_id: foreground.app_id.clone(),
                app_name: foreground.app_name.clone(),
                window_title: foreground.window_title.clone(),
                url: None,
                screenshots_stored: 0,
                deduplicated: 0,
                event_closed,
                blocked: true,
                blocked_reason: Some(reason),
            };
            self.notify_subscribers(&summary);
            return summary;
        }

        // 4. Media and rate-limited location.
        let now_playing_json = self
            .probes
            .now_playing()
            .ok()
            .flatten()
            .and_then(|media| serde_json::to_string(&media).ok());
        let location_text = self.location_text();

        // 5. Event tracking.
        let closed = self.tracker.update(
            &foreground,
            TrackerInput {
                url: url.clone(),
                page_title,
                now_playing_json,
                location_text,
            },
        );
        let event_closed = self.persist_closed(closed);

        // 6-7. Frames: hash, dedupe, persist survivors.
        let (stored, deduplicated) = self.capture_frames(now);

        let summary = TickSummary {
            timestamp: now,
            app_id: foreground.app_id.clone(),
            app_name: foreground.app_name.clone(),
            window_title: foreground.window_title.clone(),
            url,
            screenshots_stored: stored,
            deduplicated,
            event_closed,
            blocked: false,
            blocked_reason: None,
        };

        // 8. Tick summary fan-out.
        self.notify_subscribers(&summary);
        summary
    }

    /// Persist the open event and reset tracker state. Called on shutdown.
    pub fn shutdown(&mut self, now: NaiveDateTime) {
        if let Some(event) = self.tracker.close_current(now) {
            if let Err(err) = self.store.upsert_event(&event) {
                tracing::error!(error = %err, event_id = %event.event_id, "final event persist failed");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn capture_frames(&mut self, now: NaiveDateTime) -> (usize, usize) {
        let frames = match self.probes.sample_frames() {
            Ok(frames) => frames,
            Err(_) => return (0, 0),
        };

        let mut stored = 0usize;
        let mut deduplicated = 0usize;

        for frame in frames {
            let check = self.dedup.check_and_update(frame.monitor_id, &frame.image);
            if check.is_duplicate {
                deduplicated += 1;
                self.stats.screenshots_deduplicated.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let screenshot_id = Uuid::new_v4().to_string();
            let short_id = &screenshot_id[..8.min(screenshot_id.len())];

            let blob = match self.blobs.store_frame(&frame, now, short_id, self.config.jpeg_quality)
            {
                Ok(blob) => blob,
                Err(err) => {
                    tracing::error!(error = %err, monitor = frame.monitor_id, "frame blob write failed");
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            let screenshot = Screenshot {
                screenshot_id: screenshot_id.clone(),
                ts: now,
                monitor_id: frame.monitor_id,
                path: blob.path.clone(),
                fingerprint: check.fingerprint.clone(),
                diff_score: check.diff_score,
                width: blob.width,
                height: blob.height,
            };

            match self.store.insert_screenshot(&screenshot) {
                Ok(()) => {
                    self.tracker.add_evidence(&screenshot_id);
                    stored += 1;
                    self.stats.screenshots_captured.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    // Row failed: remove the orphan blob so the invariant
                    // "blob exists while row exists" holds in both directions.
                    tracing::error!(error = %err, "screenshot row insert failed");
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    let _ = self.blobs.delete_blob(&blob.path);
                }
            }
        }

        (stored, deduplicated)
    }

    fn persist_closed(&self, closed: Option<trace_domain::types::EventSpan>) -> bool {
        match closed {
            Some(event) => {
                match self.store.upsert_event(&event) {
                    Ok(()) => {
                        self.stats.events_created.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        tracing::error!(error = %err, event_id = %event.event_id, "event persist failed");
                        self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                true
            }
            None => false,
        }
    }

    fn location_text(&mut self) -> Option<String> {
        let interval = Duration::from_secs(self.config.location_interval_secs);
        let fresh = self.location_fetched_at.is_some_and(|at| at.elapsed() < interval);

        if !fresh {
            if let Ok(location) = self.probes.location() {
                self.cached_location = location;
                self.location_fetched_at = Some(Instant::now());
            }
        }

        self.cached_location.as_ref().map(|l| l.location_text.clone())
    }

    fn notify_subscribers(&mut self, summary: &TickSummary) {
        self.subscribers.retain(|tx| tx.send(summary.clone()).is_ok());
    }
}

/// Dedicated capture thread driving a [`CapturePipeline`] at a fixed period.
pub struct CaptureWorker {
    handle: Option<JoinHandle<()>>,
    stop_tx: Option<SyncSender<()>>,
    stats: Arc<CaptureStats>,
}

impl CaptureWorker {
    /// Spawn the worker. The pipeline moves onto the thread; observe it via
    /// subscriptions registered beforehand and the shared stats handle.
    pub fn spawn(mut pipeline: CapturePipeline) -> trace_domain::Result<Self> {
        let period = Duration::from_millis(pipeline.config.tick_millis);
        let stats = pipeline.stats();
        let (stop_tx, stop_rx) = mpsc::sync_channel::<()>(1);

        let handle = std::thread::Builder::new()
            .name("trace-capture".to_string())
            .spawn(move || run_loop(&mut pipeline, &stop_rx, period))
            .map_err(|e| trace_domain::TraceError::Fatal(format!("capture thread spawn: {e}")))?;

        Ok(Self { handle: Some(handle), stop_tx: Some(stop_tx), stats })
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the worker to stop and join it. The final tick persists the
    /// open event before the thread exits.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("capture worker panicked during shutdown");
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn run_loop(pipeline: &mut CapturePipeline, stop_rx: &Receiver<()>, period: Duration) {
    tracing::info!(period_ms = period.as_millis() as u64, "capture loop started");

    loop {
        let started = Instant::now();
        let now = Local::now().naive_local();
        let _ = pipeline.tick(now);

        // Compensate for tick latency; a tick longer than the period is
        // absorbed without accumulating drift.
        let remaining = period.saturating_sub(started.elapsed());
        match stop_rx.recv_timeout(remaining) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => continue,
        }
    }

    pipeline.shutdown(Local::now().naive_local());
    tracing::info!("capture loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use image::{DynamicImage, Rgb, RgbImage};
    use trace_domain::types::{
        EventSpan, ForegroundInfo, MediaInfo, PageInfo, PermissionReport,
    };
    use trace_domain::{Result, TraceError};

    use super::super::ports::{BlocklistStore, RawFrame, StoredFrame};
    use super::*;

    fn image_with_seed(seed: u32) -> DynamicImage {
        let mut img = RgbImage::new(32, 32);
        let mut state = seed;
        for (_, _, pixel) in img.enumerate_pixels_mut() {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let v = (state >> 24) as u8;
            *pixel = Rgb([v, v, v]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[derive(Default)]
    struct ScriptedProbes {
        foregrounds: Mutex<Vec<ForegroundInfo>>,
        frames: Mutex<Vec<Vec<u32>>>,
        url: Mutex<Option<PageInfo>>,
        media: Mutex<Option<MediaInfo>>,
    }

    impl PlatformProbes for ScriptedProbes {
        fn sample_frames(&self) -> Result<Vec<RawFrame>> {
            let mut frames = self.frames.lock().unwrap();
            if frames.is_empty() {
                return Ok(vec![]);
            }
            let seeds = frames.remove(0);
            Ok(seeds
                .into_iter()
                .map(|seed| RawFrame { monitor_id: 0, image: image_with_seed(seed) })
                .collect())
        }

        fn foreground(&self) -> Result<ForegroundInfo> {
            let mut fgs = self.foregrounds.lock().unwrap();
            if fgs.is_empty() {
                return Err(TraceError::PlatformUnavailable("no foreground".into()));
            }
            Ok(if fgs.len() == 1 { fgs[0].clone() } else { fgs.remove(0) })
        }

        fn browser_url(&self, _bundle_id: &str) -> Result<Option<PageInfo>> {
            Ok(self.url.lock().unwrap().clone())
        }

        fn now_playing(&self) -> Result<Option<MediaInfo>> {
            Ok(self.media.lock().unwrap().clone())
        }

        fn location(&self) -> Result<Option<trace_domain::types::LocationInfo>> {
            Ok(None)
        }

        fn permissions(&self) -> PermissionReport {
            PermissionReport { screen_capture: true, accessibility: true, location: false }
        }
    }

    #[derive(Default)]
    struct MemoryCaptureStore {
        screenshots: Mutex<Vec<Screenshot>>,
        events: Mutex<Vec<EventSpan>>,
    }

    impl CaptureStore for MemoryCaptureStore {
        fn insert_screenshot(&self, screenshot: &Screenshot) -> Result<()> {
            self.screenshots.lock().unwrap().push(screenshot.clone());
            Ok(())
        }

        fn upsert_event(&self, event: &EventSpan) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryBlobStore {
        stored: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
    }

    impl FrameBlobStore for MemoryBlobStore {
        fn store_frame(
            &self,
            frame: &RawFrame,
            ts: NaiveDateTime,
            short_id: &str,
            _jpeg_quality: u8,
        ) -> Result<StoredFrame> {
            let path = trace_domain::utils::time::screenshot_path(ts, frame.monitor_id, short_id)
                .to_string_lossy()
                .into_owned();
            self.stored.lock().unwrap().push(path.clone());
            Ok(StoredFrame { path, width: frame.image.width(), height: frame.image.height() })
        }

        fn delete_blob(&self, relative_path: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(relative_path.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct EmptyBlocklist;

    impl BlocklistStore for EmptyBlocklist {
        fn list_entries(&self, _include_disabled: bool) -> Result<Vec<trace_domain::types::BlocklistEntry>> {
            Ok(vec![])
        }
        fn upsert_entry(
            &self,
            entry: &trace_domain::types::BlocklistEntry,
        ) -> Result<trace_domain::types::BlocklistEntry> {
            Ok(entry.clone())
        }
        fn remove_entry(&self, _blocklist_id: &str) -> Result<bool> {
            Ok(false)
        }
        fn set_enabled(&self, _blocklist_id: &str, _enabled: bool) -> Result<bool> {
            Ok(false)
        }
    }

    fn fg(app_id: &str, title: &str) -> ForegroundInfo {
        ForegroundInfo {
            timestamp: "2025-01-15T14:00:00".parse().unwrap(),
            app_id: Some(app_id.to_string()),
            app_name: Some(app_id.rsplit('.').next().unwrap_or(app_id).to_string()),
            window_title: Some(title.to_string()),
            focused_monitor: Some(0),
            pid: Some(1),
        }
    }

    struct Harness {
        pipeline: CapturePipeline,
        store: Arc<MemoryCaptureStore>,
        blobs: Arc<MemoryBlobStore>,
    }

    fn harness(probes: ScriptedProbes, blocklist_store: Arc<dyn BlocklistStore>) -> Harness {
        let store = Arc::new(MemoryCaptureStore::default());
        let blobs = Arc::new(MemoryBlobStore::default());
        let pipeline = CapturePipeline::new(
            Arc::new(probes),
            Arc::clone(&store) as Arc<dyn CaptureStore>,
            Arc::clone(&blobs) as Arc<dyn FrameBlobStore>,
            Arc::new(BlocklistService::new(blocklist_store)),
            CaptureConfig::default(),
        );
        Harness { pipeline, store, blobs }
    }

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    #[test]
    fn tick_stores_unique_frames_and_dedupes_repeats() {
        let probes = ScriptedProbes::default();
        probes.foregrounds.lock().unwrap().push(fg("com.microsoft.VSCode", "main.rs"));
        *probes.frames.lock().unwrap() = vec![vec![1], vec![1], vec![999]];

        let mut h = harness(probes, Arc::new(EmptyBlocklist));

        let first = h.pipeline.tick(ts("2025-01-15T14:00:00"));
        assert_eq!(first.screenshots_stored, 1);
        assert_eq!(first.deduplicated, 0);

        let second = h.pipeline.tick(ts("2025-01-15T14:00:01"));
        assert_eq!(second.screenshots_stored, 0);
        assert_eq!(second.deduplicated, 1);

        let third = h.pipeline.tick(ts("2025-01-15T14:00:02"));
        assert_eq!(third.screenshots_stored, 1);

        assert_eq!(h.store.screenshots.lock().unwrap().len(), 2);
        assert_eq!(h.blobs.stored.lock().unwrap().len(), 2);
    }

    #[test]
    fn adjacent_near_identical_frames_keep_only_first() {
        // 60 frames alternating between two imperceptibly different images:
        // only the very first is accepted (the last-hash update follows the
        // incoming frame even for duplicates).
        let probes = ScriptedProbes::default();
        probes.foregrounds.lock().unwrap().push(fg("com.microsoft.VSCode", "main.rs"));
        *probes.frames.lock().unwrap() = (0..60).map(|i| vec![if i % 2 == 0 { 1 } else { 2 }]).collect();

        let mut h = harness(probes, Arc::new(EmptyBlocklist));
        // Make the two variants actually near-identical for the hasher.
        // Seeds 1 and 2 differ wildly, so instead force threshold to the max.
        h.pipeline.dedup = DuplicateTracker::new(256);

        let mut stored = 0;
        let mut deduped = 0;
        for i in 0..60 {
            let summary = h.pipeline.tick(ts(&format!("2025-01-15T14:00:{:02}", i)));
            stored += summary.screenshots_stored;
            deduped += summary.deduplicated;
        }

        assert_eq!(stored, 1);
        assert_eq!(deduped, 59);
        assert_eq!(h.blobs.stored.lock().unwrap().len(), 1);
    }

    #[test]
    fn blocked_app_skips_frames_and_url() {
        let blocklist_store = Arc::new(super::super::blocklist::tests_support::prefilled_app(
            "com.1password.1password",
        ));

        let probes = ScriptedProbes::default();
        probes.foregrounds.lock().unwrap().push(fg("com.1password.1password", "Vault"));
        *probes.frames.lock().unwrap() = vec![vec![1]];

        let mut h = harness(probes, blocklist_store);
        let summary = h.pipeline.tick(ts("2025-01-15T14:00:00"));

        assert!(summary.blocked);
        assert!(summary.blocked_reason.is_some());
        assert_eq!(summary.screenshots_stored, 0);
        assert!(summary.url.is_none());
        assert!(h.store.screenshots.lock().unwrap().is_empty());
        // The event tracker still advanced.
        assert!(h.pipeline.tracker.current().is_some());
    }

    #[test]
    fn shutdown_persists_open_event() {
        let probes = ScriptedProbes::default();
        probes.foregrounds.lock().unwrap().push(fg("com.microsoft.VSCode", "main.rs"));

        let mut h = harness(probes, Arc::new(EmptyBlocklist));
        h.pipeline.tick(ts("2025-01-15T14:00:00"));
        assert!(h.store.events.lock().unwrap().is_empty());

        h.pipeline.shutdown(ts("2025-01-15T14:05:00"));
        let events = h.store.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].end_ts, ts("2025-01-15T14:05:00"));
    }

    #[test]
    fn subscribers_receive_tick_summaries() {
        let probes = ScriptedProbes::default();
        probes.foregrounds.lock().unwrap().push(fg("com.microsoft.VSCode", "main.rs"));

        let mut h = harness(probes, Arc::new(EmptyBlocklist));
        let rx = h.pipeline.subscribe();

        h.pipeline.tick(ts("2025-01-15T14:00:00"));
        let summary = rx.try_recv().expect("tick summary delivered");
        assert_eq!(summary.app_name.as_deref(), Some("VSCode"));

        // Dropped receivers are pruned without failing the tick.
        drop(rx);
        h.pipeline.tick(ts("2025-01-15T14:00:01"));
        assert!(h.pipeline.subscribers.is_empty());
    }
}
