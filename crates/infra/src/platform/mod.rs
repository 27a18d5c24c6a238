//! Platform probe adapters.
//!
//! The OS sensors themselves live outside this codebase; what ships here is
//! the plumbing around any [`PlatformProbes`] implementation:
//! - [`UnavailableProbes`]: every capability reports unavailable (headless
//!   default, and the degraded mode when permissions are denied).
//! - [`DeadlineProbes`]: wraps an implementation so each call is bounded by
//!   a deadline; an overrun reports unavailable for that tick without
//!   cancelling sibling probes.
//! - [`SleepWakeWatcher`]: clock-jump heartbeat that reports wake events
//!   with the measured sleep duration.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use trace_core::capture::ports::{PlatformProbes, RawFrame};
use trace_domain::types::{
    ForegroundInfo, LocationInfo, MediaInfo, PageInfo, PermissionReport,
};
use trace_domain::{Result, TraceError};

/// Probe set for environments without any OS integration.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableProbes;

impl PlatformProbes for UnavailableProbes {
    fn sample_frames(&self) -> Result<Vec<RawFrame>> {
        Err(TraceError::PlatformUnavailable("screen capture not available".into()))
    }

    fn foreground(&self) -> Result<ForegroundInfo> {
        Err(TraceError::PlatformUnavailable("accessibility not available".into()))
    }

    fn browser_url(&self, _bundle_id: &str) -> Result<Option<PageInfo>> {
        Err(TraceError::PlatformUnavailable("browser probe not available".into()))
    }

    fn now_playing(&self) -> Result<Option<MediaInfo>> {
        Err(TraceError::PlatformUnavailable("media probe not available".into()))
    }

    fn location(&self) -> Result<Option<LocationInfo>> {
        Err(TraceError::PlatformUnavailable("location probe not available".into()))
    }

    fn permissions(&self) -> PermissionReport {
        PermissionReport::default()
    }
}

/// Deadline-bounding wrapper. Each call runs on a helper thread; if it does
/// not answer within the deadline the tick proceeds with "unavailable" and
/// the straggler's eventual result is discarded.
pub struct DeadlineProbes<P> {
    inner: Arc<P>,
    deadline: Duration,
}

impl<P: PlatformProbes + 'static> DeadlineProbes<P> {
    pub fn new(inner: P, deadline: Duration) -> Self {
        Self { inner: Arc::new(inner), deadline }
    }

    fn bounded<T, F>(&self, name: &'static str, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&P) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let inner = Arc::clone(&self.inner);

        let spawned = std::thread::Builder::new()
            .name(format!("probe-{name}"))
            .spawn(move || {
                let _ = tx.try_send(call(&inner));
            });
        if spawned.is_err() {
            return Err(TraceError::PlatformUnavailable(format!("{name}: thread spawn failed")));
        }

        match rx.recv_timeout(self.deadline) {
            Ok(result) => result,
            Err(_) => Err(TraceError::PlatformUnavailable(format!(
                "{name}: deadline of {:?} exceeded",
                self.deadline
            ))),
        }
    }
}

impl<P: PlatformProbes + 'static> PlatformProbes for DeadlineProbes<P> {
    fn sample_frames(&self) -> Result<Vec<RawFrame>> {
        self.bounded("frames", |p| p.sample_frames())
    }

    fn foreground(&self) -> Result<ForegroundInfo> {
        self.bounded("foreground", |p| p.foreground())
    }

    fn browser_url(&self, bundle_id: &str) -> Result<Option<PageInfo>> {
        let bundle_id = bundle_id.to_string();
        self.bounded("browser_url", move |p| p.browser_url(&bundle_id))
    }

    fn now_playing(&self) -> Result<Option<MediaInfo>> {
        self.bounded("now_playing", |p| p.now_playing())
    }

    fn location(&self) -> Result<Option<LocationInfo>> {
        self.bounded("location", |p| p.location())
    }

    fn permissions(&self) -> PermissionReport {
        self.inner.permissions()
    }
}

/// A detected wake event.
#[derive(Debug, Clone)]
pub struct WakeEvent {
    pub wake_time: NaiveDateTime,
    pub sleep_duration: Duration,
}

/// Heartbeat-based sleep detection: a missed heartbeat far larger than the
/// check interval means the host was suspended. Portable fallback for
/// platforms without native sleep/wake notifications.
pub struct SleepWakeWatcher {
    check_interval: Duration,
    /// A gap must exceed interval + slack to count as a sleep.
    slack: Duration,
}

impl SleepWakeWatcher {
    pub fn new(check_interval: Duration) -> Self {
        Self { check_interval, slack: Duration::from_secs(10) }
    }

    /// Spawn the watcher task; wake events arrive on the returned channel
    /// until the cancellation token fires.
    pub fn spawn(
        self,
        cancel: tokio_util::sync::CancellationToken,
    ) -> tokio::sync::mpsc::Receiver<WakeEvent> {
        let (tx, rx) = tokio::sync::mpsc::channel(8);

        tokio::spawn(async move {
            let mut last_beat = Instant::now();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.check_interval) => {}
                }

                let elapsed = last_beat.elapsed();
                last_beat = Instant::now();

                let threshold = self.check_interval + self.slack;
                if elapsed > threshold {
                    let sleep_duration = elapsed - self.check_interval;
                    tracing::info!(
                        sleep_secs = sleep_duration.as_secs(),
                        "wake detected via heartbeat gap"
                    );
                    let event = WakeEvent {
                        wake_time: Local::now().naive_local(),
                        sleep_duration,
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Probe set whose foreground call hangs, for deadline tests.
    struct HangingProbes {
        delay: Duration,
    }

    impl PlatformProbes for HangingProbes {
        fn sample_frames(&self) -> Result<Vec<RawFrame>> {
            Ok(vec![])
        }

        fn foreground(&self) -> Result<ForegroundInfo> {
            std::thread::sleep(self.delay);
            Ok(ForegroundInfo {
                timestamp: Local::now().naive_local(),
                app_id: Some("com.example.slow".into()),
                app_name: Some("Slow".into()),
                window_title: None,
                focused_monitor: None,
                pid: None,
            })
        }

        fn browser_url(&self, _bundle_id: &str) -> Result<Option<PageInfo>> {
            Ok(None)
        }

        fn now_playing(&self) -> Result<Option<MediaInfo>> {
            Ok(None)
        }

        fn location(&self) -> Result<Option<LocationInfo>> {
            Ok(None)
        }

        fn permissions(&self) -> PermissionReport {
            PermissionReport::default()
        }
    }

    #[test]
    fn deadline_converts_overrun_to_unavailable() {
        let probes = DeadlineProbes::new(
            HangingProbes { delay: Duration::from_millis(200) },
            Duration::from_millis(20),
        );

        let err = probes.foreground().unwrap_err();
        assert!(err.is_platform_unavailable());

        // Fast siblings still answer.
        assert!(probes.now_playing().unwrap().is_none());
    }

    #[test]
    fn deadline_passes_fast_results_through() {
        let probes = DeadlineProbes::new(
            HangingProbes { delay: Duration::from_millis(1) },
            Duration::from_millis(500),
        );
        let foreground = probes.foreground().unwrap();
        assert_eq!(foreground.app_name.as_deref(), Some("Slow"));
    }

    #[test]
    fn unavailable_probes_report_unavailable() {
        let probes = UnavailableProbes;
        assert!(probes.foreground().unwrap_err().is_platform_unavailable());
        assert!(probes.sample_frames().unwrap_err().is_platform_unavailable());
        assert!(!probes.permissions().screen_capture);
    }

    #[tokio::test]
    async fn watcher_stops_on_cancel() {
        let cancel = tokio_util::sync::CancellationToken::new();
        let mut rx = SleepWakeWatcher::new(Duration::from_millis(10)).spawn(cancel.clone());

        cancel.cancel();
        // Channel closes once the task exits.
        tokio::time::timeout(Duration::from_secs(1), async {
            while rx.recv().await.is_some() {}
        })
        .await
        .expect("watcher terminated");
    }
}
