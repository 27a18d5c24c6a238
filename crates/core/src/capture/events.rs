//! Event span tracking.
//!
//! An event is a maximal continuous span of one activity context. The
//! tracker is a small state machine fed once per tick; it never persists
//! anything itself. Closed spans are returned to the pipeline, which owns
//! the write.

use chrono::NaiveDateTime;
use trace_domain::constants::is_browser_bundle;
use trace_domain::types::{EventSpan, ForegroundInfo};
use uuid::Uuid;

/// Per-tick input to the tracker.
#[derive(Debug, Clone, Default)]
pub struct TrackerInput {
    pub url: Option<String>,
    pub page_title: Option<String>,
    pub now_playing_json: Option<String>,
    pub location_text: Option<String>,
}

/// Tracks the single open event span and closes it on context changes.
#[derive(Debug, Default)]
pub struct EventTracker {
    current: Option<EventSpan>,
    previous_foreground: Option<ForegroundInfo>,
    previous_url: Option<String>,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one tick of foreground context. Returns the closed event when a
    /// context change ended the previous span.
    pub fn update(&mut self, foreground: &ForegroundInfo, input: TrackerInput) -> Option<EventSpan> {
        let timestamp = foreground.timestamp;
        let changed = context_changed(
            foreground,
            self.previous_foreground.as_ref(),
            input.url.as_deref(),
            self.previous_url.as_deref(),
        );

        let closed = if changed {
            let closed = self.current.take().map(|mut event| {
                event.end_ts = timestamp;
                event
            });

            self.current = Some(EventSpan {
                event_id: Uuid::new_v4().to_string(),
                start_ts: timestamp,
                end_ts: timestamp,
                app_id: foreground.app_id.clone(),
                app_name: foreground.app_name.clone(),
                window_title: foreground.window_title.clone(),
                focused_monitor: foreground.focused_monitor,
                url: input.url.clone(),
                page_title: input.page_title.clone(),
                file_path: None,
                location_text: input.location_text.clone(),
                now_playing_json: input.now_playing_json.clone(),
                evidence_ids: Vec::new(),
            });

            closed
        } else {
            if let Some(event) = self.current.as_mut() {
                event.end_ts = timestamp;
                if foreground.window_title.is_some() {
                    event.window_title = foreground.window_title.clone();
                }
                if input.now_playing_json.is_some() {
                    event.now_playing_json = input.now_playing_json.clone();
                }
                if input.location_text.is_some() {
                    event.location_text = input.location_text.clone();
                }
            }
            None
        };

        self.previous_foreground = Some(foreground.clone());
        self.previous_url = input.url;

        closed
    }

    /// Link a screenshot to the open span.
    pub fn add_evidence(&mut self, screenshot_id: &str) {
        if let Some(event) = self.current.as_mut() {
            event.evidence_ids.push(screenshot_id.to_string());
        }
    }

    pub fn current(&self) -> Option<&EventSpan> {
        self.current.as_ref()
    }

    /// Force-close the open span (shutdown path). Resets all comparison
    /// state so a restart opens a fresh span.
    pub fn close_current(&mut self, end_ts: NaiveDateTime) -> Option<EventSpan> {
        let closed = self.current.take().map(|mut event| {
            event.end_ts = end_ts.max(event.start_ts);
            event
        });
        self.previous_foreground = None;
        self.previous_url = None;
        closed
    }
}

/// Context-change predicate: app change, meaningful window title change, or
/// URL change while a browser is frontmost.
fn context_changed(
    current: &ForegroundInfo,
    previous: Option<&ForegroundInfo>,
    current_url: Option<&str>,
    previous_url: Option<&str>,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    if current.app_id != previous.app_id {
        return true;
    }

    // Transient empty titles must not flap spans open and closed.
    if current.window_title != previous.window_title {
        let both_present = matches!(
            (&current.window_title, &previous.window_title),
            (Some(c), Some(p)) if !c.is_empty() && !p.is_empty()
        );
        if both_present {
            return true;
        }
    }

    if let Some(app_id) = current.app_id.as_deref() {
        if is_browser_bundle(app_id) && current_url != previous_url {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fg(ts: &str, app_id: &str, title: Option<&str>) -> ForegroundInfo {
        ForegroundInfo {
            timestamp: ts.parse().unwrap(),
            app_id: Some(app_id.to_string()),
            app_name: Some(app_id.rsplit('.').next().unwrap_or(app_id).to_string()),
            window_title: title.map(str::to_string),
            focused_monitor: Some(1),
            pid: Some(42),
        }
    }

    fn with_url(url: Option<&str>) -> TrackerInput {
        TrackerInput { url: url.map(str::to_string), ..TrackerInput::default() }
    }

    #[test]
    fn first_tick_opens_an_event() {
        let mut tracker = EventTracker::new();
        let closed = tracker.update(
            &fg("2025-01-15T14:00:00", "com.microsoft.VSCode", Some("main.rs")),
            TrackerInput::default(),
        );
        assert!(closed.is_none());
        assert_eq!(tracker.current().unwrap().app_name.as_deref(), Some("VSCode"));
    }

    #[test]
    fn app_change_closes_previous_event() {
        let mut tracker = EventTracker::new();
        tracker.update(
            &fg("2025-01-15T14:00:00", "com.microsoft.VSCode", Some("main.rs")),
            TrackerInput::default(),
        );
        tracker.update(
            &fg("2025-01-15T14:00:01", "com.microsoft.VSCode", Some("main.rs")),
            TrackerInput::default(),
        );

        let closed = tracker
            .update(
                &fg("2025-01-15T14:00:02", "com.apple.Safari", Some("GitHub")),
                TrackerInput::default(),
            )
            .expect("event closed");

        assert_eq!(closed.app_id.as_deref(), Some("com.microsoft.VSCode"));
        assert_eq!(closed.end_ts, "2025-01-15T14:00:02".parse().unwrap());
        assert!(closed.end_ts >= closed.start_ts);
        assert_eq!(tracker.current().unwrap().app_id.as_deref(), Some("com.apple.Safari"));
    }

    #[test]
    fn no_change_extends_end_ts() {
        let mut tracker = EventTracker::new();
        tracker.update(
            &fg("2025-01-15T14:00:00", "com.microsoft.VSCode", Some("main.rs")),
            TrackerInput::default(),
        );
        tracker.update(
            &fg("2025-01-15T14:00:05", "com.microsoft.VSCode", Some("main.rs")),
            TrackerInput::default(),
        );

        let current = tracker.current().unwrap();
        assert_eq!(current.start_ts, "2025-01-15T14:00:00".parse().unwrap());
        assert_eq!(current.end_ts, "2025-01-15T14:00:05".parse().unwrap());
    }

    #[test]
    fn empty_title_transition_does_not_close() {
        let mut tracker = EventTracker::new();
        tracker.update(
            &fg("2025-01-15T14:00:00", "com.microsoft.VSCode", Some("main.rs")),
            TrackerInput::default(),
        );
        // Title flickers to None then back; the span must survive both ticks.
        assert!(tracker
            .update(
                &fg("2025-01-15T14:00:01", "com.microsoft.VSCode", None),
                TrackerInput::default(),
            )
            .is_none());
        assert!(tracker
            .update(
                &fg("2025-01-15T14:00:02", "com.microsoft.VSCode", Some("lib.rs")),
                TrackerInput::default(),
            )
            .is_none());
    }

    #[test]
    fn title_change_with_both_present_closes() {
        let mut tracker = EventTracker::new();
        tracker.update(
            &fg("2025-01-15T14:00:00", "com.microsoft.VSCode", Some("main.rs")),
            TrackerInput::default(),
        );
        let closed = tracker.update(
            &fg("2025-01-15T14:00:01", "com.microsoft.VSCode", Some("lib.rs")),
            TrackerInput::default(),
        );
        assert!(closed.is_some());
    }

    #[test]
    fn url_change_closes_only_for_browsers() {
        let mut tracker = EventTracker::new();

        // Browser: URL change closes.
        tracker.update(
            &fg("2025-01-15T14:00:00", "com.apple.Safari", Some("GitHub")),
            with_url(Some("https://github.com")),
        );
        let closed = tracker.update(
            &fg("2025-01-15T14:00:01", "com.apple.Safari", Some("GitHub")),
            with_url(Some("https://docs.rs")),
        );
        assert!(closed.is_some());

        // Non-browser: URL change is ignored.
        let mut tracker = EventTracker::new();
        tracker.update(
            &fg("2025-01-15T14:00:00", "com.microsoft.VSCode", Some("main.rs")),
            with_url(Some("https://a.example")),
        );
        let closed = tracker.update(
            &fg("2025-01-15T14:00:01", "com.microsoft.VSCode", Some("main.rs")),
            with_url(Some("https://b.example")),
        );
        assert!(closed.is_none());
    }

    #[test]
    fn evidence_appends_only_while_open() {
        let mut tracker = EventTracker::new();
        tracker.add_evidence("orphan");
        assert!(tracker.current().is_none());

        tracker.update(
            &fg("2025-01-15T14:00:00", "com.microsoft.VSCode", Some("main.rs")),
            TrackerInput::default(),
        );
        tracker.add_evidence("ss-1");
        tracker.add_evidence("ss-2");
        assert_eq!(tracker.current().unwrap().evidence_ids, vec!["ss-1", "ss-2"]);
    }

    #[test]
    fn close_current_persists_and_resets() {
        let mut tracker = EventTracker::new();
        tracker.update(
            &fg("2025-01-15T14:00:00", "com.microsoft.VSCode", Some("main.rs")),
            TrackerInput::default(),
        );

        let closed = tracker.close_current("2025-01-15T14:10:00".parse().unwrap()).unwrap();
        assert_eq!(closed.end_ts, "2025-01-15T14:10:00".parse().unwrap());
        assert!(tracker.current().is_none());

        // end_ts never regresses below start_ts.
        tracker.update(
            &fg("2025-01-15T15:00:00", "com.apple.Safari", None),
            TrackerInput::default(),
        );
        let clamped = tracker.close_current("2025-01-15T14:00:00".parse().unwrap()).unwrap();
        assert_eq!(clamped.end_ts, clamped.start_ts);
    }
}
