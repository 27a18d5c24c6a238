//! Capture-side domain types: probe outputs, screenshots, event spans and
//! text buffers.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Foreground application snapshot from the OS probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForegroundInfo {
    pub timestamp: NaiveDateTime,
    /// Stable application identifier (bundle id on macOS). `None` when the
    /// accessibility probe is unavailable.
    pub app_id: Option<String>,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    /// Opaque display identifier of the focused monitor.
    pub focused_monitor: Option<i64>,
    pub pid: Option<i32>,
}

/// Browser page info resolved for the foreground browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub title: Option<String>,
}

/// Currently playing media reported by the media probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub track: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    pub app: String,
}

/// Resolved location as display text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub location_text: String,
}

/// Capture permission states reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionReport {
    pub screen_capture: bool,
    pub accessibility: bool,
    pub location: bool,
}

/// Immutable record of a captured frame that survived deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    pub screenshot_id: String,
    pub ts: NaiveDateTime,
    pub monitor_id: i64,
    /// Blob path relative to the data root.
    pub path: String,
    /// Hex-encoded 16x16 dHash.
    pub fingerprint: String,
    /// Normalized Hamming distance to the previous frame on this monitor.
    pub diff_score: f64,
    pub width: u32,
    pub height: u32,
}

/// A maximal continuous span of a single activity context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSpan {
    pub event_id: String,
    pub start_ts: NaiveDateTime,
    pub end_ts: NaiveDateTime,
    pub app_id: Option<String>,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub focused_monitor: Option<i64>,
    pub url: Option<String>,
    pub page_title: Option<String>,
    pub file_path: Option<String>,
    pub location_text: Option<String>,
    /// Serialized [`MediaInfo`] observed during the span.
    pub now_playing_json: Option<String>,
    /// Screenshot ids observed while the span was open (weak references).
    pub evidence_ids: Vec<String>,
}

impl EventSpan {
    /// Span duration in whole seconds.
    pub fn duration_secs(&self) -> i64 {
        (self.end_ts - self.start_ts).num_seconds()
    }

    /// Parsed now-playing info, if present and well-formed.
    pub fn now_playing(&self) -> Option<MediaInfo> {
        self.now_playing_json.as_deref().and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Compressed textual evidence (OCR, clipboard, document excerpt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBuffer {
    pub text_id: String,
    pub ts: NaiveDateTime,
    pub source_type: String,
    /// Optional reference (file path, URL) the text came from.
    pub r#ref: Option<String>,
    /// zlib-compressed UTF-8 text.
    #[serde(skip)]
    pub compressed_text: Vec<u8>,
    pub token_estimate: i64,
    pub event_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_duration_and_now_playing() {
        let span = EventSpan {
            event_id: "e1".into(),
            start_ts: "2025-01-15T14:00:00".parse().unwrap(),
            end_ts: "2025-01-15T14:05:30".parse().unwrap(),
            app_id: Some("com.spotify.client".into()),
            app_name: Some("Spotify".into()),
            window_title: None,
            focused_monitor: Some(1),
            url: None,
            page_title: None,
            file_path: None,
            location_text: None,
            now_playing_json: Some(
                r#"{"track":"Song","artist":"Artist","app":"Spotify"}"#.into(),
            ),
            evidence_ids: vec![],
        };

        assert_eq!(span.duration_secs(), 330);
        let media = span.now_playing().unwrap();
        assert_eq!(media.artist, "Artist");
        assert_eq!(media.album, None);
    }
}
