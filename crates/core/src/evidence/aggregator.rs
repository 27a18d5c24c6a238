//! Evidence aggregation for hourly summarization.
//!
//! Builds the bounded evidence packet the summarizer consumes: clipped
//! events, token-budgeted text snippets, merged now-playing spans, distinct
//! locations, counts and app durations.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use trace_domain::types::MediaInfo;
use trace_domain::utils::time::floor_to_hour;
use trace_domain::Result;

use crate::storage::{EventStore, ScreenshotStore, TextBufferStore};

use super::tokens::TokenCounter;

/// An event clipped to the hour window.
#[derive(Debug, Clone)]
pub struct EventSummary {
    pub event_id: String,
    pub start_ts: NaiveDateTime,
    pub end_ts: NaiveDateTime,
    pub duration_seconds: i64,
    pub app_id: Option<String>,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub url: Option<String>,
    pub page_title: Option<String>,
    pub file_path: Option<String>,
    pub location_text: Option<String>,
    pub now_playing: Option<MediaInfo>,
}

/// A text snippet admitted under the token budget.
#[derive(Debug, Clone)]
pub struct TextSnippet {
    pub text_id: String,
    pub timestamp: NaiveDateTime,
    pub source_type: String,
    pub reference: Option<String>,
    pub text: String,
    pub token_count: usize,
    pub event_id: Option<String>,
}

/// A contiguous span of one `(artist, track)` pair.
#[derive(Debug, Clone)]
pub struct NowPlayingSpan {
    pub start_ts: NaiveDateTime,
    pub end_ts: NaiveDateTime,
    pub track: String,
    pub artist: String,
    pub album: Option<String>,
    pub app: String,
}

impl NowPlayingSpan {
    pub fn duration_secs(&self) -> i64 {
        (self.end_ts - self.start_ts).num_seconds()
    }
}

/// Complete evidence packet for one hour.
#[derive(Debug, Clone)]
pub struct HourlyEvidence {
    pub hour_start: NaiveDateTime,
    pub hour_end: NaiveDateTime,
    pub events: Vec<EventSummary>,
    pub text_snippets: Vec<TextSnippet>,
    pub total_text_tokens: usize,
    pub now_playing_spans: Vec<NowPlayingSpan>,
    /// Distinct location strings, sorted.
    pub locations: Vec<String>,
    pub total_screenshots: i64,
    pub total_events: usize,
    pub total_text_buffers: i64,
    /// App display name -> clipped seconds, deterministic order.
    pub app_durations: BTreeMap<String, i64>,
}

/// Builds [`HourlyEvidence`] packets from the stores.
pub struct EvidenceAggregator {
    events: Arc<dyn EventStore>,
    screenshots: Arc<dyn ScreenshotStore>,
    text_buffers: Arc<dyn TextBufferStore>,
    tokens: Arc<dyn TokenCounter>,
    max_text_tokens: usize,
    max_snippet_tokens: usize,
}

impl EvidenceAggregator {
    pub fn new(
        events: Arc<dyn EventStore>,
        screenshots: Arc<dyn ScreenshotStore>,
        text_buffers: Arc<dyn TextBufferStore>,
        tokens: Arc<dyn TokenCounter>,
        max_text_tokens: usize,
        max_snippet_tokens: usize,
    ) -> Self {
        Self { events, screenshots, text_buffers, tokens, max_text_tokens, max_snippet_tokens }
    }

    /// Aggregate all evidence for the hour containing `hour_start`.
    pub async fn aggregate(&self, hour_start: NaiveDateTime) -> Result<HourlyEvidence> {
        let hour_start = floor_to_hour(hour_start);
        let hour_end = hour_start + Duration::hours(1);

        let events = self.clipped_events(hour_start, hour_end).await?;
        let app_durations = app_durations(&events);
        let locations = distinct_locations(&events);
        let now_playing_spans = merge_now_playing(&events);
        let (text_snippets, total_text_tokens) =
            self.budgeted_snippets(hour_start, hour_end).await?;

        Ok(HourlyEvidence {
            hour_start,
            hour_end,
            total_screenshots: self.screenshots.count_in_range(hour_start, hour_end).await?,
            total_events: events.len(),
            total_text_buffers: self.text_buffers.count_in_range(hour_start, hour_end).await?,
            events,
            text_snippets,
            total_text_tokens,
            now_playing_spans,
            locations,
            app_durations,
        })
    }

    async fn clipped_events(
        &self,
        hour_start: NaiveDateTime,
        hour_end: NaiveDateTime,
    ) -> Result<Vec<EventSummary>> {
        let spans = self.events.events_overlapping(hour_start, hour_end).await?;

        let mut summaries = Vec::with_capacity(spans.len());
        for span in spans {
            let clipped_start = span.start_ts.max(hour_start);
            let clipped_end = span.end_ts.min(hour_end);
            let duration = (clipped_end - clipped_start).num_seconds();
            if duration <= 0 {
                continue;
            }

            summaries.push(EventSummary {
                now_playing: span.now_playing(),
                event_id: span.event_id,
                start_ts: clipped_start,
                end_ts: clipped_end,
                duration_seconds: duration,
                app_id: span.app_id,
                app_name: span.app_name,
                window_title: span.window_title,
                url: span.url,
                page_title: span.page_title,
                file_path: span.file_path,
                location_text: span.location_text,
            });
        }

        Ok(summaries)
    }

    /// Chronological snippets, each capped at `max_snippet_tokens`, total
    /// capped at `max_text_tokens` with last-in truncation.
    async fn budgeted_snippets(
        &self,
        hour_start: NaiveDateTime,
        hour_end: NaiveDateTime,
    ) -> Result<(Vec<TextSnippet>, usize)> {
        let rows = self.text_buffers.buffers_in_range(hour_start, hour_end).await?;

        let mut snippets = Vec::new();
        let mut total = 0usize;

        for row in rows {
            if total >= self.max_text_tokens {
                break;
            }
            let remaining = self.max_text_tokens - total;
            // Too little budget left to be worth a fragment.
            if (row.token_estimate as usize) > remaining && remaining < 100 {
                break;
            }

            let mut text = row.text;
            let mut count = self.tokens.count(&text);

            if count > self.max_snippet_tokens {
                text = self.tokens.truncate(&text, self.max_snippet_tokens);
                count = self.tokens.count(&text);
            }
            if count > remaining {
                text = self.tokens.truncate(&text, remaining);
                count = self.tokens.count(&text);
            }

            total += count;
            snippets.push(TextSnippet {
                text_id: row.text_id,
                timestamp: row.ts,
                source_type: row.source_type,
                reference: row.reference,
                text,
                token_count: count,
                event_id: row.event_id,
            });
        }

        Ok((snippets, total))
    }
}

fn app_durations(events: &[EventSummary]) -> BTreeMap<String, i64> {
    let mut durations = BTreeMap::new();
    for event in events {
        let name = event
            .app_name
            .clone()
            .or_else(|| event.app_id.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        *durations.entry(name).or_insert(0) += event.duration_seconds;
    }
    durations
}

fn distinct_locations(events: &[EventSummary]) -> Vec<String> {
    let mut locations: Vec<String> =
        events.iter().filter_map(|e| e.location_text.clone()).collect();
    locations.sort();
    locations.dedup();
    locations
}

/// Merge adjacent events with identical `(artist, track)` into spans,
/// already clipped to the hour by the caller.
fn merge_now_playing(events: &[EventSummary]) -> Vec<NowPlayingSpan> {
    let mut spans: Vec<NowPlayingSpan> = Vec::new();

    for event in events {
        let Some(media) = &event.now_playing else {
            continue;
        };
        if media.track.is_empty() || media.artist.is_empty() {
            continue;
        }

        match spans.last_mut() {
            Some(last) if last.track == media.track && last.artist == media.artist => {
                last.end_ts = event.end_ts;
            }
            _ => spans.push(NowPlayingSpan {
                start_ts: event.start_ts,
                end_ts: event.end_ts,
                track: media.track.clone(),
                artist: media.artist.clone(),
                album: media.album.clone(),
                app: media.app.clone(),
            }),
        }
    }

    spans
}

/// Deterministic text rendering of the evidence timeline, shared between the
/// summarization prompt and diagnostics.
pub fn build_timeline_text(evidence: &HourlyEvidence) -> String {
    let mut lines = Vec::new();

    lines.push(format!(
        "## Activity Timeline: {} - {}",
        evidence.hour_start.format("%Y-%m-%d %H:00"),
        evidence.hour_end.format("%H:00")
    ));
    lines.push(String::new());

    for event in &evidence.events {
        let minutes = event.duration_seconds / 60;
        let seconds = event.duration_seconds % 60;
        let app = event
            .app_name
            .as_deref()
            .or(event.app_id.as_deref())
            .unwrap_or("Unknown");

        let mut line = format!(
            "- [{}] ({minutes}m{seconds}s) {app}",
            event.start_ts.format("%H:%M:%S")
        );
        if let Some(title) = &event.window_title {
            line.push_str(&format!(" - {}", truncate_chars(title, 60)));
        }
        if let Some(url) = &event.url {
            line.push_str(&format!(" | URL: {}", truncate_chars(url, 80)));
        }
        if let Some(path) = &event.file_path {
            line.push_str(&format!(" | File: {path}"));
        }
        lines.push(line);
    }

    if !evidence.now_playing_spans.is_empty() {
        lines.push(String::new());
        lines.push("## Media Playing".to_string());
        for span in &evidence.now_playing_spans {
            lines.push(format!(
                "- {} - {} ({}s via {})",
                span.artist,
                span.track,
                span.duration_secs(),
                span.app
            ));
        }
    }

    if !evidence.locations.is_empty() {
        lines.push(String::new());
        lines.push(format!("## Location: {}", evidence.locations.join(", ")));
    }

    if !evidence.app_durations.is_empty() {
        lines.push(String::new());
        lines.push("## App Usage Summary".to_string());
        let mut apps: Vec<(&String, &i64)> = evidence.app_durations.iter().collect();
        apps.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (app, seconds) in apps.into_iter().take(10) {
            let minutes = seconds / 60;
            if minutes > 0 {
                lines.push(format!("- {app}: {minutes}m"));
            }
        }
    }

    lines.join("\n")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use trace_domain::types::EventSpan;

    use super::super::tokens::HeuristicTokenCounter;
    use super::*;
    use crate::storage::{ScreenshotCandidateRow, TextBufferRow};

    struct FakeEvents(Vec<EventSpan>);

    #[async_trait]
    impl EventStore for FakeEvents {
        async fn events_overlapping(
            &self,
            start: NaiveDateTime,
            end: NaiveDateTime,
        ) -> Result<Vec<EventSpan>> {
            Ok(self
                .0
                .iter()
                .filter(|e| e.start_ts < end && e.end_ts > start)
                .cloned()
                .collect())
        }

        async fn count_starting_in(
            &self,
            start: NaiveDateTime,
            end: NaiveDateTime,
        ) -> Result<i64> {
            Ok(self.0.iter().filter(|e| e.start_ts >= start && e.start_ts < end).count() as i64)
        }
    }

    struct FakeScreenshots(i64);

    #[async_trait]
    impl ScreenshotStore for FakeScreenshots {
        async fn count_in_range(&self, _s: NaiveDateTime, _e: NaiveDateTime) -> Result<i64> {
            Ok(self.0)
        }

        async fn candidates_in_range(
            &self,
            _s: NaiveDateTime,
            _e: NaiveDateTime,
        ) -> Result<Vec<ScreenshotCandidateRow>> {
            Ok(vec![])
        }

        async fn delete_older_than(&self, _cutoff: NaiveDateTime) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    struct FakeTextBuffers(Vec<TextBufferRow>);

    #[async_trait]
    impl TextBufferStore for FakeTextBuffers {
        async fn buffers_in_range(
            &self,
            start: NaiveDateTime,
            end: NaiveDateTime,
        ) -> Result<Vec<TextBufferRow>> {
            Ok(self.0.iter().filter(|b| b.ts >= start && b.ts < end).cloned().collect())
        }

        async fn count_in_range(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<i64> {
            Ok(self.0.iter().filter(|b| b.ts >= start && b.ts < end).count() as i64)
        }
    }

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    fn event(id: &str, start: &str, end: &str, app: &str, np: Option<(&str, &str)>) -> EventSpan {
        EventSpan {
            event_id: id.to_string(),
            start_ts: ts(start),
            end_ts: ts(end),
            app_id: Some(format!("com.example.{app}")),
            app_name: Some(app.to_string()),
            window_title: Some(format!("{app} window")),
            focused_monitor: Some(0),
            url: None,
            page_title: None,
            file_path: None,
            location_text: None,
            now_playing_json: np.map(|(artist, track)| {
                format!(r#"{{"track":"{track}","artist":"{artist}","app":"Music"}}"#)
            }),
            evidence_ids: vec![],
        }
    }

    fn buffer(id: &str, at: &str, text: &str) -> TextBufferRow {
        TextBufferRow {
            text_id: id.to_string(),
            ts: ts(at),
            source_type: "ocr".to_string(),
            reference: None,
            text: text.to_string(),
            token_estimate: (text.len() / 4) as i64,
            event_id: None,
        }
    }

    fn aggregator(
        events: Vec<EventSpan>,
        buffers: Vec<TextBufferRow>,
        max_text: usize,
        max_snippet: usize,
    ) -> EvidenceAggregator {
        EvidenceAggregator::new(
            Arc::new(FakeEvents(events)),
            Arc::new(FakeScreenshots(12)),
            Arc::new(FakeTextBuffers(buffers)),
            Arc::new(HeuristicTokenCounter),
            max_text,
            max_snippet,
        )
    }

    #[tokio::test]
    async fn clips_events_to_hour_and_sums_app_durations() {
        let agg = aggregator(
            vec![
                // Straddles the hour start: clipped to 14:00.
                event("e1", "2025-01-15T13:50:00", "2025-01-15T14:30:00", "VSCode", None),
                event("e2", "2025-01-15T14:30:00", "2025-01-15T14:45:00", "Safari", None),
                // Entirely outside: dropped.
                event("e3", "2025-01-15T15:10:00", "2025-01-15T15:20:00", "Mail", None),
            ],
            vec![],
            4000,
            500,
        );

        let evidence = agg.aggregate(ts("2025-01-15T14:05:00")).await.unwrap();

        assert_eq!(evidence.hour_start, ts("2025-01-15T14:00:00"));
        assert_eq!(evidence.total_events, 2);
        assert_eq!(evidence.app_durations["VSCode"], 30 * 60);
        assert_eq!(evidence.app_durations["Safari"], 15 * 60);
        assert_eq!(evidence.total_screenshots, 12);
    }

    #[tokio::test]
    async fn text_budget_is_enforced() {
        // Each buffer is ~250 tokens; budget 400 admits one whole and one
        // truncated snippet.
        let big = "z".repeat(1000);
        let agg = aggregator(
            vec![],
            vec![
                buffer("t1", "2025-01-15T14:01:00", &big),
                buffer("t2", "2025-01-15T14:02:00", &big),
                buffer("t3", "2025-01-15T14:03:00", &big),
            ],
            400,
            500,
        );

        let evidence = agg.aggregate(ts("2025-01-15T14:00:00")).await.unwrap();

        assert!(evidence.total_text_tokens <= 400);
        let recounted: usize = evidence.text_snippets.iter().map(|s| s.token_count).sum();
        assert_eq!(recounted, evidence.total_text_tokens);
        assert!(evidence.text_snippets.len() < 3);
        assert!(evidence.text_snippets.last().unwrap().text.ends_with("..."));
    }

    #[tokio::test]
    async fn per_snippet_cap_truncates() {
        let big = "z".repeat(4000); // ~1000 tokens
        let agg = aggregator(vec![], vec![buffer("t1", "2025-01-15T14:01:00", &big)], 4000, 100);

        let evidence = agg.aggregate(ts("2025-01-15T14:00:00")).await.unwrap();
        assert_eq!(evidence.text_snippets.len(), 1);
        assert!(evidence.text_snippets[0].token_count <= 100);
    }

    #[tokio::test]
    async fn adjacent_identical_tracks_merge_into_one_span() {
        let agg = aggregator(
            vec![
                event("e1", "2025-01-15T14:00:00", "2025-01-15T14:10:00", "A", Some(("X", "Y"))),
                event("e2", "2025-01-15T14:10:00", "2025-01-15T14:20:00", "B", Some(("X", "Y"))),
                event("e3", "2025-01-15T14:20:00", "2025-01-15T14:25:00", "C", Some(("X", "Z"))),
            ],
            vec![],
            4000,
            500,
        );

        let evidence = agg.aggregate(ts("2025-01-15T14:00:00")).await.unwrap();
        assert_eq!(evidence.now_playing_spans.len(), 2);

        let first = &evidence.now_playing_spans[0];
        assert_eq!((first.artist.as_str(), first.track.as_str()), ("X", "Y"));
        assert_eq!(first.duration_secs(), 20 * 60);
    }

    #[tokio::test]
    async fn timeline_text_is_deterministic() {
        let agg = aggregator(
            vec![event("e1", "2025-01-15T14:00:00", "2025-01-15T14:30:00", "VSCode", None)],
            vec![],
            4000,
            500,
        );
        let evidence = agg.aggregate(ts("2025-01-15T14:00:00")).await.unwrap();

        let text = build_timeline_text(&evidence);
        assert!(text.starts_with("## Activity Timeline: 2025-01-15 14:00 - 15:00"));
        assert!(text.contains("(30m0s) VSCode"));
        assert!(text.contains("## App Usage Summary"));
        assert_eq!(text, build_timeline_text(&evidence));
    }
}
