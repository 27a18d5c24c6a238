//! Backfill: detect hours with activity but no note, and regenerate them.
//!
//! A "missing hour" is an hour inside the lookback window (excluding the
//! still-accumulating current hour) with no hour-note row and at least
//! `MIN_ACTIVITY_THRESHOLD` rows of raw activity. Backfill runs on startup,
//! after a wake longer than five minutes, and periodically from the
//! supervisor.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use trace_domain::constants::MIN_ACTIVITY_THRESHOLD;
use trace_domain::types::NoteType;
use trace_domain::utils::time::floor_to_hour;
use trace_domain::Result;

use crate::notify::{NotificationLevel, Notifier};
use crate::storage::{EventStore, NoteStore, ScreenshotStore};
use crate::summarize::summarizer::HourlySummarizer;

/// Outcome of a backfill pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BackfillReport {
    pub hours_checked: i64,
    pub hours_missing: usize,
    pub hours_backfilled: usize,
    pub hours_failed: usize,
}

/// Detects and fills gaps in hourly notes.
pub struct BackfillDetector {
    notes: Arc<dyn NoteStore>,
    events: Arc<dyn EventStore>,
    screenshots: Arc<dyn ScreenshotStore>,
    lookback_hours: i64,
}

impl BackfillDetector {
    pub fn new(
        notes: Arc<dyn NoteStore>,
        events: Arc<dyn EventStore>,
        screenshots: Arc<dyn ScreenshotStore>,
        lookback_hours: i64,
    ) -> Self {
        Self { notes, events, screenshots, lookback_hours }
    }

    /// Hours needing backfill, oldest first. The current hour is skipped
    /// because it is still accumulating.
    pub async fn find_missing_hours(&self, now: NaiveDateTime) -> Result<Vec<NaiveDateTime>> {
        let mut missing = Vec::new();

        for offset in 1..=self.lookback_hours {
            let hour_start = floor_to_hour(now - Duration::hours(offset));
            let hour_end = hour_start + Duration::hours(1);

            if self.notes.find_note_id(NoteType::Hour, hour_start).await?.is_some() {
                continue;
            }

            let screenshots = self.screenshots.count_in_range(hour_start, hour_end).await?;
            let events = self.events.count_starting_in(hour_start, hour_end).await?;

            if screenshots + events >= MIN_ACTIVITY_THRESHOLD {
                tracing::debug!(hour = %hour_start, screenshots, events, "missing note detected");
                missing.push(hour_start);
            }
        }

        missing.sort();
        if !missing.is_empty() {
            tracing::info!(count = missing.len(), "found hours with activity but no notes");
        }
        Ok(missing)
    }

    /// Summarize every missing hour in chronological order.
    pub async fn run(
        &self,
        summarizer: &HourlySummarizer,
        notifier: &dyn Notifier,
        now: NaiveDateTime,
    ) -> Result<BackfillReport> {
        let missing = self.find_missing_hours(now).await?;
        let mut report = BackfillReport {
            hours_checked: self.lookback_hours,
            hours_missing: missing.len(),
            ..BackfillReport::default()
        };

        if missing.is_empty() {
            return Ok(report);
        }

        notifier.notify(
            NotificationLevel::Info,
            "Backfill started",
            &format!("Generating {} missing notes", missing.len()),
        );

        for hour in missing {
            match summarizer.summarize_hour(hour, false).await {
                Ok(_) => {
                    report.hours_backfilled += 1;
                }
                Err(err) => {
                    report.hours_failed += 1;
                    tracing::error!(hour = %hour, error = %err, "backfill failed for hour");
                    notifier.notify(
                        NotificationLevel::Error,
                        &format!("Backfill failed for {}", hour.format("%H:%M")),
                        &err.to_string(),
                    );
                }
            }
        }

        if report.hours_backfilled > 0 {
            notifier.notify(
                NotificationLevel::Info,
                "Backfill completed",
                &format!("{} notes generated", report.hours_backfilled),
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use trace_domain::types::{EventSpan, Note};

    use super::*;
    use crate::storage::{NoteStore as _, ScreenshotCandidateRow};
    use crate::testing::MemoryNotes;

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    struct CountingEvents(Mutex<Vec<EventSpan>>);

    #[async_trait]
    impl EventStore for CountingEvents {
        async fn events_overlapping(
            &self,
            start: NaiveDateTime,
            end: NaiveDateTime,
        ) -> Result<Vec<EventSpan>> {
            Ok(self
                .0
                .lock()
                .unwrap()
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
            Ok(self
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.start_ts >= start && e.start_ts < end)
                .count() as i64)
        }
    }

    struct CountingScreenshots(Vec<NaiveDateTime>);

    #[async_trait]
    impl ScreenshotStore for CountingScreenshots {
        async fn count_in_range(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<i64> {
            Ok(self.0.iter().filter(|t| **t >= start && **t < end).count() as i64)
        }

        async fn candidates_in_range(
            &self,
            _start: NaiveDateTime,
            _end: NaiveDateTime,
        ) -> Result<Vec<ScreenshotCandidateRow>> {
            Ok(vec![])
        }

        async fn delete_older_than(&self, _cutoff: NaiveDateTime) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    fn event_at(start: &str) -> EventSpan {
        EventSpan {
            event_id: uuid::Uuid::new_v4().to_string(),
            start_ts: ts(start),
            end_ts: ts(start) + Duration::minutes(10),
            app_id: None,
            app_name: Some("App".into()),
            window_title: None,
            focused_monitor: None,
            url: None,
            page_title: None,
            file_path: None,
            location_text: None,
            now_playing_json: None,
            evidence_ids: vec![],
        }
    }

    fn note_at(start: &str) -> Note {
        let start_ts = ts(start);
        Note {
            note_id: uuid::Uuid::new_v4().to_string(),
            note_type: NoteType::Hour,
            start_ts,
            end_ts: start_ts + Duration::hours(1),
            file_path: "notes/x.md".into(),
            json_payload: serde_json::json!({"summary": "hour"}).to_string(),
            created_ts: start_ts,
            updated_ts: start_ts,
        }
    }

    #[tokio::test]
    async fn detects_hours_with_activity_but_no_note() {
        let notes = Arc::new(MemoryNotes::default());
        // 13:00 has a note; 12:00 and 14:00 do not.
        notes.insert_note(&note_at("2025-01-15T13:00:00")).await.unwrap();

        let events = Arc::new(CountingEvents(Mutex::new(vec![
            event_at("2025-01-15T12:05:00"),
            event_at("2025-01-15T12:15:00"),
            event_at("2025-01-15T13:05:00"),
            event_at("2025-01-15T14:05:00"),
            event_at("2025-01-15T14:10:00"),
            event_at("2025-01-15T14:20:00"),
        ])));
        // 12:00 has 3 screenshots (3 + 2 events = 5 rows, at threshold);
        // 14:00 has 2 (2 + 3 events = 5 rows, at threshold).
        let screenshots = Arc::new(CountingScreenshots(vec![
            ts("2025-01-15T12:10:00"),
            ts("2025-01-15T12:20:00"),
            ts("2025-01-15T12:30:00"),
            ts("2025-01-15T14:15:00"),
            ts("2025-01-15T14:25:00"),
        ]));

        let detector = BackfillDetector::new(notes, events, screenshots, 4);
        let missing = detector.find_missing_hours(ts("2025-01-15T15:30:00")).await.unwrap();

        assert_eq!(
            missing,
            vec![ts("2025-01-15T12:00:00"), ts("2025-01-15T14:00:00")],
            "chronological order, noted hour excluded"
        );
    }

    #[tokio::test]
    async fn below_threshold_hours_are_not_backfilled() {
        let notes = Arc::new(MemoryNotes::default());
        // Exactly threshold - 1 rows in the 14:00 hour.
        let events = Arc::new(CountingEvents(Mutex::new(vec![
            event_at("2025-01-15T14:05:00"),
            event_at("2025-01-15T14:10:00"),
        ])));
        let screenshots = Arc::new(CountingScreenshots(vec![
            ts("2025-01-15T14:15:00"),
            ts("2025-01-15T14:25:00"),
        ]));

        let detector = BackfillDetector::new(notes, events, screenshots, 4);
        let missing = detector.find_missing_hours(ts("2025-01-15T15:30:00")).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn wake_backfill_fills_all_missing_hours() {
        use trace_domain::config::SummarizerConfig;

        use crate::evidence::aggregator::EvidenceAggregator;
        use crate::evidence::tokens::HeuristicTokenCounter;
        use crate::notify::NullNotifier;
        use crate::storage::TextBufferRow;
        use crate::summarize::entities::EntityExtractor;
        use crate::summarize::ports::LanguageModel;
        use crate::summarize::summarizer::HourlySummarizer;
        use crate::testing::{
            MemoryAggregates, MemoryEmbeddings, MemoryFiles, MemoryGraph, MemoryJobs,
            StaticModel,
        };

        struct NoTextBuffers;

        #[async_trait]
        impl crate::storage::TextBufferStore for NoTextBuffers {
            async fn buffers_in_range(
                &self,
                _start: NaiveDateTime,
                _end: NaiveDateTime,
            ) -> Result<Vec<TextBufferRow>> {
                Ok(vec![])
            }

            async fn count_in_range(
                &self,
                _s: NaiveDateTime,
                _e: NaiveDateTime,
            ) -> Result<i64> {
                Ok(0)
            }
        }

        // Three hours (H-3..H-1) carry events but no notes, as after a
        // sleep that spanned their summarization windows.
        let mut spans = Vec::new();
        for hour in 11..14 {
            for minute in [5, 15, 25, 35, 45] {
                spans.push(event_at(&format!("2025-01-15T{hour}:{minute:02}:00")));
            }
        }

        let notes = Arc::new(MemoryNotes::default());
        let events = Arc::new(CountingEvents(Mutex::new(spans)));
        let screenshots = Arc::new(CountingScreenshots(vec![]));
        let graph = Arc::new(MemoryGraph::default());

        let evidence = EvidenceAggregator::new(
            events.clone(),
            screenshots.clone(),
            Arc::new(NoTextBuffers),
            Arc::new(HeuristicTokenCounter),
            4000,
            500,
        );
        let summarizer = HourlySummarizer::new(
            notes.clone(),
            screenshots.clone(),
            Arc::new(MemoryAggregates::default()),
            Arc::new(MemoryEmbeddings::default()),
            Arc::new(MemoryJobs::default()),
            Arc::new(MemoryFiles::default()),
            evidence,
            EntityExtractor::new(graph.clone(), graph),
            Some(Arc::new(StaticModel {
                response: r#"{"summary": "backfilled hour"}"#.to_string(),
            }) as Arc<dyn LanguageModel>),
            None,
            SummarizerConfig { include_images: false, ..SummarizerConfig::default() },
        );

        let detector = BackfillDetector::new(notes, events, screenshots, 4);
        let now = ts("2025-01-15T14:30:00");

        let missing = detector.find_missing_hours(now).await.unwrap();
        assert_eq!(
            missing,
            vec![
                ts("2025-01-15T11:00:00"),
                ts("2025-01-15T12:00:00"),
                ts("2025-01-15T13:00:00"),
            ]
        );

        let report = detector.run(&summarizer, &NullNotifier, now).await.unwrap();
        assert_eq!(report.hours_missing, 3);
        assert_eq!(report.hours_backfilled, 3);
        assert_eq!(report.hours_failed, 0);

        // Once the notes exist, nothing is missing anymore.
        let after = detector.find_missing_hours(now).await.unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn current_hour_is_never_backfilled() {
        let notes = Arc::new(MemoryNotes::default());
        let events = Arc::new(CountingEvents(Mutex::new(vec![
            event_at("2025-01-15T15:05:00"),
            event_at("2025-01-15T15:06:00"),
            event_at("2025-01-15T15:07:00"),
            event_at("2025-01-15T15:08:00"),
            event_at("2025-01-15T15:09:00"),
        ])));
        let screenshots = Arc::new(CountingScreenshots(vec![]));

        let detector = BackfillDetector::new(notes, events, screenshots, 4);
        let missing = detector.find_missing_hours(ts("2025-01-15T15:30:00")).await.unwrap();
        assert!(missing.is_empty());
    }
}
