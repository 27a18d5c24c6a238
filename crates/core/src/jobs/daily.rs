//! Daily revision: compact the day's hourly notes into a daily rollup,
//! recompute day-level aggregates, and report the retention cutoff.
//!
//! The rollup reuses the hourly payload schema so one renderer, one
//! validator and one embedding projection serve both granularities.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use trace_domain::types::{
    Aggregate, AggregateKeyType, EmbeddingRecord, HourlySummary, Note, NoteType, PeriodType,
};
use trace_domain::utils::time::{day_note_path, end_of_day, start_of_day};
use trace_domain::{Result, TraceError};
use uuid::Uuid;

use crate::storage::{AggregateStore, EmbeddingIndex, NoteStore};
use crate::summarize::embedding_text::build_embedding_text;
use crate::summarize::ports::{Embedder, NoteFiles};
use crate::summarize::render::MarkdownRenderer;

/// Outcome of one daily revision.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DailyRevision {
    pub note_id: Option<String>,
    pub hours_compacted: usize,
    pub aggregates_written: usize,
}

/// Compacts hourly notes into daily rollups.
pub struct DailyReviser {
    notes: Arc<dyn NoteStore>,
    aggregates: Arc<dyn AggregateStore>,
    embeddings: Arc<dyn EmbeddingIndex>,
    files: Arc<dyn NoteFiles>,
    embedder: Option<Arc<dyn Embedder>>,
    renderer: MarkdownRenderer,
}

impl DailyReviser {
    pub fn new(
        notes: Arc<dyn NoteStore>,
        aggregates: Arc<dyn AggregateStore>,
        embeddings: Arc<dyn EmbeddingIndex>,
        files: Arc<dyn NoteFiles>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self { notes, aggregates, embeddings, files, embedder, renderer: MarkdownRenderer }
    }

    /// Revise one day. Re-running replaces the existing rollup (the daily
    /// job is idempotent on the `(day, start_ts)` key).
    pub async fn revise_day(&self, day: NaiveDate) -> Result<DailyRevision> {
        let day_start = start_of_day(day.and_hms_opt(0, 0, 0).unwrap_or_default());
        let day_end = day_start + Duration::days(1);

        let hourly = self
            .notes
            .notes_in_range(Some(NoteType::Hour), day_start, day_end)
            .await?;

        if hourly.is_empty() {
            return Ok(DailyRevision { note_id: None, hours_compacted: 0, aggregates_written: 0 });
        }

        let payloads: Vec<HourlySummary> =
            hourly.iter().filter_map(|n| n.payload().ok()).collect();
        let summary = compact_payloads(&payloads);

        let note_id = Uuid::new_v4().to_string();
        let file_path = day_note_path(day).to_string_lossy().into_owned();
        let markdown = self.renderer.render(
            &summary,
            &note_id,
            NoteType::Day,
            day_start,
            end_of_day(day_start),
            None,
        );
        self.files.write_note(&file_path, &markdown).await?;

        let now = chrono::Local::now().naive_local();
        self.notes
            .insert_note(&Note {
                note_id: note_id.clone(),
                note_type: NoteType::Day,
                start_ts: day_start,
                end_ts: day_end,
                file_path,
                json_payload: serde_json::to_string(&summary)
                    .map_err(|e| TraceError::SchemaInvalid(e.to_string()))?,
                created_ts: now,
                updated_ts: now,
            })
            .await?;

        if let Some(embedder) = self.embedder.as_ref() {
            let text = build_embedding_text(&summary, Some(day_start));
            let vector = embedder.embed(&text).await?;
            self.embeddings
                .upsert(&EmbeddingRecord {
                    embedding_id: Uuid::new_v4().to_string(),
                    source_type: "note".to_string(),
                    source_id: note_id.clone(),
                    vector,
                    model_name: embedder.model_name().to_string(),
                })
                .await?;
        }

        let aggregates_written =
            self.recompute_day_aggregates(day_start, day_end).await?;

        Ok(DailyRevision {
            note_id: Some(note_id),
            hours_compacted: hourly.len(),
            aggregates_written,
        })
    }

    /// Roll the hour rows inside the day up into `period_type = day` rows,
    /// then delete the compacted hour rows so overlap queries never count
    /// both granularities.
    async fn recompute_day_aggregates(
        &self,
        day_start: NaiveDateTime,
        day_end: NaiveDateTime,
    ) -> Result<usize> {
        let mut rollups: Vec<Aggregate> = Vec::new();

        for key_type in AggregateKeyType::ALL {
            let sums = self
                .aggregates
                .top_by_key_type(*key_type, Some((day_start, day_end)), 100)
                .await?;

            for sum in sums {
                rollups.push(Aggregate {
                    period_type: PeriodType::Day,
                    period_start_ts: day_start,
                    period_end_ts: day_end,
                    key_type: *key_type,
                    key: sum.key,
                    value_num: sum.total,
                    extra_json: None,
                });
            }
        }

        self.aggregates
            .delete_period_rows(PeriodType::Hour, day_start, day_end)
            .await?;
        for rollup in &rollups {
            self.aggregates.record(rollup).await?;
        }

        Ok(rollups.len())
    }
}

/// Merge hourly payloads into one day-level payload.
fn compact_payloads(payloads: &[HourlySummary]) -> HourlySummary {
    let mut categories: Vec<String> = Vec::new();
    let mut topics: BTreeMap<String, trace_domain::types::TopicItem> = BTreeMap::new();
    let mut entities: BTreeMap<(String, String), trace_domain::types::SummaryEntity> =
        BTreeMap::new();
    let mut summary_lines: Vec<String> = Vec::new();
    let mut media = trace_domain::types::MediaSection::default();
    let mut documents: Vec<trace_domain::types::DocumentItem> = Vec::new();
    let mut websites: BTreeMap<String, trace_domain::types::WebsiteItem> = BTreeMap::new();
    let mut activities = Vec::new();
    let mut open_loops: Vec<String> = Vec::new();
    let mut location = None;

    for payload in payloads {
        // Empty-hour skeletons dilute the rollup; keep only active hours.
        if payload.activities.is_empty() && payload.summary.starts_with("No activity") {
            continue;
        }

        summary_lines.push(payload.summary.clone());

        for category in &payload.categories {
            if !categories.contains(category) {
                categories.push(category.clone());
            }
        }

        for topic in &payload.topics {
            let entry = topics.entry(topic.name.to_lowercase()).or_insert_with(|| topic.clone());
            if topic.confidence > entry.confidence {
                *entry = topic.clone();
            }
        }

        for entity in &payload.entities {
            entities
                .entry((entity.r#type.clone(), entity.name.to_lowercase()))
                .or_insert_with(|| entity.clone());
        }

        media.listening.extend(payload.media.listening.iter().cloned());
        media.watching.extend(payload.media.watching.iter().cloned());

        for doc in &payload.documents {
            if !documents.iter().any(|d| d.name == doc.name) {
                documents.push(doc.clone());
            }
        }

        for site in &payload.websites {
            websites.entry(site.domain.clone()).or_insert_with(|| site.clone());
        }

        activities.extend(payload.activities.iter().cloned());

        for loop_item in &payload.open_loops {
            if !open_loops.iter().any(|l| l.eq_ignore_ascii_case(loop_item)) {
                open_loops.push(loop_item.clone());
            }
        }

        if location.is_none() {
            location = payload.location.clone();
        }
    }

    HourlySummary {
        schema_version: trace_domain::constants::SUMMARY_SCHEMA_VERSION,
        summary: if summary_lines.is_empty() {
            "No activity recorded for this day.".to_string()
        } else {
            summary_lines.join(" ")
        },
        categories,
        activities,
        topics: topics.into_values().collect(),
        entities: entities.into_values().collect(),
        media,
        documents,
        websites: websites.into_values().collect(),
        co_activities: vec![],
        open_loops,
        location,
    }
}

#[cfg(test)]
mod tests {
    use trace_domain::types::TopicItem;

    use super::*;
    use crate::storage::NoteStore as _;
    use crate::testing::{MemoryAggregates, MemoryEmbeddings, MemoryFiles, MemoryNotes};

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    fn hour_note(id: &str, start: &str, summary: &HourlySummary) -> Note {
        Note {
            note_id: id.to_string(),
            note_type: NoteType::Hour,
            start_ts: ts(start),
            end_ts: ts(start) + Duration::hours(1),
            file_path: format!("notes/{id}.md"),
            json_payload: serde_json::to_string(summary).unwrap(),
            created_ts: ts(start),
            updated_ts: ts(start),
        }
    }

    fn payload(summary: &str, topics: &[(&str, f64)]) -> HourlySummary {
        let mut out = crate::summarize::schema::empty_summary(
            ts("2025-01-15T14:00:00"),
            ts("2025-01-15T15:00:00"),
            "No activity detected",
        );
        out.summary = summary.to_string();
        out.categories = vec!["work".to_string()];
        out.activities = vec![trace_domain::types::ActivityItem {
            time_start: "14:00".into(),
            time_end: "15:00".into(),
            description: summary.to_string(),
            app: Some("VS Code".into()),
            category: "work".into(),
        }];
        out.topics = topics
            .iter()
            .map(|(name, confidence)| TopicItem {
                name: (*name).to_string(),
                context: None,
                confidence: *confidence,
            })
            .collect();
        out
    }

    struct Fixture {
        reviser: DailyReviser,
        notes: Arc<MemoryNotes>,
        aggregates: Arc<MemoryAggregates>,
        files: Arc<MemoryFiles>,
    }

    fn fixture() -> Fixture {
        let notes = Arc::new(MemoryNotes::default());
        let aggregates = Arc::new(MemoryAggregates::default());
        let embeddings = Arc::new(MemoryEmbeddings::default());
        let files = Arc::new(MemoryFiles::default());

        let reviser = DailyReviser::new(
            notes.clone(),
            aggregates.clone(),
            embeddings,
            files.clone(),
            None,
        );

        Fixture { reviser, notes, aggregates, files }
    }

    #[tokio::test]
    async fn compacts_hourly_notes_into_day_rollup() {
        let fixture = fixture();
        fixture
            .notes
            .insert_note(&hour_note(
                "h14",
                "2025-01-15T14:00:00",
                &payload("Coded in the afternoon.", &[("rust", 0.7)]),
            ))
            .await
            .unwrap();
        fixture
            .notes
            .insert_note(&hour_note(
                "h15",
                "2025-01-15T15:00:00",
                &payload("Reviewed pull requests.", &[("rust", 0.9), ("git", 0.6)]),
            ))
            .await
            .unwrap();

        let revision = fixture
            .reviser
            .revise_day("2025-01-15".parse().unwrap())
            .await
            .unwrap();

        assert_eq!(revision.hours_compacted, 2);
        let note_id = revision.note_id.unwrap();

        let day_notes = fixture
            .notes
            .notes_in_range(
                Some(NoteType::Day),
                ts("2025-01-15T00:00:00"),
                ts("2025-01-16T00:00:00"),
            )
            .await
            .unwrap();
        assert_eq!(day_notes.len(), 1);
        assert_eq!(day_notes[0].note_id, note_id);

        let rollup = day_notes[0].payload().unwrap();
        assert!(rollup.summary.contains("Coded in the afternoon."));
        assert!(rollup.summary.contains("Reviewed pull requests."));
        // Topic deduped to the highest confidence.
        let rust = rollup.topics.iter().find(|t| t.name == "rust").unwrap();
        assert!((rust.confidence - 0.9).abs() < 1e-9);

        // The index.md file was written.
        let files = fixture.files.written.lock().unwrap();
        assert_eq!(files[0].0, "notes/2025/01/15/index.md");
    }

    #[tokio::test]
    async fn empty_day_writes_nothing() {
        let fixture = fixture();
        let revision = fixture
            .reviser
            .revise_day("2025-01-15".parse().unwrap())
            .await
            .unwrap();

        assert!(revision.note_id.is_none());
        assert_eq!(revision.hours_compacted, 0);
        assert!(fixture.files.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn day_aggregates_are_recomputed_from_hours() {
        use trace_domain::types::PeriodType;

        let fixture = fixture();
        fixture
            .notes
            .insert_note(&hour_note(
                "h14",
                "2025-01-15T14:00:00",
                &payload("Working.", &[]),
            ))
            .await
            .unwrap();

        // Two hour rows for the same app.
        for (start, secs) in [("2025-01-15T14:00:00", 1800.0), ("2025-01-15T15:00:00", 900.0)] {
            fixture
                .aggregates
                .record(&Aggregate {
                    period_type: PeriodType::Hour,
                    period_start_ts: ts(start),
                    period_end_ts: ts(start) + Duration::hours(1),
                    key_type: AggregateKeyType::App,
                    key: "VS Code".into(),
                    value_num: secs,
                    extra_json: None,
                })
                .await
                .unwrap();
        }

        fixture.reviser.revise_day("2025-01-15".parse().unwrap()).await.unwrap();

        let rows = fixture.aggregates.rows.lock().unwrap();
        let day_row = rows
            .iter()
            .find(|r| r.period_type == PeriodType::Day && r.key == "VS Code")
            .expect("day rollup row");
        assert!((day_row.value_num - 2700.0).abs() < 1e-9);
    }
}
