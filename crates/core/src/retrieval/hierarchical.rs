//! Two-stage hierarchical search: daily summaries first, then hourly
//! drill-down per matched day.
//!
//! Daily notes are a coarse filter over far fewer documents; hourly search
//! only runs inside the days that matched. When no daily rollups exist yet
//! but a time filter is present, the engine falls back to direct hourly
//! search grouped by date.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use trace_domain::types::NoteType;
use trace_domain::utils::time::{end_of_day, start_of_day};
use trace_domain::Result;

use crate::summarize::ports::Embedder;

use super::search::{NoteMatch, VectorSearcher};
use super::time::TimeFilter;

/// A matched day with its hourly drill-downs.
#[derive(Debug, Clone)]
pub struct DayMatch {
    pub date: NaiveDate,
    /// The daily rollup note; `None` for fallback matches built from hourly
    /// notes only.
    pub daily_note: Option<NoteMatch>,
    pub hourly_notes: Vec<NoteMatch>,
    pub relevance_score: f64,
}

/// Result of a hierarchical search.
#[derive(Debug, Clone)]
pub struct HierarchicalSearchResult {
    pub query: String,
    pub day_matches: Vec<DayMatch>,
    pub time_filter: Option<TimeFilter>,
}

impl HierarchicalSearchResult {
    /// Flat note list for LLM context: daily summaries first, then hourly
    /// details per day, capped at `max_notes`.
    pub fn context_for_llm(&self, max_notes: usize) -> Vec<NoteMatch> {
        let mut notes = Vec::new();

        for day in &self.day_matches {
            if notes.len() >= max_notes {
                return notes;
            }
            if let Some(daily) = &day.daily_note {
                notes.push(daily.clone());
            }
        }

        for day in &self.day_matches {
            for hourly in &day.hourly_notes {
                if notes.len() >= max_notes {
                    return notes;
                }
                notes.push(hourly.clone());
            }
        }

        notes
    }
}

/// The two-stage searcher.
pub struct HierarchicalSearcher {
    searcher: Arc<VectorSearcher>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl HierarchicalSearcher {
    pub fn new(searcher: Arc<VectorSearcher>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { searcher, embedder }
    }

    pub async fn search(
        &self,
        query: &str,
        time_filter: Option<&TimeFilter>,
        max_days: usize,
        max_hours_per_day: usize,
    ) -> Result<HierarchicalSearchResult> {
        let Some(embedder) = self.embedder.as_ref() else {
            return Ok(HierarchicalSearchResult {
                query: query.to_string(),
                day_matches: vec![],
                time_filter: time_filter.cloned(),
            });
        };

        let vector = embedder.embed(query).await?;

        // Stage A: daily notes only.
        let daily_matches = self
            .searcher
            .search_with_vector(&vector, Some(NoteType::Day), time_filter, max_days * 2, 0.0)
            .await?;

        let mut day_matches: Vec<DayMatch> = Vec::new();
        let mut seen_dates: Vec<NaiveDate> = Vec::new();

        for daily in daily_matches {
            if day_matches.len() >= max_days {
                break;
            }
            let date = daily.start_ts.date();
            if seen_dates.contains(&date) {
                continue;
            }
            seen_dates.push(date);

            // Stage B: hourly notes clipped to the day, intersected with any
            // caller-provided filter.
            let hourly = self
                .hourly_for_day(&vector, date, time_filter, max_hours_per_day)
                .await?;

            let relevance = if hourly.is_empty() {
                daily.score
            } else {
                let mean: f64 =
                    hourly.iter().map(|h| h.score).sum::<f64>() / hourly.len() as f64;
                daily.score * 0.6 + mean * 0.4
            };

            day_matches.push(DayMatch {
                date,
                daily_note: Some(daily),
                hourly_notes: hourly,
                relevance_score: relevance,
            });
        }

        // Fallback: no daily rollups but a bounded window was requested.
        if day_matches.is_empty() {
            if let Some(filter) = time_filter {
                day_matches = self
                    .fallback_hourly(&vector, filter, max_days, max_hours_per_day)
                    .await?;
            }
        }

        day_matches.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        day_matches.truncate(max_days);

        Ok(HierarchicalSearchResult {
            query: query.to_string(),
            day_matches,
            time_filter: time_filter.cloned(),
        })
    }

    async fn hourly_for_day(
        &self,
        vector: &[f32],
        date: NaiveDate,
        time_filter: Option<&TimeFilter>,
        limit: usize,
    ) -> Result<Vec<NoteMatch>> {
        let mut day_start = start_of_day(date.and_hms_opt(0, 0, 0).unwrap_or_default());
        let mut day_end = end_of_day(day_start);

        if let Some(filter) = time_filter {
            day_start = day_start.max(filter.start);
            day_end = day_end.min(filter.end);
            if day_start > day_end {
                return Ok(vec![]);
            }
        }

        let clip = TimeFilter {
            start: day_start,
            end: day_end,
            description: format!("day {date}"),
            confidence: 1.0,
        };

        self.searcher
            .search_with_vector(vector, Some(NoteType::Hour), Some(&clip), limit, 0.0)
            .await
    }

    async fn fallback_hourly(
        &self,
        vector: &[f32],
        filter: &TimeFilter,
        max_days: usize,
        max_hours_per_day: usize,
    ) -> Result<Vec<DayMatch>> {
        let matches = self
            .searcher
            .search_with_vector(
                vector,
                Some(NoteType::Hour),
                Some(filter),
                max_days * max_hours_per_day,
                0.0,
            )
            .await?;

        let mut grouped: Vec<(NaiveDate, Vec<NoteMatch>)> = Vec::new();
        for note in matches {
            let date = note.start_ts.date();
            match grouped.iter_mut().find(|(d, _)| *d == date) {
                Some((_, notes)) => notes.push(note),
                None => grouped.push((date, vec![note])),
            }
        }

        let mut day_matches = Vec::new();
        for (date, mut hourly) in grouped.into_iter().take(max_days) {
            hourly.truncate(max_hours_per_day);
            let relevance = if hourly.is_empty() {
                0.0
            } else {
                hourly.iter().map(|h| h.score).sum::<f64>() / hourly.len() as f64
            };
            day_matches.push(DayMatch {
                date,
                daily_note: None,
                hourly_notes: hourly,
                relevance_score: relevance,
            });
        }

        Ok(day_matches)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Duration;
    use trace_domain::types::{EmbeddingRecord, Note};

    use super::*;
    use crate::retrieval::time::parse_time_filter;
    use crate::storage::{EmbeddingIndex, NoteStore};
    use crate::testing::{MemoryEmbeddings, MemoryGraph, MemoryNotes};

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn model_name(&self) -> &str {
            "unit"
        }
    }

    fn note(id: &str, note_type: NoteType, start: &str, hours: i64) -> Note {
        let start_ts: NaiveDateTime = start.parse().unwrap();
        Note {
            note_id: id.to_string(),
            note_type,
            start_ts,
            end_ts: start_ts + Duration::hours(hours),
            file_path: format!("notes/{id}.md"),
            json_payload: serde_json::json!({"summary": format!("note {id}")}).to_string(),
            created_ts: start_ts,
            updated_ts: start_ts,
        }
    }

    /// Embed a note with a vector at `angle` similarity to the unit query.
    async fn embed(index: &MemoryEmbeddings, id: &str, similarity: f32) {
        let other = (1.0 - similarity * similarity).max(0.0).sqrt();
        index
            .upsert(&EmbeddingRecord {
                embedding_id: format!("e-{id}"),
                source_type: "note".into(),
                source_id: id.to_string(),
                vector: vec![similarity, other],
                model_name: "unit".into(),
            })
            .await
            .unwrap();
    }

    struct Fixture {
        hierarchical: HierarchicalSearcher,
        notes: Arc<MemoryNotes>,
        index: Arc<MemoryEmbeddings>,
    }

    fn fixture() -> Fixture {
        let notes = Arc::new(MemoryNotes::default());
        let graph = Arc::new(MemoryGraph::default());
        let index = Arc::new(MemoryEmbeddings::default());
        let embedder: Arc<dyn Embedder> = Arc::new(UnitEmbedder);

        let searcher = Arc::new(VectorSearcher::new(
            notes.clone(),
            graph,
            index.clone(),
            Some(embedder.clone()),
        ));
        let hierarchical = HierarchicalSearcher::new(searcher, Some(embedder));

        Fixture { hierarchical, notes, index }
    }

    #[tokio::test]
    async fn two_stage_search_blends_scores() {
        let fixture = fixture();

        // One day with a rollup plus two hourly notes.
        fixture
            .notes
            .insert_note(&note("day-15", NoteType::Day, "2025-01-15T00:00:00", 24))
            .await
            .unwrap();
        fixture
            .notes
            .insert_note(&note("h-14", NoteType::Hour, "2025-01-15T14:00:00", 1))
            .await
            .unwrap();
        fixture
            .notes
            .insert_note(&note("h-15", NoteType::Hour, "2025-01-15T15:00:00", 1))
            .await
            .unwrap();

        embed(&fixture.index, "day-15", 0.95).await;
        embed(&fixture.index, "h-14", 0.9).await;
        embed(&fixture.index, "h-15", 0.5).await;

        let result = fixture.hierarchical.search("rust", None, 5, 3).await.unwrap();

        assert_eq!(result.day_matches.len(), 1);
        let day = &result.day_matches[0];
        assert_eq!(day.date.to_string(), "2025-01-15");
        assert!(day.daily_note.is_some());
        assert_eq!(day.hourly_notes.len(), 2);

        // Blend: 0.6 * day + 0.4 * mean(hour scores).
        let daily_score = day.daily_note.as_ref().unwrap().score;
        let mean: f64 = day.hourly_notes.iter().map(|h| h.score).sum::<f64>()
            / day.hourly_notes.len() as f64;
        assert!((day.relevance_score - (daily_score * 0.6 + mean * 0.4)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn dates_are_distinct_and_scores_non_increasing() {
        let fixture = fixture();

        for (day, similarity) in [("10", 0.9f32), ("11", 0.7), ("12", 0.5)] {
            let id = format!("day-{day}");
            fixture
                .notes
                .insert_note(&note(&id, NoteType::Day, &format!("2025-01-{day}T00:00:00"), 24))
                .await
                .unwrap();
            embed(&fixture.index, &id, similarity).await;
        }

        let result = fixture.hierarchical.search("anything", None, 5, 2).await.unwrap();

        let dates: Vec<NaiveDate> = result.day_matches.iter().map(|d| d.date).collect();
        let mut unique = dates.clone();
        unique.dedup();
        assert_eq!(dates, unique);

        for pair in result.day_matches.windows(2) {
            assert!(pair[0].relevance_score >= pair[1].relevance_score);
        }
    }

    #[tokio::test]
    async fn falls_back_to_hourly_when_no_daily_notes() {
        let fixture = fixture();

        fixture
            .notes
            .insert_note(&note("h-1", NoteType::Hour, "2025-01-15T09:00:00", 1))
            .await
            .unwrap();
        fixture
            .notes
            .insert_note(&note("h-2", NoteType::Hour, "2025-01-15T10:00:00", 1))
            .await
            .unwrap();
        embed(&fixture.index, "h-1", 0.8).await;
        embed(&fixture.index, "h-2", 0.6).await;

        let reference = "2025-01-15T18:00:00".parse().unwrap();
        let filter = parse_time_filter("today", reference).unwrap();

        let result = fixture.hierarchical.search("work", Some(&filter), 5, 3).await.unwrap();

        assert_eq!(result.day_matches.len(), 1);
        let day = &result.day_matches[0];
        assert!(day.daily_note.is_none());
        assert_eq!(day.hourly_notes.len(), 2);
        assert!(day.relevance_score > 0.0);
    }

    #[tokio::test]
    async fn context_orders_daily_before_hourly() {
        let fixture = fixture();

        fixture
            .notes
            .insert_note(&note("day-15", NoteType::Day, "2025-01-15T00:00:00", 24))
            .await
            .unwrap();
        fixture
            .notes
            .insert_note(&note("h-14", NoteType::Hour, "2025-01-15T14:00:00", 1))
            .await
            .unwrap();
        embed(&fixture.index, "day-15", 0.9).await;
        embed(&fixture.index, "h-14", 0.8).await;

        let result = fixture.hierarchical.search("rust", None, 5, 3).await.unwrap();
        let context = result.context_for_llm(10);

        assert_eq!(context[0].note_type, NoteType::Day);
        assert!(context[1..].iter().all(|n| n.note_type == NoteType::Hour));

        // Cap is respected.
        assert_eq!(result.context_for_llm(1).len(), 1);
    }
}
