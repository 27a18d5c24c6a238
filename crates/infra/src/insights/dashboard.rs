//! Dashboard data: top usage, daily trend and an hour-of-day heatmap.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::Serialize;
use trace_core::retrieval::aggregates::AggregatesLookup;
use trace_core::retrieval::time::TimeFilter;
use trace_core::storage::NoteStore;
use trace_domain::types::NoteType;
use trace_domain::utils::time::{end_of_day, start_of_day};
use trace_domain::Result;

/// One key/value usage entry.
#[derive(Debug, Clone, Serialize)]
pub struct UsageEntry {
    pub key: String,
    pub value: f64,
}

/// One day on the activity trend.
#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub date: String,
    pub seconds: f64,
}

/// Notes per hour of day, 24 buckets.
#[derive(Debug, Clone, Serialize)]
pub struct HeatmapCell {
    pub hour: u32,
    pub active_notes: usize,
}

/// The full dashboard payload.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardData {
    pub days_back: i64,
    pub top_apps: Vec<UsageEntry>,
    pub top_topics: Vec<UsageEntry>,
    pub top_categories: Vec<UsageEntry>,
    pub trend: Vec<TrendPoint>,
    pub heatmap: Vec<HeatmapCell>,
}

/// Builds dashboard payloads from aggregates and notes.
pub struct DashboardService {
    aggregates: Arc<AggregatesLookup>,
    notes: Arc<dyn NoteStore>,
}

impl DashboardService {
    pub fn new(aggregates: Arc<AggregatesLookup>, notes: Arc<dyn NoteStore>) -> Self {
        Self { aggregates, notes }
    }

    pub async fn dashboard(&self, now: NaiveDateTime, days_back: i64) -> Result<DashboardData> {
        let window_start = start_of_day(now - Duration::days(days_back));
        let filter = TimeFilter {
            start: window_start,
            end: end_of_day(now),
            description: format!("last {days_back} days"),
            confidence: 1.0,
        };

        let top_apps = to_entries(self.aggregates.top_apps(Some(&filter), 10).await?.items);
        let top_topics = to_entries(self.aggregates.top_topics(Some(&filter), 10).await?.items);
        let top_categories =
            to_entries(self.aggregates.top_categories(Some(&filter), 10).await?.items);

        // Trend: summed category seconds per day.
        let mut trend = Vec::new();
        for offset in (0..days_back).rev() {
            let day_start = start_of_day(now - Duration::days(offset));
            let day_filter = TimeFilter {
                start: day_start,
                end: end_of_day(day_start),
                description: "day".to_string(),
                confidence: 1.0,
            };
            let categories = self.aggregates.top_categories(Some(&day_filter), 50).await?;
            trend.push(TrendPoint {
                date: day_start.date().to_string(),
                seconds: categories.total_value,
            });
        }

        // Heatmap: non-empty hour notes bucketed by hour of day.
        let notes = self
            .notes
            .notes_in_range(Some(NoteType::Hour), window_start, end_of_day(now))
            .await?;
        let mut buckets = [0usize; 24];
        for note in &notes {
            let active = note
                .payload()
                .map(|p| !p.activities.is_empty())
                .unwrap_or(false);
            if active {
                buckets[note.start_ts.hour() as usize] += 1;
            }
        }
        let heatmap = buckets
            .iter()
            .enumerate()
            .map(|(hour, count)| HeatmapCell { hour: hour as u32, active_notes: *count })
            .collect();

        Ok(DashboardData { days_back, top_apps, top_topics, top_categories, trend, heatmap })
    }
}

fn to_entries(items: Vec<trace_core::retrieval::aggregates::AggregateItem>) -> Vec<UsageEntry> {
    items.into_iter().map(|i| UsageEntry { key: i.key, value: i.value }).collect()
}

#[cfg(test)]
mod tests {
    use trace_core::storage::{AggregateStore, NoteStore as _};
    use trace_domain::types::{Aggregate, AggregateKeyType, Note, PeriodType};

    use super::*;
    use crate::database::{DbManager, SqliteAggregateRepository, SqliteNoteRepository};

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn dashboard_collects_tops_trend_and_heatmap() {
        let db = Arc::new(DbManager::in_memory().unwrap());
        db.run_migrations().unwrap();
        let aggregates = Arc::new(SqliteAggregateRepository::new(Arc::clone(&db)));
        let notes = Arc::new(SqliteNoteRepository::new(Arc::clone(&db)));

        aggregates
            .record(&Aggregate {
                period_type: PeriodType::Hour,
                period_start_ts: ts("2025-01-15T14:00:00"),
                period_end_ts: ts("2025-01-15T15:00:00"),
                key_type: AggregateKeyType::App,
                key: "VS Code".into(),
                value_num: 1800.0,
                extra_json: None,
            })
            .await
            .unwrap();
        aggregates
            .record(&Aggregate {
                period_type: PeriodType::Hour,
                period_start_ts: ts("2025-01-15T14:00:00"),
                period_end_ts: ts("2025-01-15T15:00:00"),
                key_type: AggregateKeyType::Category,
                key: "work".into(),
                value_num: 1800.0,
                extra_json: None,
            })
            .await
            .unwrap();

        let start = ts("2025-01-15T14:00:00");
        notes
            .insert_note(&Note {
                note_id: "n1".into(),
                note_type: NoteType::Hour,
                start_ts: start,
                end_ts: start + Duration::hours(1),
                file_path: "notes/n1.md".into(),
                json_payload: serde_json::json!({
                    "summary": "work",
                    "activities": [{"time_start": "14:00", "time_end": "15:00", "description": "x"}]
                })
                .to_string(),
                created_ts: start,
                updated_ts: start,
            })
            .await
            .unwrap();

        let service = DashboardService::new(
            Arc::new(AggregatesLookup::new(aggregates)),
            notes,
        );
        let data = service.dashboard(ts("2025-01-16T10:00:00"), 7).await.unwrap();

        assert_eq!(data.top_apps[0].key, "VS Code");
        assert!(data.trend.iter().any(|p| p.seconds > 0.0));
        assert_eq!(data.heatmap.len(), 24);
        assert_eq!(data.heatmap[14].active_notes, 1);
    }
}
