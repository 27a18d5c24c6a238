//! Weekly digest: a compact usage summary for one ISO week.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use trace_core::retrieval::aggregates::AggregatesLookup;
use trace_core::retrieval::time::TimeFilter;
use trace_domain::utils::time::{end_of_week, start_of_week};
use trace_domain::Result;

use super::dashboard::UsageEntry;

/// Digest payload for one week.
#[derive(Debug, Clone, Serialize)]
pub struct WeeklyDigest {
    pub week_start: String,
    pub week_end: String,
    /// Total category-tracked seconds across the week.
    pub total_tracked_seconds: f64,
    pub top_apps: Vec<UsageEntry>,
    pub top_topics: Vec<UsageEntry>,
    pub top_media: Vec<UsageEntry>,
    pub headline: String,
}

/// Builds weekly digests from aggregates.
pub struct WeeklyDigestService {
    aggregates: Arc<AggregatesLookup>,
}

impl WeeklyDigestService {
    pub fn new(aggregates: Arc<AggregatesLookup>) -> Self {
        Self { aggregates }
    }

    /// Digest for the week `week_offset` weeks before the one containing
    /// `now` (0 = this week, 1 = last week).
    pub async fn digest(&self, now: NaiveDateTime, week_offset: i64) -> Result<WeeklyDigest> {
        let anchor = now - Duration::weeks(week_offset);
        let filter = TimeFilter {
            start: start_of_week(anchor),
            end: end_of_week(anchor),
            description: "week".to_string(),
            confidence: 1.0,
        };

        let categories = self.aggregates.top_categories(Some(&filter), 50).await?;
        let apps = self.aggregates.top_apps(Some(&filter), 5).await?;
        let topics = self.aggregates.top_topics(Some(&filter), 5).await?;
        let media = self.aggregates.top_media(Some(&filter), 5).await?;

        let total = categories.total_value;
        let headline = match apps.items.first() {
            Some(top) => format!(
                "{:.1}h tracked; most time in {}",
                total / 3600.0,
                top.key
            ),
            None => "No tracked activity this week".to_string(),
        };

        Ok(WeeklyDigest {
            week_start: filter.start.date().to_string(),
            week_end: filter.end.date().to_string(),
            total_tracked_seconds: total,
            top_apps: to_entries(apps.items),
            top_topics: to_entries(topics.items),
            top_media: to_entries(media.items),
            headline,
        })
    }
}

fn to_entries(items: Vec<trace_core::retrieval::aggregates::AggregateItem>) -> Vec<UsageEntry> {
    items.into_iter().map(|i| UsageEntry { key: i.key, value: i.value }).collect()
}
