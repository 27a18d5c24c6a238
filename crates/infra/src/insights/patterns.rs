//! Behavioral pattern detection over notes and aggregates.
//!
//! Three detectors: time-of-day (when is the user active and doing what),
//! day-of-week (which weekdays carry the most tracked time), and app
//! concentration (does one app dominate). All run over already-persisted
//! data; nothing here touches probes or models.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use serde::Serialize;
use trace_core::retrieval::aggregates::AggregatesLookup;
use trace_core::retrieval::time::TimeFilter;
use trace_core::storage::NoteStore;
use trace_domain::types::NoteType;
use trace_domain::utils::time::{end_of_day, start_of_day};
use trace_domain::Result;

/// A detected behavioral pattern.
#[derive(Debug, Clone, Serialize)]
pub struct Pattern {
    /// time_of_day, day_of_week or app_concentration.
    pub kind: &'static str,
    pub description: String,
    /// Supporting strength in `[0,1]`.
    pub score: f64,
}

/// Pattern detection over the stored corpus.
pub struct PatternDetector {
    aggregates: Arc<AggregatesLookup>,
    notes: Arc<dyn NoteStore>,
}

impl PatternDetector {
    pub fn new(aggregates: Arc<AggregatesLookup>, notes: Arc<dyn NoteStore>) -> Self {
        Self { aggregates, notes }
    }

    pub async fn all_patterns(&self, now: NaiveDateTime, days_back: i64) -> Result<Vec<Pattern>> {
        let mut patterns = Vec::new();
        patterns.extend(self.time_of_day(now, days_back).await?);
        patterns.extend(self.day_of_week(now, days_back).await?);
        patterns.extend(self.app_concentration(now, days_back).await?);
        Ok(patterns)
    }

    /// Which part of the day holds most of the active hours.
    pub async fn time_of_day(&self, now: NaiveDateTime, days_back: i64) -> Result<Vec<Pattern>> {
        let start = start_of_day(now - Duration::days(days_back));
        let notes = self
            .notes
            .notes_in_range(Some(NoteType::Hour), start, end_of_day(now))
            .await?;

        let mut buckets: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut total = 0usize;
        for note in &notes {
            let active = note
                .payload()
                .map(|p| !p.activities.is_empty())
                .unwrap_or(false);
            if !active {
                continue;
            }
            total += 1;
            let bucket = match note.start_ts.hour() {
                5..=11 => "morning",
                12..=16 => "afternoon",
                17..=21 => "evening",
                _ => "night",
            };
            *buckets.entry(bucket).or_insert(0) += 1;
        }

        if total == 0 {
            return Ok(vec![]);
        }

        let (bucket, count) = buckets
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(bucket, count)| (*bucket, *count))
            .unwrap_or(("morning", 0));
        let share = count as f64 / total as f64;

        Ok(vec![Pattern {
            kind: "time_of_day",
            description: format!(
                "Most active in the {bucket} ({:.0}% of active hours over the last {days_back} days)",
                share * 100.0
            ),
            score: share,
        }])
    }

    /// Which weekday carries the most tracked time.
    pub async fn day_of_week(&self, now: NaiveDateTime, days_back: i64) -> Result<Vec<Pattern>> {
        let mut weekday_totals: BTreeMap<String, f64> = BTreeMap::new();

        for offset in 0..days_back {
            let day = start_of_day(now - Duration::days(offset));
            let filter = TimeFilter {
                start: day,
                end: end_of_day(day),
                description: "day".to_string(),
                confidence: 1.0,
            };
            let categories = self.aggregates.top_categories(Some(&filter), 50).await?;
            if categories.total_value > 0.0 {
                *weekday_totals
                    .entry(day.weekday().to_string())
                    .or_insert(0.0) += categories.total_value;
            }
        }

        let total: f64 = weekday_totals.values().sum();
        if total <= 0.0 {
            return Ok(vec![]);
        }

        let (weekday, seconds) = weekday_totals
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(weekday, seconds)| (weekday.clone(), *seconds))
            .unwrap_or_default();

        Ok(vec![Pattern {
            kind: "day_of_week",
            description: format!(
                "{weekday} is the busiest day ({:.1}h tracked)",
                seconds / 3600.0
            ),
            score: (seconds / total).min(1.0),
        }])
    }

    /// Whether a single app dominates tracked time.
    pub async fn app_concentration(
        &self,
        now: NaiveDateTime,
        days_back: i64,
    ) -> Result<Vec<Pattern>> {
        let filter = TimeFilter {
            start: start_of_day(now - Duration::days(days_back)),
            end: end_of_day(now),
            description: "window".to_string(),
            confidence: 1.0,
        };
        let apps = self.aggregates.top_apps(Some(&filter), 10).await?;

        let Some(top) = apps.items.first() else {
            return Ok(vec![]);
        };
        if apps.total_value <= 0.0 {
            return Ok(vec![]);
        }

        let share = top.value / apps.total_value;
        if share < 0.4 {
            return Ok(vec![]);
        }

        Ok(vec![Pattern {
            kind: "app_concentration",
            description: format!(
                "{} accounts for {:.0}% of app time over the last {days_back} days",
                top.key,
                share * 100.0
            ),
            score: share,
        }])
    }
}
