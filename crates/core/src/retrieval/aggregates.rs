//! Aggregates lookup: "top / most / favorite" answers without scanning
//! notes.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use trace_domain::types::AggregateKeyType;
use trace_domain::Result;

use crate::storage::AggregateStore;

use super::time::TimeFilter;

/// One aggregated item.
#[derive(Debug, Clone)]
pub struct AggregateItem {
    pub key: String,
    pub key_type: AggregateKeyType,
    pub value: f64,
}

/// Result of an aggregates query.
#[derive(Debug, Clone)]
pub struct AggregatesResult {
    pub key_type: AggregateKeyType,
    pub time_filter: Option<TimeFilter>,
    pub items: Vec<AggregateItem>,
    pub total_value: f64,
}

/// Ordered intent patterns for "most/top/favorite" queries.
static MOST_PATTERNS: Lazy<Vec<(Regex, AggregateKeyType)>> = Lazy::new(|| {
    let table: &[(&str, AggregateKeyType)] = &[
        (r"\bmost\s+watched\b", AggregateKeyType::Media),
        (r"\bmost\s+viewed\b", AggregateKeyType::Media),
        (r"\bmost\s+listened\b", AggregateKeyType::Media),
        (r"\bmost\s+played\b", AggregateKeyType::Media),
        (r"\bmost\s+used\s+apps?\b", AggregateKeyType::App),
        (r"\bmost\s+used\b", AggregateKeyType::App),
        (r"\bmost\s+visited\s+(?:sites?|domains?|websites?)\b", AggregateKeyType::Domain),
        (r"\bmost\s+visited\b", AggregateKeyType::Domain),
        (r"\bmost\s+time\s+(?:on|with|in)\s+apps?\b", AggregateKeyType::App),
        (r"\bmost\s+time\s+(?:on|with)\s+topics?\b", AggregateKeyType::Topic),
        (r"\bmost\s+time\s+(?:on|at)\s+(?:sites?|domains?|websites?)\b", AggregateKeyType::Domain),
        (r"\bmost\s+time\b", AggregateKeyType::Category),
        (r"\btop\s+apps?\b", AggregateKeyType::App),
        (r"\btop\s+(?:sites?|domains?|websites?)\b", AggregateKeyType::Domain),
        (r"\btop\s+topics?\b", AggregateKeyType::Topic),
        (r"\btop\s+artists?\b", AggregateKeyType::Artist),
        (r"\btop\s+(?:songs?|tracks?)\b", AggregateKeyType::Track),
        (r"\btop\s+categor(?:y|ies)\b", AggregateKeyType::Category),
        (r"\bfavorite\s+apps?\b", AggregateKeyType::App),
        (r"\bfavorite\s+artists?\b", AggregateKeyType::Artist),
        (r"\bfavorite\s+songs?\b", AggregateKeyType::Track),
        (r"\bfrequently\s+used\s+apps?\b", AggregateKeyType::App),
        (r"\bfrequently\s+visited\b", AggregateKeyType::Domain),
    ];
    table
        .iter()
        .map(|(pattern, key_type)| {
            (Regex::new(pattern).expect("valid pattern"), *key_type)
        })
        .collect()
});

/// Detect a "most/top/favorite" intent and its key type. Patterns are tried
/// in table order; the first hit wins.
pub fn detect_most_query(query: &str) -> Option<(&'static str, AggregateKeyType)> {
    let query = query.to_lowercase();
    MOST_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(&query))
        .map(|(_, key_type)| ("most", *key_type))
}

/// Read-side API over the aggregates table.
pub struct AggregatesLookup {
    store: Arc<dyn AggregateStore>,
}

impl AggregatesLookup {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// Top keys of one type, summed over windows overlapping the filter.
    pub async fn top_by_key_type(
        &self,
        key_type: AggregateKeyType,
        time_filter: Option<&TimeFilter>,
        limit: usize,
    ) -> Result<AggregatesResult> {
        let window = time_filter.map(TimeFilter::window);
        let sums = self.store.top_by_key_type(key_type, window, limit).await?;

        let items: Vec<AggregateItem> = sums
            .into_iter()
            .map(|s| AggregateItem { key: s.key, key_type: s.key_type, value: s.total })
            .collect();
        let total_value = items.iter().map(|i| i.value).sum();

        Ok(AggregatesResult { key_type, time_filter: time_filter.cloned(), items, total_value })
    }

    pub async fn top_apps(
        &self,
        time_filter: Option<&TimeFilter>,
        limit: usize,
    ) -> Result<AggregatesResult> {
        self.top_by_key_type(AggregateKeyType::App, time_filter, limit).await
    }

    pub async fn top_topics(
        &self,
        time_filter: Option<&TimeFilter>,
        limit: usize,
    ) -> Result<AggregatesResult> {
        self.top_by_key_type(AggregateKeyType::Topic, time_filter, limit).await
    }

    pub async fn top_domains(
        &self,
        time_filter: Option<&TimeFilter>,
        limit: usize,
    ) -> Result<AggregatesResult> {
        self.top_by_key_type(AggregateKeyType::Domain, time_filter, limit).await
    }

    pub async fn top_media(
        &self,
        time_filter: Option<&TimeFilter>,
        limit: usize,
    ) -> Result<AggregatesResult> {
        self.top_by_key_type(AggregateKeyType::Media, time_filter, limit).await
    }

    pub async fn top_artists(
        &self,
        time_filter: Option<&TimeFilter>,
        limit: usize,
    ) -> Result<AggregatesResult> {
        self.top_by_key_type(AggregateKeyType::Artist, time_filter, limit).await
    }

    pub async fn top_categories(
        &self,
        time_filter: Option<&TimeFilter>,
        limit: usize,
    ) -> Result<AggregatesResult> {
        self.top_by_key_type(AggregateKeyType::Category, time_filter, limit).await
    }

    /// Total value for a single key (seconds for duration-keyed types).
    pub async fn get_time_for_key(
        &self,
        key: &str,
        key_type: Option<AggregateKeyType>,
        time_filter: Option<&TimeFilter>,
    ) -> Result<f64> {
        let window = time_filter.map(TimeFilter::window);
        self.store.sum_for_key(key, key_type, window).await
    }

    /// Top five of every key type for a period, for dashboard-style views.
    pub async fn period_summary(
        &self,
        time_filter: &TimeFilter,
    ) -> Result<Vec<AggregatesResult>> {
        let mut out = Vec::new();
        for key_type in AggregateKeyType::ALL {
            let result = self.top_by_key_type(*key_type, Some(time_filter), 5).await?;
            if !result.items.is_empty() {
                out.push(result);
            }
        }
        Ok(out)
    }
}
