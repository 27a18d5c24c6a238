//! The hourly summary payload schema.
//!
//! This is the canonical shape every LLM summarization output must conform
//! to. Validation and repair live in `trace-core`; this module only defines
//! the data. Serialized as the `json_payload` column of a note row.

use serde::{Deserialize, Serialize};

use crate::constants::SUMMARY_SCHEMA_VERSION;

/// A single activity in the hour's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityItem {
    /// Start time, `HH:MM`.
    pub time_start: String,
    /// End time, `HH:MM`.
    pub time_end: String,
    pub description: String,
    #[serde(default)]
    pub app: Option<String>,
    /// work, learning, entertainment, communication, creative, browsing, other.
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "other".to_string()
}

/// A topic or subject encountered during the hour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicItem {
    pub name: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

/// An entity declared directly by the summarizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEntity {
    pub name: String,
    /// One of the [`crate::types::graph::EntityKind`] names; repaired
    /// leniently during validation.
    pub r#type: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

/// Music or podcast listening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListeningItem {
    pub artist: String,
    pub track: String,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
}

/// Video or show watching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchingItem {
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
}

/// Media consumption section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaSection {
    #[serde(default)]
    pub listening: Vec<ListeningItem>,
    #[serde(default)]
    pub watching: Vec<WatchingItem>,
}

/// A document read or edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentItem {
    pub name: String,
    /// pdf, code, spreadsheet, presentation, other.
    #[serde(default = "default_doc_type")]
    pub r#type: String,
    #[serde(default)]
    pub key_content: Option<String>,
}

fn default_doc_type() -> String {
    "other".to_string()
}

/// A website visited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsiteItem {
    pub domain: String,
    #[serde(default)]
    pub page_title: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
}

/// Two overlapping activities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoActivityItem {
    pub primary: String,
    pub secondary: String,
    /// studied_while, worked_while, browsed_while.
    #[serde(default = "default_relationship")]
    pub relationship: String,
}

fn default_relationship() -> String {
    "worked_while".to_string()
}

/// Complete hourly summary payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlySummary {
    #[serde(default = "default_schema_version")]
    pub schema_version: i32,
    pub summary: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub activities: Vec<ActivityItem>,
    #[serde(default)]
    pub topics: Vec<TopicItem>,
    #[serde(default)]
    pub entities: Vec<SummaryEntity>,
    #[serde(default)]
    pub media: MediaSection,
    #[serde(default)]
    pub documents: Vec<DocumentItem>,
    #[serde(default)]
    pub websites: Vec<WebsiteItem>,
    #[serde(default)]
    pub co_activities: Vec<CoActivityItem>,
    #[serde(default)]
    pub open_loops: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

fn default_schema_version() -> i32 {
    SUMMARY_SCHEMA_VERSION
}

impl HourlySummary {
    /// Whether any media was consumed during the hour.
    pub fn has_media(&self) -> bool {
        !self.media.listening.is_empty() || !self.media.watching.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults_for_missing_fields() {
        let payload: HourlySummary =
            serde_json::from_str(r#"{"summary": "Quiet hour."}"#).unwrap();

        assert_eq!(payload.schema_version, SUMMARY_SCHEMA_VERSION);
        assert!(payload.categories.is_empty());
        assert!(payload.media.listening.is_empty());
        assert!(payload.open_loops.is_empty());
        assert_eq!(payload.location, None);
    }

    #[test]
    fn activity_category_defaults_to_other() {
        let item: ActivityItem = serde_json::from_str(
            r#"{"time_start":"14:00","time_end":"14:30","description":"coding"}"#,
        )
        .unwrap();
        assert_eq!(item.category, "other");
    }
}
