//! Deterministic text projection of a summary for embedding.
//!
//! Captures the searchable content of a note in a stable order so that
//! re-embedding an unchanged payload produces an identical input string.

use chrono::NaiveDateTime;
use trace_domain::types::HourlySummary;

/// Build the embedding input text for a note payload.
pub fn build_embedding_text(summary: &HourlySummary, start: Option<NaiveDateTime>) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(start) = start {
        parts.push(format!("Time: {}", start.format("%A, %B %d, %Y at %H:00")));
    }

    parts.push(format!("Summary: {}", summary.summary));

    if !summary.categories.is_empty() {
        parts.push(format!("Categories: {}", summary.categories.join(", ")));
    }

    if !summary.activities.is_empty() {
        let activities: Vec<String> = summary
            .activities
            .iter()
            .take(5)
            .map(|a| a.description.clone())
            .collect();
        parts.push(format!("Activities: {}", activities.join("; ")));
    }

    if !summary.topics.is_empty() {
        let topics: Vec<&str> = summary.topics.iter().map(|t| t.name.as_str()).collect();
        parts.push(format!("Topics: {}", topics.join(", ")));
    }

    if !summary.entities.is_empty() {
        let mut grouped: Vec<(String, Vec<&str>)> = Vec::new();
        for entity in &summary.entities {
            match grouped.iter_mut().find(|(kind, _)| *kind == entity.r#type) {
                Some((_, names)) => names.push(&entity.name),
                None => grouped.push((entity.r#type.clone(), vec![&entity.name])),
            }
        }
        for (kind, names) in grouped {
            parts.push(format!("{kind}: {}", names.join(", ")));
        }
    }

    if !summary.media.listening.is_empty() {
        let listening: Vec<String> = summary
            .media
            .listening
            .iter()
            .map(|item| format!("{} - {}", item.artist, item.track))
            .collect();
        parts.push(format!("Listening: {}", listening.join(", ")));
    }

    if !summary.media.watching.is_empty() {
        let watching: Vec<&str> =
            summary.media.watching.iter().map(|item| item.title.as_str()).collect();
        parts.push(format!("Watching: {}", watching.join(", ")));
    }

    if !summary.documents.is_empty() {
        let docs: Vec<&str> = summary.documents.iter().map(|d| d.name.as_str()).collect();
        parts.push(format!("Documents: {}", docs.join(", ")));
    }

    if !summary.websites.is_empty() {
        let sites: Vec<&str> = summary.websites.iter().map(|w| w.domain.as_str()).collect();
        parts.push(format!("Websites: {}", sites.join(", ")));
    }

    if let Some(location) = &summary.location {
        parts.push(format!("Location: {location}"));
    }

    parts.join("\n")
}
