//! Markdown note rendering.
//!
//! Deterministic output: YAML front-matter, a date/hour header, then the
//! sections in fixed order. Absent sections are omitted entirely. The
//! front-matter round-trips through a YAML parser; [`parse_front_matter`]
//! is the inverse used by tests and the exporter.

use chrono::NaiveDateTime;
use trace_domain::types::{HourlySummary, NoteType};
use trace_domain::{Result, TraceError};

/// Renders validated summaries to Markdown with YAML front-matter.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    /// Render a complete note document.
    pub fn render(
        &self,
        summary: &HourlySummary,
        note_id: &str,
        note_type: NoteType,
        start: NaiveDateTime,
        end: NaiveDateTime,
        location: Option<&str>,
    ) -> String {
        let mut lines: Vec<String> = Vec::new();

        lines.push("---".into());
        lines.extend(front_matter_lines(summary, note_id, note_type, start, end, location));
        lines.push("---".into());
        lines.push(String::new());

        let date_str = start.format("%A, %B %d, %Y");
        lines.push(format!(
            "# {date_str} | {} - {}",
            start.format("%H:00"),
            end.format("%H:00")
        ));
        lines.push(String::new());

        lines.push("## Summary".into());
        lines.push(String::new());
        lines.push(summary.summary.clone());
        lines.push(String::new());

        if !summary.activities.is_empty() {
            lines.push("## Activities".into());
            lines.push(String::new());
            for activity in &summary.activities {
                let app = activity
                    .app
                    .as_deref()
                    .map(|a| format!(" ({a})"))
                    .unwrap_or_default();
                lines.push(format!(
                    "- **{} - {}**{app}: {}",
                    activity.time_start, activity.time_end, activity.description
                ));
            }
            lines.push(String::new());
        }

        if !summary.topics.is_empty() {
            lines.push("## Topics & Learning".into());
            lines.push(String::new());
            for topic in &summary.topics {
                // Truncate, never round: a sub-1.0 confidence must not
                // display as 100%.
                let confidence = if topic.confidence < 1.0 {
                    format!(" ({}%)", (topic.confidence * 100.0) as i64)
                } else {
                    String::new()
                };
                let context = topic
                    .context
                    .as_deref()
                    .map(|c| format!(" - {c}"))
                    .unwrap_or_default();
                lines.push(format!("- **{}**{confidence}{context}", topic.name));
            }
            lines.push(String::new());
        }

        if !summary.documents.is_empty() {
            lines.push("## Documents".into());
            lines.push(String::new());
            for doc in &summary.documents {
                let kind = if doc.r#type != "other" && !doc.r#type.is_empty() {
                    format!(" [{}]", doc.r#type)
                } else {
                    String::new()
                };
                lines.push(format!("- **{}**{kind}", doc.name));
                if let Some(content) = &doc.key_content {
                    lines.push(format!("  - {content}"));
                }
            }
            lines.push(String::new());
        }

        if !summary.websites.is_empty() {
            lines.push("## Websites Visited".into());
            lines.push(String::new());
            for site in &summary.websites {
                let title = site
                    .page_title
                    .as_deref()
                    .map(|t| format!(" - {t}"))
                    .unwrap_or_default();
                lines.push(format!("- **{}**{title}", site.domain));
                if let Some(purpose) = &site.purpose {
                    lines.push(format!("  - Purpose: {purpose}"));
                }
            }
            lines.push(String::new());
        }

        if summary.has_media() {
            lines.push("## Media".into());
            lines.push(String::new());

            if !summary.media.listening.is_empty() {
                lines.push("### Listening".into());
                lines.push(String::new());
                for item in &summary.media.listening {
                    let duration = item
                        .duration_seconds
                        .filter(|d| *d > 0)
                        .map(|d| format!(" ({}m)", d / 60))
                        .unwrap_or_default();
                    lines.push(format!("- {} - *{}*{duration}", item.artist, item.track));
                }
                lines.push(String::new());
            }

            if !summary.media.watching.is_empty() {
                lines.push("### Watching".into());
                lines.push(String::new());
                for item in &summary.media.watching {
                    let source = item
                        .source
                        .as_deref()
                        .map(|s| format!(" on {s}"))
                        .unwrap_or_default();
                    let duration = item
                        .duration_seconds
                        .filter(|d| *d > 0)
                        .map(|d| format!(" ({}m)", d / 60))
                        .unwrap_or_default();
                    lines.push(format!("- *{}*{source}{duration}", item.title));
                }
                lines.push(String::new());
            }
        }

        if !summary.co_activities.is_empty() {
            lines.push("## Co-Activities".into());
            lines.push(String::new());
            for co in &summary.co_activities {
                lines.push(format!("- {} while {}", co.primary, co.secondary));
            }
            lines.push(String::new());
        }

        if !summary.open_loops.is_empty() {
            lines.push("## Open Loops".into());
            lines.push(String::new());
            for loop_item in &summary.open_loops {
                lines.push(format!("- [ ] {loop_item}"));
            }
            lines.push(String::new());
        }

        let location = location.or(summary.location.as_deref());
        if let Some(location) = location {
            lines.push("---".into());
            lines.push(format!("*Location: {location}*"));
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

fn front_matter_lines(
    summary: &HourlySummary,
    note_id: &str,
    note_type: NoteType,
    start: NaiveDateTime,
    end: NaiveDateTime,
    location: Option<&str>,
) -> Vec<String> {
    let mut lines = Vec::new();

    lines.push(format!("id: {note_id}"));
    lines.push(format!("type: {}", note_type.as_str()));
    lines.push(format!("start_time: {}", start.format("%Y-%m-%dT%H:%M:%S")));
    lines.push(format!("end_time: {}", end.format("%Y-%m-%dT%H:%M:%S")));

    match location.or(summary.location.as_deref()) {
        Some(location) => {
            lines.push(format!("location: \"{}\"", escape_yaml(location)));
        }
        None => lines.push("location: null".into()),
    }

    if summary.categories.is_empty() {
        lines.push("categories: []".into());
    } else {
        lines.push("categories:".into());
        for category in &summary.categories {
            lines.push(format!("  - {category}"));
        }
    }

    if summary.entities.is_empty() {
        lines.push("entities: []".into());
    } else {
        lines.push("entities:".into());
        for entity in &summary.entities {
            lines.push(format!("  - name: \"{}\"", escape_yaml(&entity.name)));
            lines.push(format!("    type: {}", entity.r#type));
            lines.push(format!("    confidence: {:.2}", entity.confidence));
        }
    }

    lines.push(format!("schema_version: {}", summary.schema_version));
    lines
}

fn escape_yaml(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Split a note document into its parsed front-matter and body.
pub fn parse_front_matter(content: &str) -> Result<(serde_yaml::Value, String)> {
    let Some(rest) = content.strip_prefix("---\n") else {
        return Ok((serde_yaml::Value::Null, content.to_string()));
    };

    let Some(end) = rest.find("\n---") else {
        return Ok((serde_yaml::Value::Null, content.to_string()));
    };

    let front = &rest[..end];
    let body = rest[end + 4..].trim_start_matches('\n').to_string();

    let parsed: serde_yaml::Value = serde_yaml::from_str(front)
        .map_err(|e| TraceError::Validation(format!("front-matter parse: {e}")))?;

    Ok((parsed, body))
}
