//! Prompt assembly for hourly summarization.
//!
//! The system message embeds the output schema; the user message carries the
//! evidence: rendered timeline, keyframe descriptions, text snippets, media
//! timeline, statistics and optionally the keyframe images themselves.

use crate::evidence::aggregator::{build_timeline_text, HourlyEvidence};
use crate::triage::SelectedKeyframe;

use super::ports::{ChatMessage, ContentPart};

const SCHEMA_DESCRIPTION: &str = r#"{
  "schema_version": 1,
  "summary": "2-3 sentence overview of the hour's activities",
  "categories": ["list", "of", "activity", "categories"],
  "activities": [
    {
      "time_start": "HH:MM",
      "time_end": "HH:MM",
      "description": "What the user was doing",
      "app": "Application name",
      "category": "work|learning|entertainment|communication|creative|browsing|other"
    }
  ],
  "topics": [
    {"name": "Topic or subject", "context": "How/why it was encountered", "confidence": 0.5}
  ],
  "entities": [
    {"name": "Entity name", "type": "topic|app|domain|document|artist|track|video|game|person|project", "confidence": 0.5}
  ],
  "media": {
    "listening": [{"artist": "...", "track": "...", "duration_seconds": 123}],
    "watching": [{"title": "...", "source": "...", "duration_seconds": 123}]
  },
  "documents": [
    {"name": "Document or file name", "type": "pdf|code|spreadsheet|presentation|other", "key_content": "Brief summary"}
  ],
  "websites": [
    {"domain": "example.com", "page_title": "Page title if known", "purpose": "Why the user visited"}
  ],
  "co_activities": [
    {"primary": "Main activity", "secondary": "Concurrent activity", "relationship": "studied_while|worked_while|browsed_while"}
  ],
  "open_loops": ["Things mentioned but not completed"],
  "location": "Location if known, null otherwise"
}"#;

/// System message mandating strict JSON against the summary schema.
pub fn system_prompt() -> String {
    format!(
        "You are a personal activity summarizer for Trace, a second-brain application.\n\
         \n\
         Your task is to analyze the user's digital activity for one hour and generate a structured summary.\n\
         \n\
         ## Output Requirements\n\
         \n\
         You MUST respond with valid JSON conforming to this schema:\n{SCHEMA_DESCRIPTION}\n\
         \n\
         ## Guidelines\n\
         \n\
         1. Summary: a concise 2-3 sentence overview of the main activities and context.\n\
         2. Categories: the activity categories present.\n\
         3. Activities: a timeline of distinct activities with clear time boundaries; merge very short activities into broader segments.\n\
         4. Topics: subjects and concepts the user engaged with, including learning topics and project names.\n\
         5. Entities: named entities with their types.\n\
         6. Media: what was being listened to or watched, with durations when evident.\n\
         7. Co-activities: overlapping activities such as music during work.\n\
         8. Open loops: tasks started or mentioned but not completed.\n\
         \n\
         Only report what the evidence supports. Respond with JSON only, no code fences."
    )
}

/// Build the user message parts from the evidence packet and keyframes.
/// `images` pairs keyframe indexes with their JPEG bytes; pass an empty
/// slice to produce a text-only message.
pub fn build_user_message(
    evidence: &HourlyEvidence,
    keyframes: &[SelectedKeyframe],
    images: &[(usize, Vec<u8>)],
) -> ChatMessage {
    let mut sections: Vec<String> = Vec::new();

    sections.push(build_timeline_text(evidence));

    if !keyframes.is_empty() {
        let mut lines = vec!["## Selected Keyframes".to_string()];
        for (index, keyframe) in keyframes.iter().enumerate() {
            let mut line = format!(
                "- Frame {} [{}]",
                index + 1,
                keyframe.timestamp.format("%H:%M:%S")
            );
            if let Some(app) = &keyframe.app_name {
                line.push_str(&format!(" {app}"));
            }
            if let Some(title) = &keyframe.window_title {
                line.push_str(&format!(" - {title}"));
            }
            if let Some(triage) = &keyframe.triage {
                line.push_str(&format!(" ({})", triage.description));
            }
            lines.push(line);
        }
        sections.push(lines.join("\n"));
    }

    if !evidence.text_snippets.is_empty() {
        let mut lines = vec!["## Text Evidence".to_string()];
        for snippet in &evidence.text_snippets {
            lines.push(format!(
                "[{} {}] {}",
                snippet.timestamp.format("%H:%M:%S"),
                snippet.source_type,
                snippet.text
            ));
        }
        sections.push(lines.join("\n"));
    }

    sections.push(format!(
        "## Statistics\n- Events: {}\n- Screenshots: {}\n- Text buffers: {}",
        evidence.total_events, evidence.total_screenshots, evidence.total_text_buffers
    ));

    let mut parts = vec![ContentPart::Text(sections.join("\n\n"))];
    for (_, jpeg) in images {
        parts.push(ContentPart::ImageJpeg(jpeg.clone()));
    }

    ChatMessage::user(parts)
}
