//! Grounded answer synthesis with mechanical citations.
//!
//! The system prompt mandates `[Note: HH:00]` / `[Note: YYYY-MM-DD]`
//! citations; the citation list itself is derived from the notes actually
//! supplied, never from the model output. With no notes available the
//! answer is a fixed "no data" message.

use std::sync::Arc;

use serde::Serialize;
use trace_common::{execute_with_retry, RetryConfig};
use trace_domain::types::NoteType;
use trace_domain::{Result, TraceError};

use crate::retrieval::aggregates::AggregateItem;
use crate::retrieval::graph::RelatedEntity;
use crate::retrieval::search::NoteMatch;
use crate::retrieval::time::TimeFilter;
use crate::summarize::ports::{ChatMessage, ChatRequest, ContentPart, LanguageModel};

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions about a user's digital activity history. You have access to notes that summarize their activities, and you should provide accurate, grounded answers based on this evidence.\n\
\n\
Guidelines:\n\
1. ALWAYS cite your sources using [Note: HH:00] format for hourly notes or [Note: YYYY-MM-DD] for daily notes\n\
2. Only make claims that are supported by the provided notes\n\
3. If the information isn't in the notes, say so honestly\n\
4. When answering \"most\" or \"top\" questions, use the provided aggregates data\n\
5. Keep answers concise but informative\n\
6. Use natural language, not bullet points unless listing items\n\
7. When relevant, mention the time context\n\
8. If asked about something not in the notes, acknowledge the limitation";

pub const NO_DATA_ANSWER: &str = "I don't have any relevant notes or activity data to answer this question. This could mean no activity was captured during that period, the topic wasn't detected in your activities, or the time filter is too restrictive. Try broadening your time range or rephrasing the question.";

/// A citation back to a supplied note.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub note_id: String,
    pub label: String,
    pub file_path: String,
}

/// A synthesized answer with provenance.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: f64,
}

/// Citation label for one note: hour label for hourly notes, date for daily.
pub fn citation_label(note: &NoteMatch) -> String {
    match note.note_type {
        NoteType::Hour => note.start_ts.format("%H:00").to_string(),
        NoteType::Day => note.start_ts.format("%Y-%m-%d").to_string(),
    }
}

/// Derive the citation list mechanically from the supplied notes.
pub fn extract_citations(notes: &[NoteMatch]) -> Vec<Citation> {
    notes
        .iter()
        .map(|note| Citation {
            note_id: note.note_id.clone(),
            label: citation_label(note),
            file_path: note.file_path.clone(),
        })
        .collect()
}

/// Build the user prompt from the assembled context.
pub fn build_user_prompt(
    question: &str,
    notes: &[NoteMatch],
    aggregates: &[AggregateItem],
    related: &[RelatedEntity],
    time_filter: Option<&TimeFilter>,
) -> String {
    let time_context = time_filter
        .map(|f| {
            format!(
                "{} ({} to {})",
                f.description,
                f.start.format("%Y-%m-%d %H:%M"),
                f.end.format("%Y-%m-%d %H:%M")
            )
        })
        .unwrap_or_else(|| "all time".to_string());

    let notes_context = if notes.is_empty() {
        "(no notes)".to_string()
    } else {
        notes
            .iter()
            .map(|note| {
                format!(
                    "[Note: {}] ({}) {}",
                    citation_label(note),
                    note.start_ts.format("%Y-%m-%d"),
                    note.summary
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let aggregates_context = if aggregates.is_empty() {
        "(none)".to_string()
    } else {
        aggregates
            .iter()
            .map(|item| format!("- {} ({}): {:.0}", item.key, item.key_type.as_str(), item.value))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let related_context = if related.is_empty() {
        "(none)".to_string()
    } else {
        related
            .iter()
            .map(|r| {
                format!(
                    "- {} ({}, via {}, weight {:.2})",
                    r.canonical_name,
                    r.entity_type.as_str(),
                    r.edge_type.as_str(),
                    r.weight
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Question: {question}\n\nTime context: {time_context}\n\n## Relevant Notes\n\n{notes_context}\n\n## Aggregates Data (if applicable)\n\n{aggregates_context}\n\n## Related Topics (if applicable)\n\n{related_context}\n\n---\n\nPlease answer the question based on the information above. Remember to cite your sources."
    )
}

/// Synthesizes grounded answers through the language model.
pub struct AnswerSynthesizer {
    model: Option<Arc<dyn LanguageModel>>,
}

impl AnswerSynthesizer {
    pub fn new(model: Option<Arc<dyn LanguageModel>>) -> Self {
        Self { model }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        notes: &[NoteMatch],
        aggregates: &[AggregateItem],
        related: &[RelatedEntity],
        time_filter: Option<&TimeFilter>,
    ) -> Result<SynthesizedAnswer> {
        if notes.is_empty() && aggregates.is_empty() {
            return Ok(SynthesizedAnswer {
                answer: NO_DATA_ANSWER.to_string(),
                citations: vec![],
                confidence: 0.0,
            });
        }

        let Some(model) = self.model.as_ref() else {
            return Ok(SynthesizedAnswer {
                answer: NO_DATA_ANSWER.to_string(),
                citations: vec![],
                confidence: 0.0,
            });
        };

        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(vec![ContentPart::Text(build_user_prompt(
                    question,
                    notes,
                    aggregates,
                    related,
                    time_filter,
                ))]),
            ],
            json_mode: false,
            max_tokens: 1000,
            temperature: Some(0.3),
        };

        let outcome = execute_with_retry(
            &RetryConfig::llm(),
            "chat.synthesize",
            || model.complete(request.clone()),
            TraceError::is_transient,
        )
        .await
        .map_err(|err| err.into_source())?;

        Ok(SynthesizedAnswer {
            answer: outcome.content,
            citations: extract_citations(notes),
            confidence: (notes.len() as f64 / 3.0).min(1.0),
        })
    }
}
