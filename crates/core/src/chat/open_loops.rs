//! Open loop listing: unfinished tasks surfaced by recent hourly notes.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use trace_domain::types::NoteType;
use trace_domain::Result;

use crate::storage::NoteStore;

/// An incomplete task mentioned in a note.
#[derive(Debug, Clone, Serialize)]
pub struct OpenLoop {
    pub text: String,
    pub note_id: String,
    pub noted_at: NaiveDateTime,
}

/// Collect open loops from hourly notes in the last `days`, most recent
/// first, deduplicated case-insensitively, capped at `limit`.
pub async fn open_loops(
    notes: &Arc<dyn NoteStore>,
    now: NaiveDateTime,
    days: i64,
    limit: usize,
) -> Result<Vec<OpenLoop>> {
    let start = now - Duration::days(days);
    let rows = notes.notes_in_range(Some(NoteType::Hour), start, now).await?;

    let mut loops: Vec<OpenLoop> = Vec::new();
    for note in rows.iter().rev() {
        let Ok(payload) = note.payload() else {
            continue;
        };
        for text in payload.open_loops {
            let duplicate = loops
                .iter()
                .any(|l| l.text.to_lowercase() == text.to_lowercase());
            if duplicate {
                continue;
            }
            loops.push(OpenLoop {
                text,
                note_id: note.note_id.clone(),
                noted_at: note.start_ts,
            });
            if loops.len() >= limit {
                return Ok(loops);
            }
        }
    }

    Ok(loops)
}

#[cfg(test)]
mod tests {
    use trace_domain::types::Note;

    use super::*;
    use crate::storage::NoteStore as _;
    use crate::testing::MemoryNotes;

    fn note(id: &str, start: &str, loops: &[&str]) -> Note {
        let start_ts: NaiveDateTime = start.parse().unwrap();
        Note {
            note_id: id.to_string(),
            note_type: NoteType::Hour,
            start_ts,
            end_ts: start_ts + Duration::hours(1),
            file_path: format!("notes/{id}.md"),
            json_payload: serde_json::json!({
                "summary": "hour",
                "open_loops": loops,
            })
            .to_string(),
            created_ts: start_ts,
            updated_ts: start_ts,
        }
    }

    #[tokio::test]
    async fn collects_recent_loops_deduplicated() {
        let store = Arc::new(MemoryNotes::default());
        store
            .insert_note(&note("n1", "2025-01-15T09:00:00", &["Finish the report"]))
            .await
            .unwrap();
        store
            .insert_note(&note("n2", "2025-01-15T14:00:00", &["finish the REPORT", "Email Sam"]))
            .await
            .unwrap();
        // Too old to be included.
        store
            .insert_note(&note("n0", "2024-12-01T10:00:00", &["Ancient task"]))
            .await
            .unwrap();

        let notes: Arc<dyn NoteStore> = store;
        let now = "2025-01-15T18:00:00".parse().unwrap();
        let loops = open_loops(&notes, now, 7, 10).await.unwrap();

        assert_eq!(loops.len(), 2);
        // Most recent note wins the dedupe and ordering.
        assert_eq!(loops[0].note_id, "n2");
        assert!(loops.iter().all(|l| l.text != "Ancient task"));
    }

    #[tokio::test]
    async fn respects_limit() {
        let store = Arc::new(MemoryNotes::default());
        store
            .insert_note(&note("n1", "2025-01-15T14:00:00", &["a", "b", "c", "d"]))
            .await
            .unwrap();

        let notes: Arc<dyn NoteStore> = store;
        let now = "2025-01-15T18:00:00".parse().unwrap();
        let loops = open_loops(&notes, now, 7, 2).await.unwrap();
        assert_eq!(loops.len(), 2);
    }
}
