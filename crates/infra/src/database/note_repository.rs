//! Async note row persistence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{params, Row};
use tokio::task;
use trace_core::storage::NoteStore;
use trace_domain::types::{Note, NoteType};
use trace_domain::utils::time::{format_ts, parse_ts};
use trace_domain::{Result, TraceError};

use super::manager::{map_sql, DbManager};

/// Note rows over the shared pool.
pub struct SqliteNoteRepository {
    db: Arc<DbManager>,
}

impl SqliteNoteRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

const NOTE_COLUMNS: &str =
    "note_id, note_type, start_ts, end_ts, file_path, json_payload, created_ts, updated_ts";

pub(crate) fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    let note_type_raw: String = row.get("note_type")?;
    let start_raw: String = row.get("start_ts")?;
    let end_raw: String = row.get("end_ts")?;
    let created_raw: String = row.get("created_ts")?;
    let updated_raw: String = row.get("updated_ts")?;

    Ok(Note {
        note_id: row.get("note_id")?,
        note_type: NoteType::parse(&note_type_raw).unwrap_or(NoteType::Hour),
        start_ts: parse_ts(&start_raw).unwrap_or_default(),
        end_ts: parse_ts(&end_raw).unwrap_or_default(),
        file_path: row.get("file_path")?,
        json_payload: row.get("json_payload")?,
        created_ts: parse_ts(&created_raw).unwrap_or_default(),
        updated_ts: parse_ts(&updated_raw).unwrap_or_default(),
    })
}

#[async_trait]
impl NoteStore for SqliteNoteRepository {
    async fn find_note_id(
        &self,
        note_type: NoteType,
        start_ts: NaiveDateTime,
    ) -> Result<Option<String>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Option<String>> {
            let conn = db.get_connection()?;
            let found = conn
                .query_row(
                    "SELECT note_id FROM notes WHERE note_type = ?1 AND start_ts = ?2",
                    params![note_type.as_str(), format_ts(start_ts)],
                    |row| row.get::<_, String>(0),
                )
                .map(Some)
                .or_else(|err| match err {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(map_sql(other)),
                })?;
            Ok(found)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn insert_note(&self, note: &Note) -> Result<()> {
        let db = Arc::clone(&self.db);
        let note = note.clone();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT OR REPLACE INTO notes
                 (note_id, note_type, start_ts, end_ts, file_path, json_payload, created_ts, updated_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    note.note_id,
                    note.note_type.as_str(),
                    format_ts(note.start_ts),
                    format_ts(note.end_ts),
                    note.file_path,
                    note.json_payload,
                    format_ts(note.created_ts),
                    format_ts(note.updated_ts),
                ],
            )
            .map_err(map_sql)?;
            Ok(())
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn get_note(&self, note_id: &str) -> Result<Option<Note>> {
        let db = Arc::clone(&self.db);
        let note_id = note_id.to_string();
        task::spawn_blocking(move || -> Result<Option<Note>> {
            let conn = db.get_connection()?;
            conn.query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE note_id = ?1"),
                params![note_id],
                note_from_row,
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(map_sql(other)),
            })
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn notes_in_range(
        &self,
        note_type: Option<NoteType>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Note>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<Note>> {
            let conn = db.get_connection()?;
            let notes = match note_type {
                Some(note_type) => {
                    let mut statement = conn
                        .prepare(&format!(
                            "SELECT {NOTE_COLUMNS} FROM notes
                             WHERE note_type = ?1 AND start_ts >= ?2 AND start_ts < ?3
                             ORDER BY start_ts"
                        ))
                        .map_err(map_sql)?;
                    let result = statement
                        .query_map(
                            params![note_type.as_str(), format_ts(start), format_ts(end)],
                            note_from_row,
                        )
                        .map_err(map_sql)?
                        .filter_map(std::result::Result::ok)
                        .collect();
                    result
                }
                None => {
                    let mut statement = conn
                        .prepare(&format!(
                            "SELECT {NOTE_COLUMNS} FROM notes
                             WHERE start_ts >= ?1 AND start_ts < ?2
                             ORDER BY start_ts"
                        ))
                        .map_err(map_sql)?;
                    let result = statement
                        .query_map(params![format_ts(start), format_ts(end)], note_from_row)
                        .map_err(map_sql)?
                        .filter_map(std::result::Result::ok)
                        .collect();
                    result
                }
            };
            Ok(notes)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn notes_by_ids(&self, note_ids: &[String]) -> Result<Vec<Note>> {
        if note_ids.is_empty() {
            return Ok(vec![]);
        }

        let db = Arc::clone(&self.db);
        let note_ids = note_ids.to_vec();
        task::spawn_blocking(move || -> Result<Vec<Note>> {
            let conn = db.get_connection()?;
            let placeholders = vec!["?"; note_ids.len()].join(",");
            let mut statement = conn
                .prepare(&format!(
                    "SELECT {NOTE_COLUMNS} FROM notes WHERE note_id IN ({placeholders})"
                ))
                .map_err(map_sql)?;

            let notes = statement
                .query_map(rusqlite::params_from_iter(note_ids.iter()), note_from_row)
                .map_err(map_sql)?
                .filter_map(std::result::Result::ok)
                .collect();
            Ok(notes)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn notes_with_payload_like(&self, needle: &str, limit: usize) -> Result<Vec<Note>> {
        let db = Arc::clone(&self.db);
        let pattern = format!("%{needle}%");
        task::spawn_blocking(move || -> Result<Vec<Note>> {
            let conn = db.get_connection()?;
            let mut statement = conn
                .prepare(&format!(
                    "SELECT {NOTE_COLUMNS} FROM notes
                     WHERE json_payload LIKE ?1
                     ORDER BY start_ts DESC
                     LIMIT ?2"
                ))
                .map_err(map_sql)?;

            let notes = statement
                .query_map(params![pattern, limit as i64], note_from_row)
                .map_err(map_sql)?
                .filter_map(std::result::Result::ok)
                .collect();
            Ok(notes)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    fn note(id: &str, note_type: NoteType, start: &str) -> Note {
        let start_ts = ts(start);
        Note {
            note_id: id.to_string(),
            note_type,
            start_ts,
            end_ts: start_ts + Duration::hours(1),
            file_path: format!("notes/{id}.md"),
            json_payload: serde_json::json!({"summary": "hour", "categories": ["work"]})
                .to_string(),
            created_ts: start_ts,
            updated_ts: start_ts,
        }
    }

    fn repo() -> SqliteNoteRepository {
        let db = Arc::new(DbManager::in_memory().unwrap());
        db.run_migrations().unwrap();
        SqliteNoteRepository::new(db)
    }

    #[tokio::test]
    async fn find_note_id_by_hour_key() {
        let repo = repo();
        repo.insert_note(&note("n1", NoteType::Hour, "2025-01-15T14:00:00")).await.unwrap();

        let found = repo
            .find_note_id(NoteType::Hour, ts("2025-01-15T14:00:00"))
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("n1"));

        let missing = repo
            .find_note_id(NoteType::Hour, ts("2025-01-15T15:00:00"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn hour_key_is_unique_per_start() {
        let repo = repo();
        repo.insert_note(&note("n1", NoteType::Hour, "2025-01-15T14:00:00")).await.unwrap();
        // Same (type, start) replaces the row instead of duplicating it.
        repo.insert_note(&note("n2", NoteType::Hour, "2025-01-15T14:00:00")).await.unwrap();

        let notes = repo
            .notes_in_range(
                Some(NoteType::Hour),
                ts("2025-01-15T00:00:00"),
                ts("2025-01-16T00:00:00"),
            )
            .await
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].note_id, "n2");
    }

    #[tokio::test]
    async fn range_and_type_filters() {
        let repo = repo();
        repo.insert_note(&note("h1", NoteType::Hour, "2025-01-15T14:00:00")).await.unwrap();
        repo.insert_note(&note("d1", NoteType::Day, "2025-01-15T00:00:00")).await.unwrap();

        let hours = repo
            .notes_in_range(
                Some(NoteType::Hour),
                ts("2025-01-15T00:00:00"),
                ts("2025-01-16T00:00:00"),
            )
            .await
            .unwrap();
        assert_eq!(hours.len(), 1);
        assert_eq!(hours[0].note_id, "h1");

        let all = repo
            .notes_in_range(None, ts("2025-01-15T00:00:00"), ts("2025-01-16T00:00:00"))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn payload_like_prefilter() {
        let repo = repo();
        repo.insert_note(&note("n1", NoteType::Hour, "2025-01-15T14:00:00")).await.unwrap();

        let hits = repo.notes_with_payload_like("work", 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        let misses = repo.notes_with_payload_like("gaming", 10).await.unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn notes_by_ids_handles_empty() {
        let repo = repo();
        assert!(repo.notes_by_ids(&[]).await.unwrap().is_empty());
    }
}
