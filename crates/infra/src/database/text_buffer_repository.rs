//! Text buffer storage: zlib-compressed payloads, decompressed at read
//! time. Corrupt rows are logged and skipped rather than failing the read.

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rusqlite::params;
use tokio::task;
use trace_core::storage::{TextBufferRow, TextBufferStore};
use trace_domain::types::TextBuffer;
use trace_domain::utils::time::{format_ts, parse_ts};
use trace_domain::{Result, TraceError};

use super::manager::{map_sql, DbManager};

/// Text buffer reads and writes.
pub struct SqliteTextBufferRepository {
    db: Arc<DbManager>,
}

impl SqliteTextBufferRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Compress and insert a buffer. Used by ingest tooling and tests; the
    /// capture core never writes text buffers itself.
    pub fn insert_text(
        &self,
        buffer: &TextBuffer,
        plain_text: &str,
    ) -> Result<()> {
        use std::io::Write as _;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(plain_text.as_bytes())
            .and_then(|()| encoder.finish())
            .map_err(|e| TraceError::Storage(format!("compress text buffer: {e}")))
            .and_then(|compressed| {
                let conn = self.db.get_connection()?;
                conn.execute(
                    "INSERT INTO text_buffers
                     (text_id, ts, source_type, ref, compressed_text, token_estimate, event_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        buffer.text_id,
                        format_ts(buffer.ts),
                        buffer.source_type,
                        buffer.r#ref,
                        compressed,
                        buffer.token_estimate,
                        buffer.event_id,
                    ],
                )
                .map_err(map_sql)?;
                Ok(())
            })
    }
}

fn decompress(compressed: &[u8]) -> std::io::Result<String> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut text = String::new();
    decoder.read_to_string(&mut text)?;
    Ok(text)
}

#[async_trait]
impl TextBufferStore for SqliteTextBufferRepository {
    async fn buffers_in_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<TextBufferRow>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<TextBufferRow>> {
            let conn = db.get_connection()?;
            let mut statement = conn
                .prepare(
                    "SELECT text_id, ts, source_type, ref, compressed_text, token_estimate, event_id
                     FROM text_buffers
                     WHERE ts >= ?1 AND ts < ?2
                     ORDER BY ts",
                )
                .map_err(map_sql)?;

            let rows = statement
                .query_map([format_ts(start), format_ts(end)], |row| {
                    let ts_raw: String = row.get("ts")?;
                    let compressed: Vec<u8> = row.get("compressed_text")?;
                    Ok((
                        row.get::<_, String>("text_id")?,
                        ts_raw,
                        row.get::<_, String>("source_type")?,
                        row.get::<_, Option<String>>("ref")?,
                        compressed,
                        row.get::<_, i64>("token_estimate")?,
                        row.get::<_, Option<String>>("event_id")?,
                    ))
                })
                .map_err(map_sql)?
                .filter_map(std::result::Result::ok)
                .filter_map(|(text_id, ts_raw, source_type, reference, compressed, tokens, event_id)| {
                    match decompress(&compressed) {
                        Ok(text) => Some(TextBufferRow {
                            text_id,
                            ts: parse_ts(&ts_raw).ok()?,
                            source_type,
                            reference,
                            text,
                            token_estimate: tokens,
                            event_id,
                        }),
                        Err(err) => {
                            tracing::warn!(text_id = %text_id, error = %err, "corrupt text buffer skipped");
                            None
                        }
                    }
                })
                .collect();

            Ok(rows)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn count_in_range(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<i64> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<i64> {
            let conn = db.get_connection()?;
            conn.query_row(
                "SELECT COUNT(*) FROM text_buffers WHERE ts >= ?1 AND ts < ?2",
                [format_ts(start), format_ts(end)],
                |row| row.get(0),
            )
            .map_err(map_sql)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    fn buffer(id: &str, at: &str) -> TextBuffer {
        TextBuffer {
            text_id: id.to_string(),
            ts: ts(at),
            source_type: "ocr".to_string(),
            r#ref: Some("window".to_string()),
            compressed_text: vec![],
            token_estimate: 12,
            event_id: None,
        }
    }

    fn repo() -> SqliteTextBufferRepository {
        let db = Arc::new(DbManager::in_memory().unwrap());
        db.run_migrations().unwrap();
        SqliteTextBufferRepository::new(db)
    }

    #[tokio::test]
    async fn round_trips_compressed_text() {
        let repo = repo();
        repo.insert_text(&buffer("t1", "2025-01-15T14:01:00"), "hello compressed world").unwrap();

        let rows = repo
            .buffers_in_range(ts("2025-01-15T14:00:00"), ts("2025-01-15T15:00:00"))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "hello compressed world");
        assert_eq!(rows[0].token_estimate, 12);
    }

    #[tokio::test]
    async fn corrupt_rows_are_skipped_not_fatal() {
        let repo = repo();
        repo.insert_text(&buffer("good", "2025-01-15T14:01:00"), "fine").unwrap();

        // Write garbage bytes directly.
        let conn = repo.db.get_connection().unwrap();
        conn.execute(
            "INSERT INTO text_buffers (text_id, ts, source_type, compressed_text, token_estimate)
             VALUES ('bad', '2025-01-15T14:02:00.000', 'ocr', X'DEADBEEF', 5)",
            [],
        )
        .unwrap();
        drop(conn);

        let rows = repo
            .buffers_in_range(ts("2025-01-15T14:00:00"), ts("2025-01-15T15:00:00"))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text_id, "good");

        // The count still reflects raw rows.
        let count = repo
            .count_in_range(ts("2025-01-15T14:00:00"), ts("2025-01-15T15:00:00"))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
