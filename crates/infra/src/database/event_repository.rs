//! Async event span queries for evidence aggregation and backfill.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::Row;
use tokio::task;
use trace_core::storage::EventStore;
use trace_domain::types::EventSpan;
use trace_domain::utils::time::{format_ts, parse_ts};
use trace_domain::{Result, TraceError};

use super::manager::{map_sql, DbManager};

/// Event reads over the shared pool; writes stay on the capture thread.
pub struct SqliteEventRepository {
    db: Arc<DbManager>,
}

impl SqliteEventRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

pub(crate) fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventSpan> {
    let start_raw: String = row.get("start_ts")?;
    let end_raw: String = row.get("end_ts")?;
    let evidence_raw: Option<String> = row.get("evidence_ids")?;

    Ok(EventSpan {
        event_id: row.get("event_id")?,
        start_ts: parse_ts(&start_raw).unwrap_or_default(),
        end_ts: parse_ts(&end_raw).unwrap_or_default(),
        app_id: row.get("app_id")?,
        app_name: row.get("app_name")?,
        window_title: row.get("window_title")?,
        focused_monitor: row.get("focused_monitor")?,
        url: row.get("url")?,
        page_title: row.get("page_title")?,
        file_path: row.get("file_path")?,
        location_text: row.get("location_text")?,
        now_playing_json: row.get("now_playing_json")?,
        evidence_ids: evidence_raw
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default(),
    })
}

#[async_trait]
impl EventStore for SqliteEventRepository {
    async fn events_overlapping(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<EventSpan>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<EventSpan>> {
            let conn = db.get_connection()?;
            let mut statement = conn
                .prepare(
                    "SELECT event_id, start_ts, end_ts, app_id, app_name, window_title,
                            focused_monitor, url, page_title, file_path, location_text,
                            now_playing_json, evidence_ids
                     FROM events
                     WHERE start_ts < ?1 AND end_ts > ?2
                     ORDER BY start_ts",
                )
                .map_err(map_sql)?;

            let events = statement
                .query_map([format_ts(end), format_ts(start)], event_from_row)
                .map_err(map_sql)?
                .filter_map(std::result::Result::ok)
                .collect();
            Ok(events)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn count_starting_in(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<i64> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<i64> {
            let conn = db.get_connection()?;
            conn.query_row(
                "SELECT COUNT(*) FROM events WHERE start_ts >= ?1 AND start_ts < ?2",
                [format_ts(start), format_ts(end)],
                |row| row.get(0),
            )
            .map_err(map_sql)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }
}
