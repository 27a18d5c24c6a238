//! Synchronous persistence for the capture worker.
//!
//! The capture tick runs on its own thread with a hard latency budget, so
//! these writes go straight through a pooled connection with no executor
//! hop.

use std::sync::Arc;

use rusqlite::params;
use trace_core::capture::ports::CaptureStore;
use trace_domain::types::{EventSpan, Screenshot};
use trace_domain::utils::time::format_ts;
use trace_domain::Result;

use super::manager::{map_sql, DbManager};

/// Screenshot and event writes used by the capture tick.
pub struct SqliteCaptureStore {
    db: Arc<DbManager>,
}

impl SqliteCaptureStore {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

impl CaptureStore for SqliteCaptureStore {
    fn insert_screenshot(&self, screenshot: &Screenshot) -> Result<()> {
        let conn = self.db.get_connection()?;
        conn.execute(
            "INSERT INTO screenshots
             (screenshot_id, ts, monitor_id, path, fingerprint, diff_score, width, height)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                screenshot.screenshot_id,
                format_ts(screenshot.ts),
                screenshot.monitor_id,
                screenshot.path,
                screenshot.fingerprint,
                screenshot.diff_score,
                screenshot.width,
                screenshot.height,
            ],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    fn upsert_event(&self, event: &EventSpan) -> Result<()> {
        let evidence = serde_json::to_string(&event.evidence_ids)
            .unwrap_or_else(|_| "[]".to_string());

        let conn = self.db.get_connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO events
             (event_id, start_ts, end_ts, app_id, app_name, window_title, focused_monitor,
              url, page_title, file_path, location_text, now_playing_json, evidence_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                event.event_id,
                format_ts(event.start_ts),
                format_ts(event.end_ts),
                event.app_id,
                event.app_name,
                event.window_title,
                event.focused_monitor,
                event.url,
                event.page_title,
                event.file_path,
                event.location_text,
                event.now_playing_json,
                evidence,
            ],
        )
        .map_err(map_sql)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteCaptureStore {
        let db = Arc::new(DbManager::in_memory().unwrap());
        db.run_migrations().unwrap();
        SqliteCaptureStore::new(db)
    }

    fn screenshot(id: &str) -> Screenshot {
        Screenshot {
            screenshot_id: id.to_string(),
            ts: "2025-01-15T14:00:00".parse().unwrap(),
            monitor_id: 0,
            path: format!("screenshots/{id}.jpg"),
            fingerprint: "ab".repeat(32),
            diff_score: 0.25,
            width: 1920,
            height: 1080,
        }
    }

    fn event(id: &str) -> EventSpan {
        EventSpan {
            event_id: id.to_string(),
            start_ts: "2025-01-15T14:00:00".parse().unwrap(),
            end_ts: "2025-01-15T14:05:00".parse().unwrap(),
            app_id: Some("com.microsoft.VSCode".into()),
            app_name: Some("VS Code".into()),
            window_title: Some("main.rs".into()),
            focused_monitor: Some(1),
            url: None,
            page_title: None,
            file_path: None,
            location_text: None,
            now_playing_json: None,
            evidence_ids: vec!["ss-1".into(), "ss-2".into()],
        }
    }

    #[test]
    fn inserts_screenshot_rows() {
        let store = store();
        store.insert_screenshot(&screenshot("ss-1")).unwrap();

        let conn = store.db.get_connection().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM screenshots", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn duplicate_screenshot_id_is_an_error() {
        let store = store();
        store.insert_screenshot(&screenshot("ss-1")).unwrap();
        assert!(store.insert_screenshot(&screenshot("ss-1")).is_err());
    }

    #[test]
    fn event_upsert_replaces_row() {
        let store = store();
        let mut span = event("e-1");
        store.upsert_event(&span).unwrap();

        span.end_ts = "2025-01-15T14:30:00".parse().unwrap();
        store.upsert_event(&span).unwrap();

        let conn = store.db.get_connection().unwrap();
        let (count, end_ts): (i64, String) = conn
            .query_row("SELECT COUNT(*), MAX(end_ts) FROM events", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(count, 1);
        assert!(end_ts.starts_with("2025-01-15T14:30:00"));
    }

    #[test]
    fn evidence_ids_round_trip_as_json() {
        let store = store();
        store.upsert_event(&event("e-1")).unwrap();

        let conn = store.db.get_connection().unwrap();
        let raw: String = conn
            .query_row("SELECT evidence_ids FROM events WHERE event_id = 'e-1'", [], |r| r.get(0))
            .unwrap();
        let ids: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(ids, vec!["ss-1", "ss-2"]);
    }
}
