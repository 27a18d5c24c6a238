//! Async screenshot queries: triage candidates, counts and retention
//! deletion.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::task;
use trace_core::storage::{ScreenshotCandidateRow, ScreenshotStore};
use trace_domain::utils::time::format_ts;
use trace_domain::{Result, TraceError};

use super::manager::{map_sql, DbManager};

/// Screenshot reads and retention trimming.
pub struct SqliteScreenshotRepository {
    db: Arc<DbManager>,
}

impl SqliteScreenshotRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ScreenshotStore for SqliteScreenshotRepository {
    async fn count_in_range(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<i64> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<i64> {
            let conn = db.get_connection()?;
            conn.query_row(
                "SELECT COUNT(*) FROM screenshots WHERE ts >= ?1 AND ts < ?2",
                [format_ts(start), format_ts(end)],
                |row| row.get(0),
            )
            .map_err(map_sql)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn candidates_in_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ScreenshotCandidateRow>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<ScreenshotCandidateRow>> {
            let conn = db.get_connection()?;
            // Half-open join bounds so a frame on an event boundary attaches
            // to exactly one event.
            let mut statement = conn
                .prepare(
                    "SELECT s.screenshot_id, s.ts, s.monitor_id, s.path, s.fingerprint,
                            s.diff_score, e.app_id, e.app_name, e.window_title
                     FROM screenshots s
                     LEFT JOIN events e ON s.ts >= e.start_ts AND s.ts < e.end_ts
                     WHERE s.ts >= ?1 AND s.ts < ?2
                     ORDER BY s.ts",
                )
                .map_err(map_sql)?;

            let rows = statement
                .query_map([format_ts(start), format_ts(end)], |row| {
                    let ts_raw: String = row.get("ts")?;
                    Ok(ScreenshotCandidateRow {
                        screenshot_id: row.get("screenshot_id")?,
                        ts: trace_domain::utils::time::parse_ts(&ts_raw).unwrap_or_default(),
                        monitor_id: row.get("monitor_id")?,
                        path: row.get("path")?,
                        fingerprint: row.get("fingerprint")?,
                        diff_score: row.get::<_, Option<f64>>("diff_score")?.unwrap_or(0.0),
                        app_id: row.get("app_id")?,
                        app_name: row.get("app_name")?,
                        window_title: row.get("window_title")?,
                    })
                })
                .map_err(map_sql)?
                .filter_map(std::result::Result::ok)
                .collect();
            Ok(rows)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn delete_older_than(&self, cutoff: NaiveDateTime) -> Result<Vec<String>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql)?;

            let paths: Vec<String> = {
                let mut statement = tx
                    .prepare("SELECT path FROM screenshots WHERE ts < ?1")
                    .map_err(map_sql)?;
                let result = statement
                    .query_map([format_ts(cutoff)], |row| row.get::<_, String>(0))
                    .map_err(map_sql)?
                    .filter_map(std::result::Result::ok)
                    .collect();
                result
            };

            tx.execute("DELETE FROM screenshots WHERE ts < ?1", [format_ts(cutoff)])
                .map_err(map_sql)?;
            for path in &paths {
                tx.execute(
                    "INSERT INTO deletion_log (path, reason, deleted_ts)
                     VALUES (?1, 'retention', datetime('now', 'localtime'))",
                    [path],
                )
                .map_err(map_sql)?;
            }
            tx.commit().map_err(map_sql)?;

            Ok(paths)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use trace_core::capture::ports::CaptureStore;
    use trace_domain::types::{EventSpan, Screenshot};

    use super::super::capture_store::SqliteCaptureStore;
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    fn shot(id: &str, at: &str) -> Screenshot {
        Screenshot {
            screenshot_id: id.to_string(),
            ts: ts(at),
            monitor_id: 0,
            path: format!("screenshots/{id}.jpg"),
            fingerprint: "00".repeat(32),
            diff_score: 0.4,
            width: 1280,
            height: 720,
        }
    }

    async fn fixture() -> (SqliteCaptureStore, SqliteScreenshotRepository, Arc<DbManager>) {
        let db = Arc::new(DbManager::in_memory().unwrap());
        db.run_migrations().unwrap();
        (
            SqliteCaptureStore::new(Arc::clone(&db)),
            SqliteScreenshotRepository::new(Arc::clone(&db)),
            db,
        )
    }

    #[tokio::test]
    async fn candidates_join_overlapping_event() {
        let (writer, repo, _db) = fixture().await;

        writer
            .upsert_event(&EventSpan {
                event_id: "e1".into(),
                start_ts: ts("2025-01-15T14:00:00"),
                end_ts: ts("2025-01-15T14:30:00"),
                app_id: Some("com.microsoft.VSCode".into()),
                app_name: Some("VS Code".into()),
                window_title: Some("main.rs".into()),
                focused_monitor: None,
                url: None,
                page_title: None,
                file_path: None,
                location_text: None,
                now_playing_json: None,
                evidence_ids: vec![],
            })
            .unwrap();
        writer.insert_screenshot(&shot("in-event", "2025-01-15T14:10:00")).unwrap();
        writer.insert_screenshot(&shot("no-event", "2025-01-15T14:45:00")).unwrap();

        let rows = repo
            .candidates_in_range(ts("2025-01-15T14:00:00"), ts("2025-01-15T15:00:00"))
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].app_name.as_deref(), Some("VS Code"));
        assert_eq!(rows[1].app_name, None);
    }

    #[tokio::test]
    async fn retention_deletes_rows_and_logs_paths() {
        let (writer, repo, db) = fixture().await;
        writer.insert_screenshot(&shot("old", "2025-01-01T10:00:00")).unwrap();
        writer.insert_screenshot(&shot("new", "2025-01-15T10:00:00")).unwrap();

        let deleted = repo.delete_older_than(ts("2025-01-10T00:00:00")).await.unwrap();
        assert_eq!(deleted, vec!["screenshots/old.jpg".to_string()]);

        let remaining = repo
            .count_in_range(ts("2025-01-01T00:00:00"), ts("2025-02-01T00:00:00"))
            .await
            .unwrap();
        assert_eq!(remaining, 1);

        let conn = db.get_connection().unwrap();
        let logged: i64 = conn
            .query_row("SELECT COUNT(*) FROM deletion_log WHERE reason = 'retention'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(logged, 1);
    }
}
