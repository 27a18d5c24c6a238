//! Background job bookkeeping.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::params;
use tokio::task;
use trace_core::storage::{JobRecord, JobStore};
use trace_domain::utils::time::{format_ts, parse_ts};
use trace_domain::{Result, TraceError};

use super::manager::{map_sql, DbManager};

/// Job table access.
pub struct SqliteJobRepository {
    db: Arc<DbManager>,
}

impl SqliteJobRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Most recent failure markers of one job type, newest first.
    pub async fn recent_failures(&self, job_type: &str, limit: usize) -> Result<Vec<JobRecord>> {
        let db = Arc::clone(&self.db);
        let job_type = job_type.to_string();
        task::spawn_blocking(move || -> Result<Vec<JobRecord>> {
            let conn = db.get_connection()?;
            let mut statement = conn
                .prepare(
                    "SELECT job_id, job_type, target_ts, status, error, created_ts
                     FROM jobs
                     WHERE job_type = ?1 AND status = 'failed'
                     ORDER BY created_ts DESC
                     LIMIT ?2",
                )
                .map_err(map_sql)?;

            let records = statement
                .query_map(params![job_type, limit as i64], |row| {
                    let target_raw: String = row.get("target_ts")?;
                    let created_raw: String = row.get("created_ts")?;
                    Ok(JobRecord {
                        job_id: row.get("job_id")?,
                        job_type: row.get("job_type")?,
                        target_ts: parse_ts(&target_raw).unwrap_or_default(),
                        status: row.get("status")?,
                        error: row.get("error")?,
                        created_ts: parse_ts(&created_raw).unwrap_or_default(),
                    })
                })
                .map_err(map_sql)?
                .filter_map(std::result::Result::ok)
                .collect();
            Ok(records)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }
}

#[async_trait]
impl JobStore for SqliteJobRepository {
    async fn record_job(&self, job: &JobRecord) -> Result<()> {
        let db = Arc::clone(&self.db);
        let job = job.clone();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT OR REPLACE INTO jobs
                 (job_id, job_type, target_ts, status, error, created_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    job.job_id,
                    job.job_type,
                    format_ts(job.target_ts),
                    job.status,
                    job.error,
                    format_ts(job.created_ts),
                ],
            )
            .map_err(map_sql)?;
            Ok(())
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_lists_failures() {
        let db = Arc::new(DbManager::in_memory().unwrap());
        db.run_migrations().unwrap();
        let repo = SqliteJobRepository::new(db);

        repo.record_job(&JobRecord {
            job_id: "j1".into(),
            job_type: "summarize_hour".into(),
            target_ts: "2025-01-15T14:00:00".parse().unwrap(),
            status: "failed".into(),
            error: Some("schema invalid".into()),
            created_ts: "2025-01-15T15:01:00".parse().unwrap(),
        })
        .await
        .unwrap();
        repo.record_job(&JobRecord {
            job_id: "j2".into(),
            job_type: "summarize_hour".into(),
            target_ts: "2025-01-15T15:00:00".parse().unwrap(),
            status: "done".into(),
            error: None,
            created_ts: "2025-01-15T16:01:00".parse().unwrap(),
        })
        .await
        .unwrap();

        let failures = repo.recent_failures("summarize_hour", 10).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].job_id, "j1");
        assert_eq!(failures[0].error.as_deref(), Some("schema invalid"));
    }
}
