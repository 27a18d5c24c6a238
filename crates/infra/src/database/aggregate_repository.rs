//! Async aggregates persistence and rollup queries.
//!
//! Writes replace the row keyed by `(period_type, period_start_ts,
//! key_type, key)`; the hourly summarization path is the single writer, so
//! updates for the same key are serialized by construction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::params;
use tokio::task;
use trace_core::storage::{AggregateStore, AggregateSum};
use trace_domain::types::{Aggregate, AggregateKeyType};
use trace_domain::utils::time::{format_ts, parse_ts};
use trace_domain::{Result, TraceError};

use super::manager::{map_sql, DbManager};

/// Aggregates table access.
pub struct SqliteAggregateRepository {
    db: Arc<DbManager>,
}

impl SqliteAggregateRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AggregateStore for SqliteAggregateRepository {
    async fn record(&self, aggregate: &Aggregate) -> Result<()> {
        let db = Arc::clone(&self.db);
        let aggregate = aggregate.clone();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT OR REPLACE INTO aggregates
                 (period_type, period_start_ts, period_end_ts, key_type, key, value_num, extra_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    aggregate.period_type.as_str(),
                    format_ts(aggregate.period_start_ts),
                    format_ts(aggregate.period_end_ts),
                    aggregate.key_type.as_str(),
                    aggregate.key,
                    aggregate.value_num,
                    aggregate.extra_json,
                ],
            )
            .map_err(map_sql)?;
            Ok(())
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn top_by_key_type(
        &self,
        key_type: AggregateKeyType,
        window: Option<(NaiveDateTime, NaiveDateTime)>,
        limit: usize,
    ) -> Result<Vec<AggregateSum>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<AggregateSum>> {
            let conn = db.get_connection()?;

            let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<AggregateSum> {
                let start_raw: String = row.get(2)?;
                let end_raw: String = row.get(3)?;
                Ok(AggregateSum {
                    key: row.get(0)?,
                    key_type,
                    total: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    period_start: parse_ts(&start_raw).unwrap_or_default(),
                    period_end: parse_ts(&end_raw).unwrap_or_default(),
                })
            };

            let sums = match window {
                Some((start, end)) => {
                    let mut statement = conn
                        .prepare(
                            "SELECT key, SUM(value_num),
                                    MIN(period_start_ts), MAX(period_end_ts)
                             FROM aggregates
                             WHERE key_type = ?1
                               AND period_start_ts <= ?2
                               AND period_end_ts >= ?3
                             GROUP BY key
                             ORDER BY SUM(value_num) DESC
                             LIMIT ?4",
                        )
                        .map_err(map_sql)?;
                    let result = statement
                        .query_map(
                            params![
                                key_type.as_str(),
                                format_ts(end),
                                format_ts(start),
                                limit as i64
                            ],
                            map_row,
                        )
                        .map_err(map_sql)?
                        .filter_map(std::result::Result::ok)
                        .collect();
                    result
                }
                None => {
                    let mut statement = conn
                        .prepare(
                            "SELECT key, SUM(value_num),
                                    MIN(period_start_ts), MAX(period_end_ts)
                             FROM aggregates
                             WHERE key_type = ?1
                             GROUP BY key
                             ORDER BY SUM(value_num) DESC
                             LIMIT ?2",
                        )
                        .map_err(map_sql)?;
                    let result = statement
                        .query_map(params![key_type.as_str(), limit as i64], map_row)
                        .map_err(map_sql)?
                        .filter_map(std::result::Result::ok)
                        .collect();
                    result
                }
            };

            Ok(sums)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn delete_period_rows(
        &self,
        period_type: trace_domain::types::PeriodType,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<usize> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<usize> {
            let conn = db.get_connection()?;
            let deleted = conn
                .execute(
                    "DELETE FROM aggregates
                     WHERE period_type = ?1 AND period_start_ts >= ?2 AND period_end_ts <= ?3",
                    params![period_type.as_str(), format_ts(start), format_ts(end)],
                )
                .map_err(map_sql)?;
            Ok(deleted)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn sum_for_key(
        &self,
        key: &str,
        key_type: Option<AggregateKeyType>,
        window: Option<(NaiveDateTime, NaiveDateTime)>,
    ) -> Result<f64> {
        let db = Arc::clone(&self.db);
        let key = key.to_string();
        task::spawn_blocking(move || -> Result<f64> {
            let conn = db.get_connection()?;

            let mut sql = "SELECT COALESCE(SUM(value_num), 0) FROM aggregates WHERE key = ?1"
                .to_string();
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(key)];

            if let Some(key_type) = key_type {
                sql.push_str(" AND key_type = ?2");
                params_vec.push(Box::new(key_type.as_str().to_string()));
            }
            if let Some((start, end)) = window {
                let base = params_vec.len();
                sql.push_str(&format!(
                    " AND period_start_ts <= ?{} AND period_end_ts >= ?{}",
                    base + 1,
                    base + 2
                ));
                params_vec.push(Box::new(format_ts(end)));
                params_vec.push(Box::new(format_ts(start)));
            }

            let total = conn
                .query_row(
                    &sql,
                    rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
                    |row| row.get::<_, f64>(0),
                )
                .map_err(map_sql)?;
            Ok(total)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use trace_domain::types::PeriodType;

    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    fn row(start: &str, key_type: AggregateKeyType, key: &str, value: f64) -> Aggregate {
        Aggregate {
            period_type: PeriodType::Hour,
            period_start_ts: ts(start),
            period_end_ts: ts(start) + chrono::Duration::hours(1),
            key_type,
            key: key.to_string(),
            value_num: value,
            extra_json: None,
        }
    }

    fn repo() -> SqliteAggregateRepository {
        let db = Arc::new(DbManager::in_memory().unwrap());
        db.run_migrations().unwrap();
        SqliteAggregateRepository::new(db)
    }

    #[tokio::test]
    async fn record_replaces_same_period_key() {
        let repo = repo();
        repo.record(&row("2025-01-15T14:00:00", AggregateKeyType::App, "VS Code", 100.0))
            .await
            .unwrap();
        repo.record(&row("2025-01-15T14:00:00", AggregateKeyType::App, "VS Code", 250.0))
            .await
            .unwrap();

        let total = repo
            .sum_for_key("VS Code", Some(AggregateKeyType::App), None)
            .await
            .unwrap();
        assert!((total - 250.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn top_sums_overlapping_windows() {
        let repo = repo();
        repo.record(&row("2025-01-15T14:00:00", AggregateKeyType::App, "VS Code", 1800.0))
            .await
            .unwrap();
        repo.record(&row("2025-01-15T15:00:00", AggregateKeyType::App, "VS Code", 600.0))
            .await
            .unwrap();
        repo.record(&row("2025-01-15T15:00:00", AggregateKeyType::App, "Safari", 900.0))
            .await
            .unwrap();
        repo.record(&row("2024-11-01T10:00:00", AggregateKeyType::App, "VS Code", 5000.0))
            .await
            .unwrap();

        let window = (ts("2025-01-15T00:00:00"), ts("2025-01-16T00:00:00"));
        let tops = repo
            .top_by_key_type(AggregateKeyType::App, Some(window), 10)
            .await
            .unwrap();

        assert_eq!(tops[0].key, "VS Code");
        assert!((tops[0].total - 2400.0).abs() < 1e-9);
        assert_eq!(tops[1].key, "Safari");
    }

    #[tokio::test]
    async fn sum_without_filters_covers_everything() {
        let repo = repo();
        repo.record(&row("2025-01-15T14:00:00", AggregateKeyType::Topic, "rust", 1.0))
            .await
            .unwrap();
        repo.record(&row("2025-01-16T14:00:00", AggregateKeyType::Topic, "rust", 1.0))
            .await
            .unwrap();

        let total = repo.sum_for_key("rust", None, None).await.unwrap();
        assert!((total - 2.0).abs() < 1e-9);
    }
}
