//! Async typed-edge persistence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{params, Row};
use tokio::task;
use trace_core::storage::EdgeStore;
use trace_domain::types::{Edge, EdgeKind};
use trace_domain::utils::time::{format_ts, parse_ts};
use trace_domain::{Result, TraceError};

use super::manager::{map_sql, DbManager};

/// Edge rows keyed by `(from_id, to_id, edge_type)`.
pub struct SqliteEdgeRepository {
    db: Arc<DbManager>,
}

impl SqliteEdgeRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<Edge> {
    let kind_raw: String = row.get("edge_type")?;
    let start_raw: Option<String> = row.get("start_ts")?;
    let end_raw: Option<String> = row.get("end_ts")?;
    let evidence_raw: String = row.get("evidence_note_ids")?;

    Ok(Edge {
        from_id: row.get("from_id")?,
        to_id: row.get("to_id")?,
        edge_type: EdgeKind::parse(&kind_raw).unwrap_or(EdgeKind::CoOccurredWith),
        weight: row.get("weight")?,
        start_ts: start_raw.and_then(|raw| parse_ts(&raw).ok()),
        end_ts: end_raw.and_then(|raw| parse_ts(&raw).ok()),
        evidence_note_ids: serde_json::from_str(&evidence_raw).unwrap_or_default(),
    })
}

#[async_trait]
impl EdgeStore for SqliteEdgeRepository {
    async fn upsert_edge(&self, edge: &Edge) -> Result<()> {
        let db = Arc::clone(&self.db);
        let edge = edge.clone();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;

            let existing_evidence: Option<String> = conn
                .query_row(
                    "SELECT evidence_note_ids FROM edges
                     WHERE from_id = ?1 AND to_id = ?2 AND edge_type = ?3",
                    params![edge.from_id, edge.to_id, edge.edge_type.as_str()],
                    |row| row.get(0),
                )
                .ok();

            // Union evidence ids before the write; weight keeps the max.
            let mut evidence: Vec<String> = existing_evidence
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default();
            for id in &edge.evidence_note_ids {
                if !evidence.contains(id) {
                    evidence.push(id.clone());
                }
            }

            conn.execute(
                "INSERT INTO edges
                 (from_id, to_id, edge_type, weight, start_ts, end_ts, evidence_note_ids)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(from_id, to_id, edge_type) DO UPDATE SET
                     weight = MAX(edges.weight, excluded.weight),
                     start_ts = COALESCE(MIN(edges.start_ts, excluded.start_ts), edges.start_ts, excluded.start_ts),
                     end_ts = COALESCE(MAX(edges.end_ts, excluded.end_ts), edges.end_ts, excluded.end_ts),
                     evidence_note_ids = excluded.evidence_note_ids",
                params![
                    edge.from_id,
                    edge.to_id,
                    edge.edge_type.as_str(),
                    edge.weight,
                    edge.start_ts.map(format_ts),
                    edge.end_ts.map(format_ts),
                    serde_json::to_string(&evidence).unwrap_or_else(|_| "[]".to_string()),
                ],
            )
            .map_err(map_sql)?;
            Ok(())
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn edges_for_entity(
        &self,
        entity_id: &str,
        min_weight: f64,
        edge_types: Option<&[EdgeKind]>,
        window: Option<(NaiveDateTime, NaiveDateTime)>,
    ) -> Result<Vec<Edge>> {
        let db = Arc::clone(&self.db);
        let entity_id = entity_id.to_string();
        let edge_types = edge_types.map(<[EdgeKind]>::to_vec);
        task::spawn_blocking(move || -> Result<Vec<Edge>> {
            let conn = db.get_connection()?;
            let mut statement = conn
                .prepare(
                    "SELECT from_id, to_id, edge_type, weight, start_ts, end_ts, evidence_note_ids
                     FROM edges
                     WHERE (from_id = ?1 OR to_id = ?1) AND weight >= ?2
                     ORDER BY weight DESC",
                )
                .map_err(map_sql)?;

            let edges: Vec<Edge> = statement
                .query_map(params![entity_id, min_weight], edge_from_row)
                .map_err(map_sql)?
                .filter_map(std::result::Result::ok)
                .filter(|e| {
                    edge_types
                        .as_ref()
                        .map_or(true, |kinds| kinds.contains(&e.edge_type))
                })
                .filter(|e| match window {
                    None => true,
                    Some((start, end)) => {
                        let edge_start = e.start_ts.unwrap_or(start);
                        let edge_end = e.end_ts.unwrap_or(end);
                        edge_start <= end && start <= edge_end
                    }
                })
                .collect();
            Ok(edges)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }
}
