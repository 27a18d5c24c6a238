//! Vector index over note embeddings.
//!
//! Vectors persist as little-endian f32 blobs; nearest-neighbour queries
//! scan in process computing cosine distance. At personal-corpus scale this
//! stays far below interactive latency and keeps the storage engine fully
//! embedded. The index keys uniquely on `(source_type, source_id)` and
//! updates are delete-then-insert.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::params;
use tokio::task;
use trace_core::storage::{EmbeddingIndex, SimilarityHit};
use trace_domain::types::EmbeddingRecord;
use trace_domain::{Result, TraceError};

use super::manager::{map_sql, DbManager};

/// SQLite-backed embedding store with in-process KNN.
pub struct SqliteVectorIndex {
    db: Arc<DbManager>,
}

impl SqliteVectorIndex {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine distance in `[0, 2]`; degenerate vectors map to the maximum.
fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    (1.0 - f64::from(dot / (norm_a * norm_b))).max(0.0)
}

#[async_trait]
impl EmbeddingIndex for SqliteVectorIndex {
    async fn upsert(&self, record: &EmbeddingRecord) -> Result<()> {
        let db = Arc::clone(&self.db);
        let record = record.clone();
        task::spawn_blocking(move || -> Result<()> {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql)?;

            tx.execute(
                "DELETE FROM embeddings WHERE source_type = ?1 AND source_id = ?2",
                params![record.source_type, record.source_id],
            )
            .map_err(map_sql)?;

            tx.execute(
                "INSERT INTO embeddings
                 (embedding_id, source_type, source_id, vector, model_name, dim)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.embedding_id,
                    record.source_type,
                    record.source_id,
                    vector_to_blob(&record.vector),
                    record.model_name,
                    record.vector.len() as i64,
                ],
            )
            .map_err(map_sql)?;

            tx.commit().map_err(map_sql)?;
            Ok(())
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn query_similar(
        &self,
        vector: &[f32],
        source_type: &str,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>> {
        let db = Arc::clone(&self.db);
        let query = vector.to_vec();
        let source_type = source_type.to_string();
        task::spawn_blocking(move || -> Result<Vec<SimilarityHit>> {
            let conn = db.get_connection()?;
            let mut statement = conn
                .prepare("SELECT source_id, vector FROM embeddings WHERE source_type = ?1")
                .map_err(map_sql)?;

            let mut hits: Vec<SimilarityHit> = statement
                .query_map(params![source_type], |row| {
                    let source_id: String = row.get(0)?;
                    let blob: Vec<u8> = row.get(1)?;
                    Ok((source_id, blob))
                })
                .map_err(map_sql)?
                .filter_map(std::result::Result::ok)
                .map(|(source_id, blob)| SimilarityHit {
                    source_id,
                    distance: cosine_distance(&query, &blob_to_vector(&blob)),
                })
                .collect();

            hits.sort_by(|a, b| {
                a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal)
            });
            hits.truncate(limit);
            Ok(hits)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }
}
