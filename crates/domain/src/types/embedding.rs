//! Embedding rows for the vector index.

use serde::{Deserialize, Serialize};

/// A stored embedding. The index keys on `(source_type, source_id)`
/// uniquely; updates are delete-then-insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub embedding_id: String,
    pub source_type: String,
    pub source_id: String,
    pub vector: Vec<f32>,
    pub model_name: String,
}

impl EmbeddingRecord {
    /// Dimension of the stored vector.
    pub fn dim(&self) -> usize {
        self.vector.len()
    }
}
