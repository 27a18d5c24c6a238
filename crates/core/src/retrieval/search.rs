//! Vector search over note embeddings, plus entity / category / range
//! lookups on the same corpus.

use std::sync::Arc;

use chrono::NaiveDateTime;
use trace_domain::canonical_name;
use trace_domain::types::{EntityKind, Note, NoteType};
use trace_domain::Result;

use crate::storage::{EmbeddingIndex, EntityStore, NoteStore};
use crate::summarize::ports::Embedder;

use super::time::TimeFilter;

/// A note matched by a search, with its parsed payload highlights.
#[derive(Debug, Clone)]
pub struct NoteMatch {
    pub note_id: String,
    pub note_type: NoteType,
    pub start_ts: NaiveDateTime,
    pub end_ts: NaiveDateTime,
    pub file_path: String,
    pub summary: String,
    pub categories: Vec<String>,
    /// `(name, type)` pairs from the payload's declared entities.
    pub entities: Vec<(String, String)>,
    /// Similarity in `(0,1]`; 1.0 for direct (non-vector) lookups.
    pub score: f64,
}

impl NoteMatch {
    pub fn from_note(note: &Note, score: f64) -> Self {
        let payload = note.payload().ok();
        let summary = payload.as_ref().map(|p| p.summary.clone()).unwrap_or_default();
        let categories = payload.as_ref().map(|p| p.categories.clone()).unwrap_or_default();
        let entities = payload
            .as_ref()
            .map(|p| {
                p.entities
                    .iter()
                    .map(|e| (e.name.clone(), e.r#type.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            note_id: note.note_id.clone(),
            note_type: note.note_type,
            start_ts: note.start_ts,
            end_ts: note.end_ts,
            file_path: note.file_path.clone(),
            summary,
            categories,
            entities,
            score,
        }
    }
}

/// Result of a search operation.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub query: String,
    pub time_filter: Option<TimeFilter>,
    pub matches: Vec<NoteMatch>,
    pub total_notes_searched: usize,
    pub embedding_computed: bool,
}

/// KNN search over the embedding index with time-filter post-filtering.
pub struct VectorSearcher {
    notes: Arc<dyn NoteStore>,
    entities: Arc<dyn EntityStore>,
    index: Arc<dyn EmbeddingIndex>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl VectorSearcher {
    pub fn new(
        notes: Arc<dyn NoteStore>,
        entities: Arc<dyn EntityStore>,
        index: Arc<dyn EmbeddingIndex>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self { notes, entities, index, embedder }
    }

    /// Semantic search. With a time filter, 5x the limit is fetched before
    /// filtering to preserve recall; matches below `min_score` are dropped.
    pub async fn search(
        &self,
        query: &str,
        time_filter: Option<&TimeFilter>,
        limit: usize,
        min_score: f64,
    ) -> Result<SearchResult> {
        let Some(embedder) = self.embedder.as_ref() else {
            return Ok(SearchResult {
                query: query.to_string(),
                time_filter: time_filter.cloned(),
                matches: vec![],
                total_notes_searched: 0,
                embedding_computed: false,
            });
        };

        let vector = embedder.embed(query).await?;
        let matches = self
            .search_with_vector(&vector, None, time_filter, limit, min_score)
            .await?;

        Ok(SearchResult {
            query: query.to_string(),
            time_filter: time_filter.cloned(),
            total_notes_searched: matches.len(),
            matches,
            embedding_computed: true,
        })
    }

    /// KNN with an existing query vector, optionally restricted to one note
    /// type. Used directly by the hierarchical searcher to avoid re-embedding
    /// the query per stage.
    pub async fn search_with_vector(
        &self,
        vector: &[f32],
        note_type: Option<NoteType>,
        time_filter: Option<&TimeFilter>,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<NoteMatch>> {
        let fetch_limit = if time_filter.is_some() { limit.max(1) * 5 } else { limit };
        let hits = self.index.query_similar(vector, "note", fetch_limit).await?;

        if hits.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<String> = hits.iter().map(|h| h.source_id.clone()).collect();
        let notes = self.notes.notes_by_ids(&ids).await?;

        let mut matches = Vec::new();
        for hit in &hits {
            let Some(note) = notes.iter().find(|n| n.note_id == hit.source_id) else {
                continue;
            };
            if let Some(wanted) = note_type {
                if note.note_type != wanted {
                    continue;
                }
            }
            if let Some(filter) = time_filter {
                if !filter.overlaps(note.start_ts, note.end_ts) {
                    continue;
                }
            }

            let score = 1.0 / (1.0 + hit.distance.max(0.0));
            if score < min_score {
                continue;
            }

            matches.push(NoteMatch::from_note(note, score));
            if matches.len() >= limit {
                break;
            }
        }

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(matches)
    }

    /// Notes linked to entities whose canonical name or alias matches the
    /// query, strongest link first.
    pub async fn search_by_entity(
        &self,
        entity_query: &str,
        entity_type: Option<EntityKind>,
        limit: usize,
    ) -> Result<Vec<NoteMatch>> {
        let normalized = canonical_name(entity_query);
        let entity_ids = self.entities.find_ids_matching(&normalized, entity_type).await?;
        if entity_ids.is_empty() {
            return Ok(vec![]);
        }

        let links = self.entities.note_links_for_entities(&entity_ids, limit).await?;
        let note_ids: Vec<String> = links.iter().map(|l| l.note_id.clone()).collect();
        let notes = self.notes.notes_by_ids(&note_ids).await?;

        let mut matches = Vec::new();
        for link in &links {
            if let Some(note) = notes.iter().find(|n| n.note_id == link.note_id) {
                if matches.iter().any(|m: &NoteMatch| m.note_id == note.note_id) {
                    continue;
                }
                matches.push(NoteMatch::from_note(note, link.strength));
            }
            if matches.len() >= limit {
                break;
            }
        }

        Ok(matches)
    }

    /// Notes whose parsed categories contain `category`. A payload LIKE
    /// prefilter narrows the scan; rows are re-verified by parsing.
    pub async fn search_by_category(&self, category: &str, limit: usize) -> Result<Vec<NoteMatch>> {
        let wanted = category.to_lowercase();
        let candidates = self.notes.notes_with_payload_like(&wanted, limit * 4).await?;

        let mut matches = Vec::new();
        for note in &candidates {
            let Ok(payload) = note.payload() else {
                continue;
            };
            if payload.categories.iter().any(|c| c.to_lowercase() == wanted) {
                matches.push(NoteMatch::from_note(note, 1.0));
                if matches.len() >= limit {
                    break;
                }
            }
        }

        Ok(matches)
    }

    /// Time-range-only lookup, no embedding involved.
    pub async fn notes_in_range(
        &self,
        note_type: Option<NoteType>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<NoteMatch>> {
        let notes = self.notes.notes_in_range(note_type, start, end).await?;
        Ok(notes.iter().map(|n| NoteMatch::from_note(n, 1.0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Duration;
    use trace_domain::types::EmbeddingRecord;

    use super::*;
    use crate::retrieval::time::parse_time_filter;
    use crate::testing::{MemoryEmbeddings, MemoryGraph, MemoryNotes};

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            // Map known queries onto fixed axes so distances are predictable.
            Ok(match text {
                t if t.contains("rust") => vec![1.0, 0.0, 0.0],
                t if t.contains("music") => vec![0.0, 1.0, 0.0],
                _ => vec![0.0, 0.0, 1.0],
            })
        }

        fn model_name(&self) -> &str {
            "axis"
        }
    }

    fn note(id: &str, start: &str, summary: &str, categories: &[&str]) -> Note {
        let start_ts: NaiveDateTime = start.parse().unwrap();
        let payload = serde_json::json!({
            "summary": summary,
            "categories": categories,
            "entities": [],
        });
        Note {
            note_id: id.to_string(),
            note_type: NoteType::Hour,
            start_ts,
            end_ts: start_ts + Duration::hours(1),
            file_path: format!("notes/{id}.md"),
            json_payload: payload.to_string(),
            created_ts: start_ts,
            updated_ts: start_ts,
        }
    }

    async fn fixture() -> VectorSearcher {
        let notes = Arc::new(MemoryNotes::default());
        let graph = Arc::new(MemoryGraph::default());
        let index = Arc::new(MemoryEmbeddings::default());

        let rust_note = note("n-rust", "2025-01-15T14:00:00", "Worked on Rust", &["work"]);
        let music_note =
            note("n-music", "2025-01-10T20:00:00", "Listened to music", &["entertainment"]);

        notes.insert_note(&rust_note).await.unwrap();
        notes.insert_note(&music_note).await.unwrap();

        index
            .upsert(&EmbeddingRecord {
                embedding_id: "e1".into(),
                source_type: "note".into(),
                source_id: "n-rust".into(),
                vector: vec![1.0, 0.0, 0.0],
                model_name: "axis".into(),
            })
            .await
            .unwrap();
        index
            .upsert(&EmbeddingRecord {
                embedding_id: "e2".into(),
                source_type: "note".into(),
                source_id: "n-music".into(),
                vector: vec![0.0, 1.0, 0.0],
                model_name: "axis".into(),
            })
            .await
            .unwrap();

        VectorSearcher::new(notes, graph, index, Some(Arc::new(AxisEmbedder)))
    }

    #[tokio::test]
    async fn semantic_search_ranks_by_similarity() {
        let searcher = fixture().await;

        let result = searcher.search("rust programming", None, 5, 0.0).await.unwrap();
        assert!(result.embedding_computed);
        assert_eq!(result.matches[0].note_id, "n-rust");
        assert!(result.matches[0].score > result.matches[1].score);
        assert!(result.matches.iter().all(|m| m.score > 0.0 && m.score <= 1.0));
    }

    #[tokio::test]
    async fn time_filter_post_filters_matches() {
        let searcher = fixture().await;
        let reference = "2025-01-15T18:00:00".parse().unwrap();
        let filter = parse_time_filter("today", reference).unwrap();

        let result = searcher.search("music", Some(&filter), 5, 0.0).await.unwrap();
        // The music note is from Jan 10 and falls outside "today".
        assert!(result.matches.iter().all(|m| m.note_id != "n-music"));
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].note_id, "n-rust");
    }

    #[tokio::test]
    async fn min_score_drops_weak_matches() {
        let searcher = fixture().await;
        let result = searcher.search("rust", None, 5, 0.9).await.unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].note_id, "n-rust");
    }

    #[tokio::test]
    async fn search_without_embedder_is_empty_not_err() {
        let notes = Arc::new(MemoryNotes::default());
        let graph = Arc::new(MemoryGraph::default());
        let index = Arc::new(MemoryEmbeddings::default());
        let searcher = VectorSearcher::new(notes, graph, index, None);

        let result = searcher.search("anything", None, 5, 0.0).await.unwrap();
        assert!(!result.embedding_computed);
        assert!(result.matches.is_empty());
    }

    #[tokio::test]
    async fn category_search_verifies_parsed_categories() {
        let searcher = fixture().await;
        let matches = searcher.search_by_category("work", 10).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].note_id, "n-rust");
    }
}
