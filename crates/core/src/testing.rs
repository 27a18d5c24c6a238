//! Shared in-memory port fakes for core tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use trace_domain::canonical_name;
use trace_domain::types::{
    Aggregate, AggregateKeyType, Edge, EdgeKind, EmbeddingRecord, Entity, EntityKind, Note,
    NoteEntity, NoteType,
};
use trace_domain::{Result, TraceError};

use crate::storage::{
    AggregateStore, AggregateSum, EdgeStore, EmbeddingIndex, EntityStore, JobRecord, JobStore,
    NoteStore, SimilarityHit,
};
use crate::summarize::ports::NoteFiles;

pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - f64::from(dot / (norm_a * norm_b))
}

#[derive(Default)]
pub(crate) struct MemoryNotes {
    pub(crate) notes: Mutex<Vec<Note>>,
}

#[async_trait]
impl NoteStore for MemoryNotes {
    async fn find_note_id(
        &self,
        note_type: NoteType,
        start_ts: NaiveDateTime,
    ) -> Result<Option<String>> {
        Ok(self
            .notes
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.note_type == note_type && n.start_ts == start_ts)
            .map(|n| n.note_id.clone()))
    }

    async fn insert_note(&self, note: &Note) -> Result<()> {
        let mut notes = self.notes.lock().unwrap();
        notes.retain(|n| !(n.note_type == note.note_type && n.start_ts == note.start_ts));
        notes.push(note.clone());
        Ok(())
    }

    async fn get_note(&self, note_id: &str) -> Result<Option<Note>> {
        Ok(self.notes.lock().unwrap().iter().find(|n| n.note_id == note_id).cloned())
    }

    async fn notes_in_range(
        &self,
        note_type: Option<NoteType>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Note>> {
        let mut found: Vec<Note> = self
            .notes
            .lock()
            .unwrap()
            .iter()
            .filter(|n| note_type.map_or(true, |t| t == n.note_type))
            .filter(|n| n.start_ts >= start && n.start_ts < end)
            .cloned()
            .collect();
        found.sort_by_key(|n| n.start_ts);
        Ok(found)
    }

    async fn notes_by_ids(&self, note_ids: &[String]) -> Result<Vec<Note>> {
        Ok(self
            .notes
            .lock()
            .unwrap()
            .iter()
            .filter(|n| note_ids.contains(&n.note_id))
            .cloned()
            .collect())
    }

    async fn notes_with_payload_like(&self, needle: &str, limit: usize) -> Result<Vec<Note>> {
        Ok(self
            .notes
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.json_payload.contains(needle))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct MemoryGraph {
    pub(crate) entities: Mutex<Vec<Entity>>,
    pub(crate) links: Mutex<Vec<NoteEntity>>,
    pub(crate) edges: Mutex<Vec<Edge>>,
}

#[async_trait]
impl EntityStore for MemoryGraph {
    async fn find_by_canonical(
        &self,
        entity_type: EntityKind,
        canonical: &str,
    ) -> Result<Option<Entity>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.entity_type == entity_type && e.canonical_name == canonical)
            .cloned())
    }

    async fn insert_entity(&self, entity: &Entity) -> Result<()> {
        self.entities.lock().unwrap().push(entity.clone());
        Ok(())
    }

    async fn add_alias(&self, entity_id: &str, alias: &str) -> Result<()> {
        let mut entities = self.entities.lock().unwrap();
        if let Some(entity) = entities.iter_mut().find(|e| e.entity_id == entity_id) {
            if !entity.aliases.iter().any(|a| a == alias) {
                entity.aliases.push(alias.to_string());
            }
        }
        Ok(())
    }

    async fn upsert_note_entity(&self, link: &NoteEntity) -> Result<()> {
        let mut links = self.links.lock().unwrap();
        match links
            .iter_mut()
            .find(|l| l.note_id == link.note_id && l.entity_id == link.entity_id)
        {
            Some(existing) => {
                existing.strength = existing.strength.max(link.strength);
                if existing.context.is_none() {
                    existing.context = link.context.clone();
                }
            }
            None => links.push(link.clone()),
        }
        Ok(())
    }

    async fn get_note_entity(
        &self,
        note_id: &str,
        entity_id: &str,
    ) -> Result<Option<NoteEntity>> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.note_id == note_id && l.entity_id == entity_id)
            .cloned())
    }

    async fn entities_by_ids(&self, entity_ids: &[String]) -> Result<Vec<Entity>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|e| entity_ids.contains(&e.entity_id))
            .cloned()
            .collect())
    }

    async fn find_ids_matching(
        &self,
        normalized_query: &str,
        entity_type: Option<EntityKind>,
    ) -> Result<Vec<String>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|e| entity_type.map_or(true, |t| t == e.entity_type))
            .filter(|e| {
                e.canonical_name == normalized_query
                    || e.aliases.iter().any(|a| canonical_name(a) == normalized_query)
            })
            .map(|e| e.entity_id.clone())
            .collect())
    }

    async fn note_links_for_entities(
        &self,
        entity_ids: &[String],
        limit: usize,
    ) -> Result<Vec<NoteEntity>> {
        let mut links: Vec<NoteEntity> = self
            .links
            .lock()
            .unwrap()
            .iter()
            .filter(|l| entity_ids.contains(&l.entity_id))
            .cloned()
            .collect();
        links.sort_by(|a, b| {
            b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal)
        });
        links.truncate(limit);
        Ok(links)
    }

    async fn links_for_note(&self, note_id: &str) -> Result<Vec<NoteEntity>> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.note_id == note_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EdgeStore for MemoryGraph {
    async fn upsert_edge(&self, edge: &Edge) -> Result<()> {
        let mut edges = self.edges.lock().unwrap();
        match edges.iter_mut().find(|e| {
            e.from_id == edge.from_id && e.to_id == edge.to_id && e.edge_type == edge.edge_type
        }) {
            Some(existing) => {
                existing.weight = existing.weight.max(edge.weight);
                for id in &edge.evidence_note_ids {
                    if !existing.evidence_note_ids.contains(id) {
                        existing.evidence_note_ids.push(id.clone());
                    }
                }
            }
            None => edges.push(edge.clone()),
        }
        Ok(())
    }

    async fn edges_for_entity(
        &self,
        entity_id: &str,
        min_weight: f64,
        edge_types: Option<&[EdgeKind]>,
        window: Option<(NaiveDateTime, NaiveDateTime)>,
    ) -> Result<Vec<Edge>> {
        let mut found: Vec<Edge> = self
            .edges
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.from_id == entity_id || e.to_id == entity_id)
            .filter(|e| e.weight >= min_weight)
            .filter(|e| edge_types.map_or(true, |kinds| kinds.contains(&e.edge_type)))
            .filter(|e| match window {
                None => true,
                Some((start, end)) => {
                    let edge_start = e.start_ts.unwrap_or(start);
                    let edge_end = e.end_ts.unwrap_or(end);
                    edge_start <= end && start <= edge_end
                }
            })
            .cloned()
            .collect();
        found
            .sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
        Ok(found)
    }
}

#[derive(Default)]
pub(crate) struct MemoryAggregates {
    pub(crate) rows: Mutex<Vec<Aggregate>>,
}

#[async_trait]
impl AggregateStore for MemoryAggregates {
    async fn record(&self, aggregate: &Aggregate) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        rows.retain(|r| {
            !(r.period_type == aggregate.period_type
                && r.period_start_ts == aggregate.period_start_ts
                && r.key_type == aggregate.key_type
                && r.key == aggregate.key)
        });
        rows.push(aggregate.clone());
        Ok(())
    }

    async fn delete_period_rows(
        &self,
        period_type: trace_domain::types::PeriodType,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<usize> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| {
            !(r.period_type == period_type
                && r.period_start_ts >= start
                && r.period_end_ts <= end)
        });
        Ok(before - rows.len())
    }

    async fn top_by_key_type(
        &self,
        key_type: AggregateKeyType,
        window: Option<(NaiveDateTime, NaiveDateTime)>,
        limit: usize,
    ) -> Result<Vec<AggregateSum>> {
        use std::collections::BTreeMap;
        let rows = self.rows.lock().unwrap();
        let mut totals: BTreeMap<String, (f64, NaiveDateTime, NaiveDateTime)> = BTreeMap::new();
        for row in rows.iter().filter(|r| r.key_type == key_type).filter(|r| {
            window.map_or(true, |(s, e)| r.period_start_ts <= e && s <= r.period_end_ts)
        }) {
            let entry = totals.entry(row.key.clone()).or_insert((
                0.0,
                row.period_start_ts,
                row.period_end_ts,
            ));
            entry.0 += row.value_num;
            entry.1 = entry.1.min(row.period_start_ts);
            entry.2 = entry.2.max(row.period_end_ts);
        }
        let mut sums: Vec<AggregateSum> = totals
            .into_iter()
            .map(|(key, (total, start, end))| AggregateSum {
                key,
                key_type,
                total,
                period_start: start,
                period_end: end,
            })
            .collect();
        sums.sort_by(|a, b| b.total.partial_cmp(&a.total).unwrap_or(std::cmp::Ordering::Equal));
        sums.truncate(limit);
        Ok(sums)
    }

    async fn sum_for_key(
        &self,
        key: &str,
        key_type: Option<AggregateKeyType>,
        window: Option<(NaiveDateTime, NaiveDateTime)>,
    ) -> Result<f64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.key == key)
            .filter(|r| key_type.map_or(true, |t| t == r.key_type))
            .filter(|r| {
                window.map_or(true, |(s, e)| r.period_start_ts <= e && s <= r.period_end_ts)
            })
            .map(|r| r.value_num)
            .sum())
    }
}

#[derive(Default)]
pub(crate) struct MemoryEmbeddings {
    pub(crate) records: Mutex<Vec<EmbeddingRecord>>,
}

#[async_trait]
impl EmbeddingIndex for MemoryEmbeddings {
    async fn upsert(&self, record: &EmbeddingRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        records
            .retain(|r| !(r.source_type == record.source_type && r.source_id == record.source_id));
        records.push(record.clone());
        Ok(())
    }

    async fn query_similar(
        &self,
        vector: &[f32],
        source_type: &str,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>> {
        let records = self.records.lock().unwrap();
        let mut hits: Vec<SimilarityHit> = records
            .iter()
            .filter(|r| r.source_type == source_type)
            .map(|r| SimilarityHit {
                source_id: r.source_id.clone(),
                distance: cosine_distance(vector, &r.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[derive(Default)]
pub(crate) struct MemoryJobs {
    pub(crate) records: Mutex<Vec<JobRecord>>,
}

#[async_trait]
impl JobStore for MemoryJobs {
    async fn record_job(&self, job: &JobRecord) -> Result<()> {
        self.records.lock().unwrap().push(job.clone());
        Ok(())
    }
}

/// Language model returning one fixed response for every request.
pub(crate) struct StaticModel {
    pub(crate) response: String,
}

#[async_trait]
impl crate::summarize::ports::LanguageModel for StaticModel {
    async fn complete(
        &self,
        _request: crate::summarize::ports::ChatRequest,
    ) -> Result<crate::summarize::ports::ChatOutcome> {
        Ok(crate::summarize::ports::ChatOutcome {
            content: self.response.clone(),
            prompt_tokens: 10,
            completion_tokens: 10,
        })
    }

    fn model_name(&self) -> &str {
        "static"
    }
}

#[derive(Default)]
pub(crate) struct MemoryFiles {
    pub(crate) written: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl NoteFiles for MemoryFiles {
    async fn write_note(&self, relative_path: &str, content: &str) -> Result<()> {
        self.written
            .lock()
            .unwrap()
            .push((relative_path.to_string(), content.to_string()));
        Ok(())
    }

    async fn read_note(&self, relative_path: &str) -> Result<String> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .find(|(p, _)| p == relative_path)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| TraceError::NotFound(relative_path.to_string()))
    }

    async fn load_frame_jpeg(&self, _relative_path: &str) -> Result<Vec<u8>> {
        Err(TraceError::NotFound("no blobs in tests".into()))
    }
}
