//! Persistence port traits implemented by the infrastructure layer.
//!
//! Async traits serve the summarizer, retrieval engine and jobs; the capture
//! worker uses the synchronous ports in [`crate::capture::ports`] instead so
//! its tick never touches an executor.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use trace_domain::types::{
    Aggregate, AggregateKeyType, Edge, EdgeKind, EmbeddingRecord, Entity, EntityKind, EventSpan,
    Note, NoteEntity, NoteType,
};
use trace_domain::Result;

/// A screenshot candidate row joined with its overlapping event, as consumed
/// by triage and keyframe selection.
#[derive(Debug, Clone)]
pub struct ScreenshotCandidateRow {
    pub screenshot_id: String,
    pub ts: NaiveDateTime,
    pub monitor_id: i64,
    pub path: String,
    pub fingerprint: String,
    pub diff_score: f64,
    pub app_id: Option<String>,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
}

/// A nearest-neighbour hit from the vector index.
#[derive(Debug, Clone)]
pub struct SimilarityHit {
    pub source_id: String,
    pub distance: f64,
}

/// Aggregated `(key, total)` pair from the aggregates table.
#[derive(Debug, Clone)]
pub struct AggregateSum {
    pub key: String,
    pub key_type: AggregateKeyType,
    pub total: f64,
    pub period_start: NaiveDateTime,
    pub period_end: NaiveDateTime,
}

/// Persistent record of a background job attempt.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub job_type: String,
    pub target_ts: NaiveDateTime,
    pub status: String,
    pub error: Option<String>,
    pub created_ts: NaiveDateTime,
}

/// Note row persistence.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Id of the note for `(note_type, start_ts)`, if one exists.
    async fn find_note_id(
        &self,
        note_type: NoteType,
        start_ts: NaiveDateTime,
    ) -> Result<Option<String>>;

    async fn insert_note(&self, note: &Note) -> Result<()>;

    async fn get_note(&self, note_id: &str) -> Result<Option<Note>>;

    /// Notes whose `start_ts` lies in `[start, end)`, ordered by start.
    async fn notes_in_range(
        &self,
        note_type: Option<NoteType>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Note>>;

    async fn notes_by_ids(&self, note_ids: &[String]) -> Result<Vec<Note>>;

    /// LIKE prefilter over `json_payload`; callers re-verify by parsing.
    async fn notes_with_payload_like(&self, needle: &str, limit: usize) -> Result<Vec<Note>>;
}

/// Event span queries for evidence and backfill.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events overlapping `[start, end)`, ordered by `start_ts`.
    async fn events_overlapping(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<EventSpan>>;

    /// Count of events starting in `[start, end)`.
    async fn count_starting_in(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<i64>;
}

/// Screenshot row queries.
#[async_trait]
pub trait ScreenshotStore: Send + Sync {
    async fn count_in_range(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<i64>;

    /// Rows in `[start, end)` left-joined with their overlapping event
    /// (`ts >= e.start_ts AND ts < e.end_ts`), ordered by `ts`.
    async fn candidates_in_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ScreenshotCandidateRow>>;

    /// Delete rows older than `cutoff`, returning their blob paths so the
    /// caller can remove the files and log the deletions.
    async fn delete_older_than(&self, cutoff: NaiveDateTime) -> Result<Vec<String>>;
}

/// A text buffer row with its payload already decompressed. Rows whose
/// compressed payload is corrupt are skipped (and logged) by the store.
#[derive(Debug, Clone)]
pub struct TextBufferRow {
    pub text_id: String,
    pub ts: NaiveDateTime,
    pub source_type: String,
    pub reference: Option<String>,
    pub text: String,
    pub token_estimate: i64,
    pub event_id: Option<String>,
}

/// Text buffer queries.
#[async_trait]
pub trait TextBufferStore: Send + Sync {
    /// Buffers with `ts` in `[start, end)`, ordered by `ts`.
    async fn buffers_in_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<TextBufferRow>>;

    async fn count_in_range(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<i64>;
}

/// Entity and note-entity persistence.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_by_canonical(
        &self,
        entity_type: EntityKind,
        canonical_name: &str,
    ) -> Result<Option<Entity>>;

    async fn insert_entity(&self, entity: &Entity) -> Result<()>;

    /// Append a surface form to the alias list if not already present.
    async fn add_alias(&self, entity_id: &str, alias: &str) -> Result<()>;

    /// Upsert keeping the maximum strength and coalescing context.
    async fn upsert_note_entity(&self, link: &NoteEntity) -> Result<()>;

    async fn get_note_entity(&self, note_id: &str, entity_id: &str)
        -> Result<Option<NoteEntity>>;

    async fn entities_by_ids(&self, entity_ids: &[String]) -> Result<Vec<Entity>>;

    /// Entity ids whose canonical name or any alias matches the normalized
    /// query, optionally restricted by kind.
    async fn find_ids_matching(
        &self,
        normalized_query: &str,
        entity_type: Option<EntityKind>,
    ) -> Result<Vec<String>>;

    /// Note links for any of the given entities, strongest first.
    async fn note_links_for_entities(
        &self,
        entity_ids: &[String],
        limit: usize,
    ) -> Result<Vec<NoteEntity>>;

    /// All entity links of one note.
    async fn links_for_note(&self, note_id: &str) -> Result<Vec<NoteEntity>>;
}

/// Typed edge persistence.
#[async_trait]
pub trait EdgeStore: Send + Sync {
    /// Upsert on `(from_id, to_id, edge_type)`: keeps the maximum weight and
    /// unions evidence note ids.
    async fn upsert_edge(&self, edge: &Edge) -> Result<()>;

    /// Edges touching `entity_id` (either direction) with weight >=
    /// `min_weight`, optionally filtered by type and time overlap, heaviest
    /// first.
    async fn edges_for_entity(
        &self,
        entity_id: &str,
        min_weight: f64,
        edge_types: Option<&[EdgeKind]>,
        window: Option<(NaiveDateTime, NaiveDateTime)>,
    ) -> Result<Vec<Edge>>;
}

/// Aggregates persistence and rollup queries.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Replace the row keyed by `(period_type, period_start_ts, key_type, key)`.
    async fn record(&self, aggregate: &Aggregate) -> Result<()>;

    /// Delete rows of one period granularity whose window lies inside
    /// `[start, end)`. Used by the daily compaction so hour rows and their
    /// day rollup never double-count.
    async fn delete_period_rows(
        &self,
        period_type: trace_domain::types::PeriodType,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<usize>;

    /// Top keys of one type by summed value over rows whose period overlaps
    /// the window (all rows when `window` is `None`).
    async fn top_by_key_type(
        &self,
        key_type: AggregateKeyType,
        window: Option<(NaiveDateTime, NaiveDateTime)>,
        limit: usize,
    ) -> Result<Vec<AggregateSum>>;

    /// Summed value for a single key, optionally restricted by type.
    async fn sum_for_key(
        &self,
        key: &str,
        key_type: Option<AggregateKeyType>,
        window: Option<(NaiveDateTime, NaiveDateTime)>,
    ) -> Result<f64>;
}

/// Vector index over note embeddings.
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    /// Delete-then-insert for the record's `(source_type, source_id)`.
    async fn upsert(&self, record: &EmbeddingRecord) -> Result<()>;

    /// K nearest neighbours by cosine distance, nearest first.
    async fn query_similar(
        &self,
        vector: &[f32],
        source_type: &str,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>>;
}

/// Background job bookkeeping (failure markers consumed by backfill).
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn record_job(&self, job: &JobRecord) -> Result<()>;
}
