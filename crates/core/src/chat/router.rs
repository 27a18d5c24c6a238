//! Chat query routing.
//!
//! Each query resolves to one of four routes: aggregates ("top/most"
//! intents), entity ("about X"), timeline ("what did I do"), or semantic
//! (everything else). Every route assembles notes, aggregates and related
//! entities, then hands the context to the answer synthesizer.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use trace_domain::Result;

use crate::retrieval::aggregates::{detect_most_query, AggregateItem, AggregatesLookup};
use crate::retrieval::graph::{ExpandOptions, GraphExpander, RelatedEntity};
use crate::retrieval::hierarchical::HierarchicalSearcher;
use crate::retrieval::search::{NoteMatch, VectorSearcher};
use crate::retrieval::time::{parse_time_filter, TimeFilter};

use super::answer::{AnswerSynthesizer, SynthesizedAnswer};

/// How a query was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Aggregates,
    Entity,
    Timeline,
    Semantic,
}

/// Response to a chat query.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: SynthesizedAnswer,
    pub query_type: QueryType,
    pub time_filter: Option<TimeFilter>,
    pub note_count: usize,
    pub aggregate_count: usize,
}

/// Routing limits.
#[derive(Debug, Clone)]
pub struct ChatLimits {
    pub max_days: usize,
    pub max_hours_per_day: usize,
    pub max_context_notes: usize,
    pub max_aggregates: usize,
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self { max_days: 5, max_hours_per_day: 3, max_context_notes: 10, max_aggregates: 10 }
    }
}

/// The chat engine: routes, retrieves, synthesizes.
pub struct ChatEngine {
    aggregates: Arc<AggregatesLookup>,
    searcher: Arc<VectorSearcher>,
    hierarchical: Arc<HierarchicalSearcher>,
    graph: Arc<GraphExpander>,
    synthesizer: AnswerSynthesizer,
    limits: ChatLimits,
}

impl ChatEngine {
    pub fn new(
        aggregates: Arc<AggregatesLookup>,
        searcher: Arc<VectorSearcher>,
        hierarchical: Arc<HierarchicalSearcher>,
        graph: Arc<GraphExpander>,
        synthesizer: AnswerSynthesizer,
        limits: ChatLimits,
    ) -> Self {
        Self { aggregates, searcher, hierarchical, graph, synthesizer, limits }
    }

    /// Route and answer one query. `now` anchors relative time expressions.
    pub async fn query(&self, query: &str, now: NaiveDateTime) -> Result<ChatResponse> {
        let time_filter = parse_time_filter(query, now);
        let query_type = detect_query_type(query);

        let (notes, aggregates, related) = match query_type {
            QueryType::Aggregates => self.aggregates_context(query, time_filter.as_ref()).await?,
            QueryType::Entity => self.entity_context(query, time_filter.as_ref()).await?,
            QueryType::Timeline => self.timeline_context(query, time_filter.as_ref()).await?,
            QueryType::Semantic => self.semantic_context(query, time_filter.as_ref()).await?,
        };

        let answer = self
            .synthesizer
            .synthesize(query, &notes, &aggregates, &related, time_filter.as_ref())
            .await?;

        Ok(ChatResponse {
            answer,
            query_type,
            time_filter,
            note_count: notes.len(),
            aggregate_count: aggregates.len(),
        })
    }

    async fn aggregates_context(
        &self,
        query: &str,
        time_filter: Option<&TimeFilter>,
    ) -> Result<(Vec<NoteMatch>, Vec<AggregateItem>, Vec<RelatedEntity>)> {
        let key_type = detect_most_query(query)
            .map(|(_, key_type)| key_type)
            .unwrap_or(trace_domain::types::AggregateKeyType::App);

        let result = self
            .aggregates
            .top_by_key_type(key_type, time_filter, self.limits.max_aggregates)
            .await?;

        // A few supporting notes give the answer temporal color.
        let notes = self
            .searcher
            .search(query, time_filter, 3, 0.0)
            .await
            .map(|r| r.matches)
            .unwrap_or_default();

        Ok((notes, result.items, vec![]))
    }

    async fn entity_context(
        &self,
        query: &str,
        time_filter: Option<&TimeFilter>,
    ) -> Result<(Vec<NoteMatch>, Vec<AggregateItem>, Vec<RelatedEntity>)> {
        let entity_query = extract_entity_phrase(query).unwrap_or_else(|| query.to_string());

        let mut notes = self
            .searcher
            .search_by_entity(&entity_query, None, self.limits.max_context_notes)
            .await?;

        let expansion = self
            .graph
            .expand_from_names(
                &[entity_query.clone()],
                None,
                ExpandOptions { time_filter: time_filter.cloned(), ..ExpandOptions::default() },
            )
            .await?;

        // No direct links: fall back to semantic search over the phrase.
        if notes.is_empty() {
            notes = self
                .searcher
                .search(&entity_query, time_filter, self.limits.max_context_notes, 0.0)
                .await?
                .matches;
        }

        Ok((notes, vec![], expansion.related))
    }

    async fn timeline_context(
        &self,
        query: &str,
        time_filter: Option<&TimeFilter>,
    ) -> Result<(Vec<NoteMatch>, Vec<AggregateItem>, Vec<RelatedEntity>)> {
        let result = self
            .hierarchical
            .search(query, time_filter, self.limits.max_days, self.limits.max_hours_per_day)
            .await?;
        let mut notes = result.context_for_llm(self.limits.max_context_notes);

        // A timeline question with a filter but no semantic hits still
        // deserves the plain chronological notes.
        if notes.is_empty() {
            if let Some(filter) = time_filter {
                notes = self
                    .searcher
                    .notes_in_range(None, filter.start, filter.end)
                    .await?
                    .into_iter()
                    .take(self.limits.max_context_notes)
                    .collect();
            }
        }

        Ok((notes, vec![], vec![]))
    }

    async fn semantic_context(
        &self,
        query: &str,
        time_filter: Option<&TimeFilter>,
    ) -> Result<(Vec<NoteMatch>, Vec<AggregateItem>, Vec<RelatedEntity>)> {
        let result = self
            .searcher
            .search(query, time_filter, self.limits.max_context_notes, 0.0)
            .await?;
        Ok((result.matches, vec![], vec![]))
    }
}

/// Route detection, tried in priority order.
pub fn detect_query_type(query: &str) -> QueryType {
    let query = query.to_lowercase();

    if detect_most_query(&query).is_some() {
        return QueryType::Aggregates;
    }

    const ENTITY_MARKERS: &[&str] =
        &["about ", "related to ", "involving ", "what do i know about ", "tell me about "];
    if ENTITY_MARKERS.iter().any(|marker| query.contains(marker)) {
        return QueryType::Entity;
    }

    const TIMELINE_MARKERS: &[&str] = &[
        "what did i do",
        "what was i doing",
        "summary of",
        "overview of",
        "activities ",
        "timeline ",
    ];
    if TIMELINE_MARKERS.iter().any(|marker| query.contains(marker)) {
        return QueryType::Timeline;
    }

    QueryType::Semantic
}

/// Pull the entity phrase out of an "about X"-style query.
fn extract_entity_phrase(query: &str) -> Option<String> {
    let query = query.to_lowercase();
    const MARKERS: &[&str] =
        &["what do i know about ", "tell me about ", "related to ", "involving ", "about "];

    for marker in MARKERS {
        if let Some(index) = query.find(marker) {
            let phrase = query[index + marker.len()..]
                .trim()
                .trim_end_matches(['?', '.', '!'])
                .trim()
                .to_string();
            if !phrase.is_empty() {
                return Some(phrase);
            }
        }
    }

    None
}
