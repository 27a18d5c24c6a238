//! Entity extraction, canonical upsert and graph write-through.
//!
//! Every summary section contributes entities: declared entities, topics,
//! media (artists, "artist - track" tracks, watched videos), documents and
//! websites. Names normalize to a canonical form; distinct surface forms
//! accumulate as aliases. After the note's links are written, typed edges
//! anchor the hour's topics to its apps/domains/documents/media and
//! co-occurrence edges connect the strongest entities pairwise.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use trace_domain::canonical_name;
use trace_domain::types::{
    Edge, EdgeKind, Entity, EntityKind, HourlySummary, NoteEntity, SummaryEntity,
};
use trace_domain::Result;
use uuid::Uuid;

use crate::storage::{EdgeStore, EntityStore};

/// Cap on entities participating in pairwise co-occurrence edges.
const MAX_CO_OCCURRENCE_ENTITIES: usize = 10;

/// Cap on topics anchoring typed edges.
const MAX_ANCHOR_TOPICS: usize = 5;

/// Extracts and persists entities and edges for a summarized note.
pub struct EntityExtractor {
    entities: Arc<dyn EntityStore>,
    edges: Arc<dyn EdgeStore>,
}

/// A stored link along with the entity's resolved kind, used for edge
/// rollup without re-reading rows.
#[derive(Debug, Clone)]
pub struct ExtractedLink {
    pub entity_id: String,
    pub entity_type: EntityKind,
    pub strength: f64,
}

impl EntityExtractor {
    pub fn new(entities: Arc<dyn EntityStore>, edges: Arc<dyn EdgeStore>) -> Self {
        Self { entities, edges }
    }

    /// Extract all entities from a summary, upsert them and their note
    /// links, then roll up edges. Returns the created links.
    pub async fn extract_and_store(
        &self,
        summary: &HourlySummary,
        note_id: &str,
        hour_start: NaiveDateTime,
        hour_end: NaiveDateTime,
    ) -> Result<Vec<ExtractedLink>> {
        let collected = collect_entities(summary);
        let mut links: Vec<ExtractedLink> = Vec::new();

        for (item, context) in collected {
            let kind = EntityKind::parse_lenient(&item.r#type);
            let entity_id = self.find_or_create(kind, &item.name).await?;

            let link = NoteEntity {
                note_id: note_id.to_string(),
                entity_id: entity_id.clone(),
                strength: item.confidence.clamp(0.0, 1.0),
                context,
            };
            self.entities.upsert_note_entity(&link).await?;

            // One logical entity may surface from several sections; keep the
            // strongest link for edge rollup.
            match links.iter_mut().find(|l| l.entity_id == entity_id) {
                Some(existing) => existing.strength = existing.strength.max(link.strength),
                None => links.push(ExtractedLink {
                    entity_id,
                    entity_type: kind,
                    strength: link.strength,
                }),
            }
        }

        self.roll_up_edges(summary, note_id, &links, hour_start, hour_end).await?;

        Ok(links)
    }

    /// Find-or-create by `(type, canonical_name)`; new surface forms append
    /// to the alias list.
    async fn find_or_create(&self, kind: EntityKind, surface: &str) -> Result<String> {
        let canonical = canonical_name(surface);

        if let Some(existing) = self.entities.find_by_canonical(kind, &canonical).await? {
            if surface != existing.canonical_name && !existing.aliases.iter().any(|a| a == surface)
            {
                self.entities.add_alias(&existing.entity_id, surface).await?;
            }
            return Ok(existing.entity_id);
        }

        let now = Local::now().naive_local();
        let aliases = if surface != canonical { vec![surface.to_string()] } else { vec![] };
        let entity = Entity {
            entity_id: Uuid::new_v4().to_string(),
            entity_type: kind,
            canonical_name: canonical,
            aliases,
            created_ts: now,
            updated_ts: now,
        };
        self.entities.insert_entity(&entity).await?;
        Ok(entity.entity_id)
    }

    /// Edge rollup at hourly completion: typed edges anchored on the hour's
    /// topics, plus pairwise co-occurrence among the strongest entities.
    async fn roll_up_edges(
        &self,
        summary: &HourlySummary,
        note_id: &str,
        links: &[ExtractedLink],
        hour_start: NaiveDateTime,
        hour_end: NaiveDateTime,
    ) -> Result<()> {
        let learning_hour = summary.categories.iter().any(|c| c == "learning");

        let mut topics: Vec<&ExtractedLink> =
            links.iter().filter(|l| l.entity_type == EntityKind::Topic).collect();
        topics.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
        topics.truncate(MAX_ANCHOR_TOPICS);

        for topic in &topics {
            for link in links {
                if link.entity_id == topic.entity_id {
                    continue;
                }
                let edge_type = match link.entity_type {
                    EntityKind::App => EdgeKind::UsedApp,
                    EntityKind::Domain => EdgeKind::VisitedDomain,
                    EntityKind::Document => EdgeKind::DocReference,
                    EntityKind::Track | EntityKind::Artist => {
                        if learning_hour {
                            EdgeKind::StudiedWhile
                        } else {
                            EdgeKind::ListenedTo
                        }
                    }
                    EntityKind::Video => EdgeKind::Watched,
                    // Remaining kinds relate back to the topic itself.
                    _ => EdgeKind::AboutTopic,
                };

                self.upsert(
                    &topic.entity_id,
                    &link.entity_id,
                    edge_type,
                    topic.strength * link.strength,
                    note_id,
                    hour_start,
                    hour_end,
                )
                .await?;
            }
        }

        // Pairwise co-occurrence among the strongest entities.
        let mut strongest: Vec<&ExtractedLink> = links.iter().collect();
        strongest.sort_by(|a, b| {
            b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal)
        });
        strongest.truncate(MAX_CO_OCCURRENCE_ENTITIES);

        for (index, a) in strongest.iter().enumerate() {
            for b in strongest.iter().skip(index + 1) {
                self.upsert(
                    &a.entity_id,
                    &b.entity_id,
                    EdgeKind::CoOccurredWith,
                    a.strength * b.strength,
                    note_id,
                    hour_start,
                    hour_end,
                )
                .await?;
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn upsert(
        &self,
        from_id: &str,
        to_id: &str,
        edge_type: EdgeKind,
        weight: f64,
        note_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<()> {
        self.edges
            .upsert_edge(&Edge {
                from_id: from_id.to_string(),
                to_id: to_id.to_string(),
                edge_type,
                weight: weight.clamp(0.0, 1.0),
                start_ts: Some(start),
                end_ts: Some(end),
                evidence_note_ids: vec![note_id.to_string()],
            })
            .await
    }
}

/// Collect entities with optional context from all payload sections.
fn collect_entities(summary: &HourlySummary) -> Vec<(SummaryEntity, Option<String>)> {
    let mut out: Vec<(SummaryEntity, Option<String>)> = Vec::new();

    for entity in &summary.entities {
        out.push((entity.clone(), None));
    }

    for topic in &summary.topics {
        out.push((
            SummaryEntity {
                name: topic.name.clone(),
                r#type: "topic".to_string(),
                confidence: topic.confidence,
            },
            topic.context.clone(),
        ));
    }

    for listening in &summary.media.listening {
        out.push((
            SummaryEntity {
                name: listening.artist.clone(),
                r#type: "artist".to_string(),
                confidence: 0.9,
            },
            Some(format!("Listening to {}", listening.track)),
        ));
        out.push((
            SummaryEntity {
                name: format!("{} - {}", listening.artist, listening.track),
                r#type: "track".to_string(),
                confidence: 0.9,
            },
            None,
        ));
    }

    for watching in &summary.media.watching {
        out.push((
            SummaryEntity {
                name: watching.title.clone(),
                r#type: "video".to_string(),
                confidence: 0.85,
            },
            watching.source.as_ref().map(|s| format!("on {s}")),
        ));
    }

    for doc in &summary.documents {
        out.push((
            SummaryEntity {
                name: doc.name.clone(),
                r#type: "document".to_string(),
                confidence: 0.9,
            },
            doc.key_content.clone(),
        ));
    }

    for site in &summary.websites {
        out.push((
            SummaryEntity {
                name: site.domain.clone(),
                r#type: "domain".to_string(),
                confidence: 0.9,
            },
            site.purpose.clone(),
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use trace_domain::types::{ListeningItem, MediaSection, TopicItem, WebsiteItem};

    use super::*;
    use crate::testing::MemoryGraph;
    use crate::summarize::schema::empty_summary;

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    fn summary_with_media() -> HourlySummary {
        let mut summary = empty_summary(
            ts("2025-01-15T14:00:00"),
            ts("2025-01-15T15:00:00"),
            "No activity detected",
        );
        summary.entities = vec![SummaryEntity {
            name: "Safari".into(),
            r#type: "application".into(),
            confidence: 0.9,
        }];
        summary.topics =
            vec![TopicItem { name: "Rust".into(), context: Some("learning".into()), confidence: 0.8 }];
        summary.media = MediaSection {
            listening: vec![ListeningItem {
                artist: "X".into(),
                track: "Y".into(),
                duration_seconds: Some(600),
            }],
            watching: vec![],
        };
        summary.websites =
            vec![WebsiteItem { domain: "docs.rs".into(), page_title: None, purpose: None }];
        summary
    }

    #[tokio::test]
    async fn extracts_entities_from_every_section() {
        let graph = Arc::new(MemoryGraph::default());
        let extractor = EntityExtractor::new(graph.clone(), graph.clone());

        let links = extractor
            .extract_and_store(
                &summary_with_media(),
                "note-1",
                ts("2025-01-15T14:00:00"),
                ts("2025-01-15T15:00:00"),
            )
            .await
            .unwrap();

        let entities = graph.entities.lock().unwrap();
        let names: Vec<&str> = entities.iter().map(|e| e.canonical_name.as_str()).collect();

        // Lenient repair of "application" happened upstream of storage.
        assert!(names.contains(&"safari"));
        assert!(names.contains(&"rust"));
        assert!(names.contains(&"x"));
        assert!(names.contains(&"x - y"));
        assert!(names.contains(&"docs.rs"));
        assert_eq!(links.len(), entities.len());
    }

    #[tokio::test]
    async fn same_canonical_name_resolves_to_one_entity_with_aliases() {
        let graph = Arc::new(MemoryGraph::default());
        let extractor = EntityExtractor::new(graph.clone(), graph.clone());

        let mut first = empty_summary(
            ts("2025-01-15T14:00:00"),
            ts("2025-01-15T15:00:00"),
            "No activity detected",
        );
        first.entities =
            vec![SummaryEntity { name: "Safari".into(), r#type: "app".into(), confidence: 0.9 }];

        let mut second = first.clone();
        second.entities =
            vec![SummaryEntity { name: "SAFARI".into(), r#type: "app".into(), confidence: 0.7 }];

        extractor
            .extract_and_store(&first, "n1", ts("2025-01-15T14:00:00"), ts("2025-01-15T15:00:00"))
            .await
            .unwrap();
        extractor
            .extract_and_store(&second, "n2", ts("2025-01-15T15:00:00"), ts("2025-01-15T16:00:00"))
            .await
            .unwrap();

        let entities = graph.entities.lock().unwrap();
        let safari: Vec<&Entity> =
            entities.iter().filter(|e| e.canonical_name == "safari").collect();
        assert_eq!(safari.len(), 1);
        assert!(safari[0].aliases.contains(&"Safari".to_string()));
        assert!(safari[0].aliases.contains(&"SAFARI".to_string()));
    }

    #[tokio::test]
    async fn note_entity_upsert_keeps_max_strength() {
        let graph = Arc::new(MemoryGraph::default());
        let extractor = EntityExtractor::new(graph.clone(), graph.clone());

        let mut strong = empty_summary(
            ts("2025-01-15T14:00:00"),
            ts("2025-01-15T15:00:00"),
            "No activity detected",
        );
        strong.entities =
            vec![SummaryEntity { name: "Rust".into(), r#type: "topic".into(), confidence: 0.9 }];
        let mut weak = strong.clone();
        weak.entities[0].confidence = 0.3;

        extractor
            .extract_and_store(&strong, "n1", ts("2025-01-15T14:00:00"), ts("2025-01-15T15:00:00"))
            .await
            .unwrap();
        extractor
            .extract_and_store(&weak, "n1", ts("2025-01-15T14:00:00"), ts("2025-01-15T15:00:00"))
            .await
            .unwrap();

        let links = graph.links.lock().unwrap();
        let rust_links: Vec<&NoteEntity> = links.iter().filter(|l| l.note_id == "n1").collect();
        assert!(rust_links.iter().all(|l| l.strength >= 0.9 - 1e-9));
    }

    #[tokio::test]
    async fn rollup_writes_typed_and_co_occurrence_edges() {
        let graph = Arc::new(MemoryGraph::default());
        let extractor = EntityExtractor::new(graph.clone(), graph.clone());

        extractor
            .extract_and_store(
                &summary_with_media(),
                "note-1",
                ts("2025-01-15T14:00:00"),
                ts("2025-01-15T15:00:00"),
            )
            .await
            .unwrap();

        let edges = graph.edges.lock().unwrap();
        let kinds: Vec<EdgeKind> = edges.iter().map(|e| e.edge_type).collect();

        assert!(kinds.contains(&EdgeKind::UsedApp));
        assert!(kinds.contains(&EdgeKind::VisitedDomain));
        assert!(kinds.contains(&EdgeKind::ListenedTo));
        assert!(kinds.contains(&EdgeKind::CoOccurredWith));
        assert!(edges.iter().all(|e| (0.0..=1.0).contains(&e.weight)));
        assert!(edges.iter().all(|e| e.evidence_note_ids.contains(&"note-1".to_string())));
    }
}
