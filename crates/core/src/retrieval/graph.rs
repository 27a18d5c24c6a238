//! Graph expansion over typed entity edges.
//!
//! Breadth-first expansion from a seed set. Each discovered entity's
//! reported weight is `edge.weight * base_weight(edge_type) / (hop + 1)`, so
//! deeper hops are always strictly weaker than the same edge at hop zero.

use std::sync::Arc;

use trace_domain::canonical_name;
use trace_domain::types::{EdgeKind, Entity, EntityKind};
use trace_domain::Result;

use crate::storage::{EdgeStore, EntityStore, NoteStore};

use super::search::NoteMatch;
use super::time::TimeFilter;

/// An entity discovered through expansion.
#[derive(Debug, Clone)]
pub struct RelatedEntity {
    pub entity_id: String,
    pub entity_type: EntityKind,
    pub canonical_name: String,
    pub edge_type: EdgeKind,
    /// Decayed relevance weight.
    pub weight: f64,
    pub source_entity_id: String,
    pub source_entity_name: String,
    /// "to" when the edge points away from the source, "from" otherwise.
    pub direction: &'static str,
}

/// Result of a graph expansion.
#[derive(Debug, Clone)]
pub struct GraphExpansion {
    pub source_entities: Vec<String>,
    pub related: Vec<RelatedEntity>,
    pub notes: Vec<NoteMatch>,
    pub hops: u32,
}

/// Expansion parameters.
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    pub hops: u32,
    pub min_weight: f64,
    pub edge_types: Option<Vec<EdgeKind>>,
    pub time_filter: Option<TimeFilter>,
    pub max_related: usize,
    pub max_notes: usize,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            hops: 1,
            min_weight: 0.3,
            edge_types: None,
            time_filter: None,
            max_related: 20,
            max_notes: 20,
        }
    }
}

/// BFS expander over the edge store.
pub struct GraphExpander {
    entities: Arc<dyn EntityStore>,
    edges: Arc<dyn EdgeStore>,
    notes: Arc<dyn NoteStore>,
}

impl GraphExpander {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        edges: Arc<dyn EdgeStore>,
        notes: Arc<dyn NoteStore>,
    ) -> Self {
        Self { entities, edges, notes }
    }

    /// Expand from entity names (canonical or alias).
    pub async fn expand_from_names(
        &self,
        names: &[String],
        entity_type: Option<EntityKind>,
        options: ExpandOptions,
    ) -> Result<GraphExpansion> {
        let mut seed_ids = Vec::new();
        for name in names {
            let normalized = canonical_name(name);
            seed_ids.extend(self.entities.find_ids_matching(&normalized, entity_type).await?);
        }
        seed_ids.dedup();
        self.expand_from_ids(&seed_ids, options).await
    }

    /// Expand from seed entity ids.
    pub async fn expand_from_ids(
        &self,
        seed_ids: &[String],
        options: ExpandOptions,
    ) -> Result<GraphExpansion> {
        let mut visited: Vec<String> = seed_ids.to_vec();
        let mut frontier: Vec<String> = seed_ids.to_vec();
        let mut related: Vec<RelatedEntity> = Vec::new();

        let window = options.time_filter.as_ref().map(TimeFilter::window);
        let source_names = self.name_lookup(seed_ids).await?;

        for hop in 0..options.hops {
            let mut next_frontier = Vec::new();

            for entity_id in &frontier {
                let source_name = source_names
                    .iter()
                    .find(|(id, _)| id == entity_id)
                    .map(|(_, name)| name.clone())
                    .unwrap_or_else(|| entity_id.clone());

                let edges = self
                    .edges
                    .edges_for_entity(
                        entity_id,
                        options.min_weight,
                        options.edge_types.as_deref(),
                        window,
                    )
                    .await?;

                for edge in edges {
                    let (neighbour_id, direction) = if edge.from_id == *entity_id {
                        (edge.to_id.clone(), "to")
                    } else {
                        (edge.from_id.clone(), "from")
                    };

                    if visited.contains(&neighbour_id) {
                        continue;
                    }
                    visited.push(neighbour_id.clone());
                    next_frontier.push(neighbour_id.clone());

                    let info = self.entities.entities_by_ids(&[neighbour_id.clone()]).await?;
                    let Some(info) = info.first() else {
                        continue;
                    };

                    let hop_decay = 1.0 / f64::from(hop + 1);
                    related.push(RelatedEntity {
                        entity_id: neighbour_id,
                        entity_type: info.entity_type,
                        canonical_name: info.canonical_name.clone(),
                        edge_type: edge.edge_type,
                        weight: edge.weight * edge.edge_type.base_weight() * hop_decay,
                        source_entity_id: entity_id.clone(),
                        source_entity_name: source_name.clone(),
                        direction,
                    });
                }
            }

            frontier = next_frontier;
        }

        related.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
        related.truncate(options.max_related);

        let notes = self.notes_for_related(&related, options.max_notes).await?;

        Ok(GraphExpansion {
            source_entities: seed_ids.to_vec(),
            related,
            notes,
            hops: options.hops,
        })
    }

    /// Full context for one entity: the entity row, its strongest related
    /// entities and the notes mentioning it.
    pub async fn entity_context(
        &self,
        name: &str,
        entity_type: Option<EntityKind>,
    ) -> Result<Option<(Entity, GraphExpansion)>> {
        let normalized = canonical_name(name);
        let ids = self.entities.find_ids_matching(&normalized, entity_type).await?;
        let Some(entity) = self.entities.entities_by_ids(&ids).await?.into_iter().next() else {
            return Ok(None);
        };

        let expansion = self
            .expand_from_ids(&[entity.entity_id.clone()], ExpandOptions::default())
            .await?;
        Ok(Some((entity, expansion)))
    }

    async fn name_lookup(&self, ids: &[String]) -> Result<Vec<(String, String)>> {
        Ok(self
            .entities
            .entities_by_ids(ids)
            .await?
            .into_iter()
            .map(|e| (e.entity_id, e.canonical_name))
            .collect())
    }

    async fn notes_for_related(
        &self,
        related: &[RelatedEntity],
        limit: usize,
    ) -> Result<Vec<NoteMatch>> {
        if related.is_empty() {
            return Ok(vec![]);
        }

        let entity_ids: Vec<String> = related.iter().map(|r| r.entity_id.clone()).collect();
        let links = self.entities.note_links_for_entities(&entity_ids, limit).await?;
        let note_ids: Vec<String> = links.iter().map(|l| l.note_id.clone()).collect();
        let notes = self.notes.notes_by_ids(&note_ids).await?;

        let mut matches = Vec::new();
        for link in &links {
            if matches.iter().any(|m: &NoteMatch| m.note_id == link.note_id) {
                continue;
            }
            if let Some(note) = notes.iter().find(|n| n.note_id == link.note_id) {
                matches.push(NoteMatch::from_note(note, link.strength));
            }
            if matches.len() >= limit {
                break;
            }
        }

        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;
    use trace_domain::types::Edge;
    use uuid::Uuid;

    use super::*;
    use crate::storage::EntityStore as _;
    use crate::testing::{MemoryGraph, MemoryNotes};

    async fn seed_entity(graph: &MemoryGraph, name: &str, kind: EntityKind) -> String {
        let now = Local::now().naive_local();
        let entity = Entity {
            entity_id: Uuid::new_v4().to_string(),
            entity_type: kind,
            canonical_name: name.to_string(),
            aliases: vec![],
            created_ts: now,
            updated_ts: now,
        };
        graph.insert_entity(&entity).await.unwrap();
        entity.entity_id
    }

    async fn seed_edge(graph: &MemoryGraph, from: &str, to: &str, kind: EdgeKind, weight: f64) {
        use crate::storage::EdgeStore as _;
        graph
            .upsert_edge(&Edge {
                from_id: from.to_string(),
                to_id: to.to_string(),
                edge_type: kind,
                weight,
                start_ts: None,
                end_ts: None,
                evidence_note_ids: vec![],
            })
            .await
            .unwrap();
    }

    fn expander(graph: Arc<MemoryGraph>) -> GraphExpander {
        GraphExpander::new(graph.clone(), graph, Arc::new(MemoryNotes::default()))
    }

    #[tokio::test]
    async fn one_hop_expansion_weights_by_edge_type() {
        let graph = Arc::new(MemoryGraph::default());
        let rust = seed_entity(&graph, "rust", EntityKind::Topic).await;
        let vscode = seed_entity(&graph, "vs code", EntityKind::App).await;
        let spotify_track = seed_entity(&graph, "x - y", EntityKind::Track).await;

        seed_edge(&graph, &rust, &vscode, EdgeKind::UsedApp, 0.8).await;
        seed_edge(&graph, &rust, &spotify_track, EdgeKind::ListenedTo, 0.8).await;

        let expansion = expander(graph)
            .expand_from_ids(&[rust.clone()], ExpandOptions::default())
            .await
            .unwrap();

        assert_eq!(expansion.related.len(), 2);
        // USED_APP (0.8 base) outranks LISTENED_TO (0.6 base) at equal edge
        // weight.
        assert_eq!(expansion.related[0].canonical_name, "vs code");
        assert!((expansion.related[0].weight - 0.8 * 0.8).abs() < 1e-9);
        assert!((expansion.related[1].weight - 0.8 * 0.6).abs() < 1e-9);
        assert_eq!(expansion.related[0].direction, "to");
    }

    #[tokio::test]
    async fn hop_decay_strictly_reduces_weight() {
        let graph = Arc::new(MemoryGraph::default());
        let a = seed_entity(&graph, "a", EntityKind::Topic).await;
        let b = seed_entity(&graph, "b", EntityKind::Topic).await;
        let c = seed_entity(&graph, "c", EntityKind::Topic).await;

        seed_edge(&graph, &a, &b, EdgeKind::AboutTopic, 1.0).await;
        seed_edge(&graph, &b, &c, EdgeKind::AboutTopic, 1.0).await;

        let expansion = expander(graph)
            .expand_from_ids(
                &[a.clone()],
                ExpandOptions { hops: 2, ..ExpandOptions::default() },
            )
            .await
            .unwrap();

        let b_weight = expansion.related.iter().find(|r| r.canonical_name == "b").unwrap().weight;
        let c_weight = expansion.related.iter().find(|r| r.canonical_name == "c").unwrap().weight;

        // c sits at hop 1 (decay 1/2) with an identical edge; strictly less
        // than the same edge at hop 0.
        assert!(c_weight < b_weight);
        assert!((c_weight - b_weight / 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn min_weight_and_type_filters_apply() {
        let graph = Arc::new(MemoryGraph::default());
        let a = seed_entity(&graph, "a", EntityKind::Topic).await;
        let strong = seed_entity(&graph, "strong", EntityKind::App).await;
        let weak = seed_entity(&graph, "weak", EntityKind::App).await;
        let media = seed_entity(&graph, "media", EntityKind::Track).await;

        seed_edge(&graph, &a, &strong, EdgeKind::UsedApp, 0.9).await;
        seed_edge(&graph, &a, &weak, EdgeKind::UsedApp, 0.1).await;
        seed_edge(&graph, &a, &media, EdgeKind::ListenedTo, 0.9).await;

        let expansion = expander(graph)
            .expand_from_ids(
                &[a],
                ExpandOptions {
                    min_weight: 0.5,
                    edge_types: Some(vec![EdgeKind::UsedApp]),
                    ..ExpandOptions::default()
                },
            )
            .await
            .unwrap();

        let names: Vec<&str> =
            expansion.related.iter().map(|r| r.canonical_name.as_str()).collect();
        assert_eq!(names, vec!["strong"]);
    }

    #[tokio::test]
    async fn expansion_from_alias_names() {
        let graph = Arc::new(MemoryGraph::default());
        let rust = seed_entity(&graph, "rust", EntityKind::Topic).await;
        graph.add_alias(&rust, "Rust Lang").await.unwrap();
        let vscode = seed_entity(&graph, "vs code", EntityKind::App).await;
        seed_edge(&graph, &rust, &vscode, EdgeKind::UsedApp, 0.8).await;

        let expansion = expander(graph)
            .expand_from_names(
                &["Rust Lang".to_string()],
                None,
                ExpandOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(expansion.related.len(), 1);
        assert_eq!(expansion.related[0].canonical_name, "vs code");
    }
}
