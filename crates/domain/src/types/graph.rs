//! Entity graph types: normalized entities, note links and typed edges.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TraceError};

/// Kinds of real-world references an entity can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Topic,
    App,
    Domain,
    Document,
    Artist,
    Track,
    Video,
    Game,
    Person,
    Project,
}

impl EntityKind {
    pub const ALL: &'static [EntityKind] = &[
        EntityKind::Topic,
        EntityKind::App,
        EntityKind::Domain,
        EntityKind::Document,
        EntityKind::Artist,
        EntityKind::Track,
        EntityKind::Video,
        EntityKind::Game,
        EntityKind::Person,
        EntityKind::Project,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Topic => "topic",
            EntityKind::App => "app",
            EntityKind::Domain => "domain",
            EntityKind::Document => "document",
            EntityKind::Artist => "artist",
            EntityKind::Track => "track",
            EntityKind::Video => "video",
            EntityKind::Game => "game",
            EntityKind::Person => "person",
            EntityKind::Project => "project",
        }
    }

    /// Strict parse of a canonical kind name.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == raw)
            .ok_or_else(|| TraceError::Validation(format!("unknown entity type: {raw}")))
    }

    /// Lenient parse mapping common LLM variations onto canonical kinds;
    /// anything unrecognized becomes [`EntityKind::Topic`].
    pub fn parse_lenient(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        if let Ok(kind) = Self::parse(&lowered) {
            return kind;
        }
        match lowered.as_str() {
            "song" | "music" => EntityKind::Track,
            "website" | "site" | "url" => EntityKind::Domain,
            "file" | "pdf" | "doc" => EntityKind::Document,
            "application" | "program" => EntityKind::App,
            _ => EntityKind::Topic,
        }
    }
}

/// A normalized real-world reference, unique on `(entity_type, canonical_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub entity_type: EntityKind,
    pub canonical_name: String,
    /// Distinct surface forms observed for this entity.
    pub aliases: Vec<String>,
    pub created_ts: NaiveDateTime,
    pub updated_ts: NaiveDateTime,
}

/// Many-to-many link between a note and an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteEntity {
    pub note_id: String,
    pub entity_id: String,
    /// Link strength in `[0,1]`; upserts keep the maximum.
    pub strength: f64,
    pub context: Option<String>,
}

/// Typed relationship kinds between entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    AboutTopic,
    CoOccurredWith,
    StudiedWhile,
    UsedApp,
    VisitedDomain,
    DocReference,
    ListenedTo,
    Watched,
}

impl EdgeKind {
    pub const ALL: &'static [EdgeKind] = &[
        EdgeKind::AboutTopic,
        EdgeKind::CoOccurredWith,
        EdgeKind::StudiedWhile,
        EdgeKind::UsedApp,
        EdgeKind::VisitedDomain,
        EdgeKind::DocReference,
        EdgeKind::ListenedTo,
        EdgeKind::Watched,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::AboutTopic => "ABOUT_TOPIC",
            EdgeKind::CoOccurredWith => "CO_OCCURRED_WITH",
            EdgeKind::StudiedWhile => "STUDIED_WHILE",
            EdgeKind::UsedApp => "USED_APP",
            EdgeKind::VisitedDomain => "VISITED_DOMAIN",
            EdgeKind::DocReference => "DOC_REFERENCE",
            EdgeKind::ListenedTo => "LISTENED_TO",
            EdgeKind::Watched => "WATCHED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == raw)
            .ok_or_else(|| TraceError::Validation(format!("unknown edge type: {raw}")))
    }

    /// Base relevance weight of this relationship kind for graph expansion.
    pub fn base_weight(&self) -> f64 {
        match self {
            EdgeKind::AboutTopic => 1.0,
            EdgeKind::CoOccurredWith => 0.9,
            EdgeKind::StudiedWhile => 0.85,
            EdgeKind::UsedApp => 0.8,
            EdgeKind::VisitedDomain => 0.75,
            EdgeKind::DocReference => 0.7,
            EdgeKind::ListenedTo => 0.6,
            EdgeKind::Watched => 0.6,
        }
    }
}

/// Typed, weighted relationship between two entities, optionally
/// time-bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from_id: String,
    pub to_id: String,
    pub edge_type: EdgeKind,
    /// Weight in `[0,1]`.
    pub weight: f64,
    pub start_ts: Option<NaiveDateTime>,
    pub end_ts: Option<NaiveDateTime>,
    /// Notes supporting this relationship.
    pub evidence_note_ids: Vec<String>,
}
