//! Async entity and note-entity persistence.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Row};
use tokio::task;
use trace_core::storage::EntityStore;
use trace_domain::types::{Entity, EntityKind, NoteEntity};
use trace_domain::utils::time::{format_ts, parse_ts};
use trace_domain::{Result, TraceError};

use super::manager::{map_sql, DbManager};

/// Entity rows, aliases and note links.
pub struct SqliteEntityRepository {
    db: Arc<DbManager>,
}

impl SqliteEntityRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let kind_raw: String = row.get("entity_type")?;
    let aliases_raw: String = row.get("aliases")?;
    let created_raw: String = row.get("created_ts")?;
    let updated_raw: String = row.get("updated_ts")?;

    Ok(Entity {
        entity_id: row.get("entity_id")?,
        entity_type: EntityKind::parse(&kind_raw).unwrap_or(EntityKind::Topic),
        canonical_name: row.get("canonical_name")?,
        aliases: serde_json::from_str(&aliases_raw).unwrap_or_default(),
        created_ts: parse_ts(&created_raw).unwrap_or_default(),
        updated_ts: parse_ts(&updated_raw).unwrap_or_default(),
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<NoteEntity> {
    Ok(NoteEntity {
        note_id: row.get("note_id")?,
        entity_id: row.get("entity_id")?,
        strength: row.get("strength")?,
        context: row.get("context")?,
    })
}

const ENTITY_COLUMNS: &str =
    "entity_id, entity_type, canonical_name, aliases, created_ts, updated_ts";

#[async_trait]
impl EntityStore for SqliteEntityRepository {
    async fn find_by_canonical(
        &self,
        entity_type: EntityKind,
        canonical_name: &str,
    ) -> Result<Option<Entity>> {
        let db = Arc::clone(&self.db);
        let canonical = canonical_name.to_string();
        task::spawn_blocking(move || -> Result<Option<Entity>> {
            let conn = db.get_connection()?;
            conn.query_row(
                &format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities
                     WHERE entity_type = ?1 AND canonical_name = ?2"
                ),
                params![entity_type.as_str(), canonical],
                entity_from_row,
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(map_sql(other)),
            })
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn insert_entity(&self, entity: &Entity) -> Result<()> {
        let db = Arc::clone(&self.db);
        let entity = entity.clone();
        task::spawn_blocking(move || -> Result<()> {
            let aliases = serde_json::to_string(&entity.aliases)
                .unwrap_or_else(|_| "[]".to_string());
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT INTO entities
                 (entity_id, entity_type, canonical_name, aliases, created_ts, updated_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entity.entity_id,
                    entity.entity_type.as_str(),
                    entity.canonical_name,
                    aliases,
                    format_ts(entity.created_ts),
                    format_ts(entity.updated_ts),
                ],
            )
            .map_err(map_sql)?;
            Ok(())
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn add_alias(&self, entity_id: &str, alias: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let entity_id = entity_id.to_string();
        let alias = alias.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let raw: String = conn
                .query_row(
                    "SELECT aliases FROM entities WHERE entity_id = ?1",
                    params![entity_id],
                    |row| row.get(0),
                )
                .map_err(map_sql)?;

            let mut aliases: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
            if !aliases.iter().any(|a| a == &alias) {
                aliases.push(alias);
                conn.execute(
                    "UPDATE entities
                     SET aliases = ?1, updated_ts = datetime('now', 'localtime')
                     WHERE entity_id = ?2",
                    params![serde_json::to_string(&aliases).unwrap_or_default(), entity_id],
                )
                .map_err(map_sql)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn upsert_note_entity(&self, link: &NoteEntity) -> Result<()> {
        let db = Arc::clone(&self.db);
        let link = link.clone();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT INTO note_entities (note_id, entity_id, strength, context)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(note_id, entity_id) DO UPDATE SET
                     strength = MAX(strength, excluded.strength),
                     context = COALESCE(note_entities.context, excluded.context)",
                params![link.note_id, link.entity_id, link.strength, link.context],
            )
            .map_err(map_sql)?;
            Ok(())
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn get_note_entity(
        &self,
        note_id: &str,
        entity_id: &str,
    ) -> Result<Option<NoteEntity>> {
        let db = Arc::clone(&self.db);
        let note_id = note_id.to_string();
        let entity_id = entity_id.to_string();
        task::spawn_blocking(move || -> Result<Option<NoteEntity>> {
            let conn = db.get_connection()?;
            conn.query_row(
                "SELECT note_id, entity_id, strength, context FROM note_entities
                 WHERE note_id = ?1 AND entity_id = ?2",
                params![note_id, entity_id],
                link_from_row,
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(map_sql(other)),
            })
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn entities_by_ids(&self, entity_ids: &[String]) -> Result<Vec<Entity>> {
        if entity_ids.is_empty() {
            return Ok(vec![]);
        }

        let db = Arc::clone(&self.db);
        let ids = entity_ids.to_vec();
        task::spawn_blocking(move || -> Result<Vec<Entity>> {
            let conn = db.get_connection()?;
            let placeholders = vec!["?"; ids.len()].join(",");
            let mut statement = conn
                .prepare(&format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities WHERE entity_id IN ({placeholders})"
                ))
                .map_err(map_sql)?;

            let entities = statement
                .query_map(rusqlite::params_from_iter(ids.iter()), entity_from_row)
                .map_err(map_sql)?
                .filter_map(std::result::Result::ok)
                .collect();
            Ok(entities)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn find_ids_matching(
        &self,
        normalized_query: &str,
        entity_type: Option<EntityKind>,
    ) -> Result<Vec<String>> {
        let db = Arc::clone(&self.db);
        let query = normalized_query.to_string();
        task::spawn_blocking(move || -> Result<Vec<String>> {
            let conn = db.get_connection()?;

            // Canonical match plus a LIKE over the alias JSON, re-verified
            // by normalizing each alias.
            let like = format!("%{}%", query.replace('%', ""));
            let mut statement = conn
                .prepare(&format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities
                     WHERE canonical_name = ?1 OR aliases LIKE ?2"
                ))
                .map_err(map_sql)?;

            let ids = statement
                .query_map(params![query, like], entity_from_row)
                .map_err(map_sql)?
                .filter_map(std::result::Result::ok)
                .filter(|e| entity_type.map_or(true, |t| t == e.entity_type))
                .filter(|e| {
                    e.canonical_name == query
                        || e.aliases
                            .iter()
                            .any(|a| trace_domain::canonical_name(a) == query)
                })
                .map(|e| e.entity_id)
                .collect();
            Ok(ids)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn note_links_for_entities(
        &self,
        entity_ids: &[String],
        limit: usize,
    ) -> Result<Vec<NoteEntity>> {
        if entity_ids.is_empty() {
            return Ok(vec![]);
        }

        let db = Arc::clone(&self.db);
        let ids = entity_ids.to_vec();
        task::spawn_blocking(move || -> Result<Vec<NoteEntity>> {
            let conn = db.get_connection()?;
            let placeholders = vec!["?"; ids.len()].join(",");
            let mut statement = conn
                .prepare(&format!(
                    "SELECT note_id, entity_id, strength, context FROM note_entities
                     WHERE entity_id IN ({placeholders})
                     ORDER BY strength DESC
                     LIMIT {limit}"
                ))
                .map_err(map_sql)?;

            let links = statement
                .query_map(rusqlite::params_from_iter(ids.iter()), link_from_row)
                .map_err(map_sql)?
                .filter_map(std::result::Result::ok)
                .collect();
            Ok(links)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }

    async fn links_for_note(&self, note_id: &str) -> Result<Vec<NoteEntity>> {
        let db = Arc::clone(&self.db);
        let note_id = note_id.to_string();
        task::spawn_blocking(move || -> Result<Vec<NoteEntity>> {
            let conn = db.get_connection()?;
            let mut statement = conn
                .prepare(
                    "SELECT note_id, entity_id, strength, context FROM note_entities
                     WHERE note_id = ?1
                     ORDER BY strength DESC",
                )
                .map_err(map_sql)?;

            let links = statement
                .query_map(params![note_id], link_from_row)
                .map_err(map_sql)?
                .filter_map(std::result::Result::ok)
                .collect();
            Ok(links)
        })
        .await
        .map_err(|e| TraceError::Fatal(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;
    use trace_core::storage::NoteStore;
    use trace_domain::types::{Note, NoteType};

    use super::super::note_repository::SqliteNoteRepository;
    use super::*;

    fn entity(name: &str, kind: EntityKind) -> Entity {
        let now = Local::now().naive_local();
        Entity {
            entity_id: uuid::Uuid::new_v4().to_string(),
            entity_type: kind,
            canonical_name: name.to_string(),
            aliases: vec![],
            created_ts: now,
            updated_ts: now,
        }
    }

    async fn fixture() -> (SqliteEntityRepository, SqliteNoteRepository, Arc<DbManager>) {
        let db = Arc::new(DbManager::in_memory().unwrap());
        db.run_migrations().unwrap();
        (
            SqliteEntityRepository::new(Arc::clone(&db)),
            SqliteNoteRepository::new(Arc::clone(&db)),
            db,
        )
    }

    async fn seed_note(notes: &SqliteNoteRepository, id: &str) {
        let start = "2025-01-15T14:00:00".parse().unwrap();
        notes
            .insert_note(&Note {
                note_id: id.to_string(),
                note_type: NoteType::Hour,
                start_ts: start,
                end_ts: start,
                file_path: "notes/x.md".into(),
                json_payload: "{}".into(),
                created_ts: start,
                updated_ts: start,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn canonical_uniqueness_is_enforced() {
        let (repo, _, _) = fixture().await;
        let first = entity("safari", EntityKind::App);
        repo.insert_entity(&first).await.unwrap();

        let duplicate = entity("safari", EntityKind::App);
        assert!(repo.insert_entity(&duplicate).await.is_err());

        // Same name with a different type is a distinct entity.
        let topic = entity("safari", EntityKind::Topic);
        repo.insert_entity(&topic).await.unwrap();
    }

    #[tokio::test]
    async fn aliases_append_once() {
        let (repo, _, _) = fixture().await;
        let row = entity("safari", EntityKind::App);
        repo.insert_entity(&row).await.unwrap();

        repo.add_alias(&row.entity_id, "Safari").await.unwrap();
        repo.add_alias(&row.entity_id, "Safari").await.unwrap();
        repo.add_alias(&row.entity_id, "SAFARI").await.unwrap();

        let stored = repo
            .find_by_canonical(EntityKind::App, "safari")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.aliases, vec!["Safari", "SAFARI"]);
    }

    #[tokio::test]
    async fn note_entity_upsert_keeps_max_strength() {
        let (repo, notes, _) = fixture().await;
        seed_note(&notes, "n1").await;
        let row = entity("rust", EntityKind::Topic);
        repo.insert_entity(&row).await.unwrap();

        repo.upsert_note_entity(&NoteEntity {
            note_id: "n1".into(),
            entity_id: row.entity_id.clone(),
            strength: 0.9,
            context: Some("learning".into()),
        })
        .await
        .unwrap();

        // Lower strength must not decrease the stored value.
        repo.upsert_note_entity(&NoteEntity {
            note_id: "n1".into(),
            entity_id: row.entity_id.clone(),
            strength: 0.2,
            context: None,
        })
        .await
        .unwrap();

        let link = repo.get_note_entity("n1", &row.entity_id).await.unwrap().unwrap();
        assert!((link.strength - 0.9).abs() < 1e-9);
        assert_eq!(link.context.as_deref(), Some("learning"));
    }

    #[tokio::test]
    async fn find_ids_matching_uses_aliases() {
        let (repo, _, _) = fixture().await;
        let row = entity("visual studio code", EntityKind::App);
        repo.insert_entity(&row).await.unwrap();
        repo.add_alias(&row.entity_id, "VS Code").await.unwrap();

        let by_canonical = repo.find_ids_matching("visual studio code", None).await.unwrap();
        assert_eq!(by_canonical, vec![row.entity_id.clone()]);

        let by_alias = repo.find_ids_matching("vs code", None).await.unwrap();
        assert_eq!(by_alias, vec![row.entity_id.clone()]);

        let filtered = repo
            .find_ids_matching("vs code", Some(EntityKind::Topic))
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }
}
