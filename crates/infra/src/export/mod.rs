//! Data export: JSON dump, Markdown mirror and zip archive.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use rusqlite::params;
use serde_json::{json, Value};
use tracing::info;
use trace_domain::{Result, TraceError};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::database::manager::{map_sql, DbManager};

const EXPORT_VERSION: &str = "1.0";

/// Counts included in an export.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExportStats {
    pub notes: usize,
    pub entities: usize,
    pub note_entities: usize,
    pub edges: usize,
    pub aggregates: usize,
    pub files: usize,
}

/// Exports the corpus from the database and notes tree.
pub struct TraceExporter {
    db: Arc<DbManager>,
    data_dir: PathBuf,
}

impl TraceExporter {
    pub fn new(db: Arc<DbManager>, data_dir: impl Into<PathBuf>) -> Self {
        Self { db, data_dir: data_dir.into() }
    }

    /// Counts only, for the IPC `export.summary` method.
    pub fn summary(&self) -> Result<ExportStats> {
        let conn = self.db.get_connection()?;
        let count = |table: &str| -> Result<usize> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(map_sql)
        };

        Ok(ExportStats {
            notes: count("notes")?,
            entities: count("entities")?,
            note_entities: count("note_entities")?,
            edges: count("edges")?,
            aggregates: count("aggregates")?,
            files: 0,
        })
    }

    /// Dump the structured corpus as one JSON document.
    pub fn export_json(&self, output_path: &Path) -> Result<ExportStats> {
        let conn = self.db.get_connection()?;

        let notes = rows_to_json(
            &conn,
            "SELECT note_id, note_type, start_ts, end_ts, file_path, json_payload, created_ts, updated_ts FROM notes ORDER BY start_ts",
        )?;
        let entities = rows_to_json(
            &conn,
            "SELECT entity_id, entity_type, canonical_name, aliases, created_ts, updated_ts FROM entities ORDER BY canonical_name",
        )?;
        let note_entities = rows_to_json(
            &conn,
            "SELECT note_id, entity_id, strength, context FROM note_entities",
        )?;
        let edges = rows_to_json(
            &conn,
            "SELECT from_id, to_id, edge_type, weight, start_ts, end_ts, evidence_note_ids FROM edges",
        )?;
        let aggregates = rows_to_json(
            &conn,
            "SELECT period_type, period_start_ts, period_end_ts, key_type, key, value_num, extra_json FROM aggregates",
        )?;

        let stats = ExportStats {
            notes: notes.len(),
            entities: entities.len(),
            note_entities: note_entities.len(),
            edges: edges.len(),
            aggregates: aggregates.len(),
            files: 1,
        };

        let document = json!({
            "export_version": EXPORT_VERSION,
            "exported_at": trace_domain::utils::time::format_ts(Local::now().naive_local()),
            "counts": {
                "notes": stats.notes,
                "entities": stats.entities,
                "note_entities": stats.note_entities,
                "edges": stats.edges,
                "aggregates": stats.aggregates,
            },
            "notes": notes,
            "entities": entities,
            "note_entities": note_entities,
            "edges": edges,
            "aggregates": aggregates,
        });

        write_file(output_path, serde_json::to_string_pretty(&document).map_err(to_storage)?.as_bytes())?;
        info!(path = %output_path.display(), notes = stats.notes, "JSON export complete");
        Ok(stats)
    }

    /// Mirror the notes tree into `output_dir`, preserving relative paths.
    pub fn export_markdown(&self, output_dir: &Path) -> Result<ExportStats> {
        let notes_root = self.data_dir.join("notes");
        let mut stats = ExportStats::default();

        if !notes_root.exists() {
            return Ok(stats);
        }

        for entry in WalkDir::new(&notes_root).into_iter().filter_map(std::result::Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&notes_root)
                .map_err(|e| TraceError::Storage(e.to_string()))?;
            let target = output_dir.join("notes").join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(to_storage)?;
            }
            std::fs::copy(entry.path(), &target).map_err(to_storage)?;
            stats.files += 1;
        }

        info!(files = stats.files, dir = %output_dir.display(), "Markdown export complete");
        Ok(stats)
    }

    /// Zip archive of `metadata.json` plus the notes subtree.
    pub fn export_archive(&self, output_path: &Path) -> Result<ExportStats> {
        let mut stats = self.summary()?;

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).map_err(to_storage)?;
        }
        let file = std::fs::File::create(output_path).map_err(to_storage)?;
        let mut archive = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let metadata = json!({
            "export_version": EXPORT_VERSION,
            "exported_at": trace_domain::utils::time::format_ts(Local::now().naive_local()),
            "counts": {
                "notes": stats.notes,
                "entities": stats.entities,
                "edges": stats.edges,
            },
        });
        archive.start_file("metadata.json", options).map_err(to_zip)?;
        archive
            .write_all(serde_json::to_string_pretty(&metadata).map_err(to_storage)?.as_bytes())
            .map_err(to_storage)?;
        stats.files = 1;

        let notes_root = self.data_dir.join("notes");
        if notes_root.exists() {
            for entry in WalkDir::new(&notes_root).into_iter().filter_map(std::result::Result::ok)
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&self.data_dir)
                    .map_err(|e| TraceError::Storage(e.to_string()))?;
                archive
                    .start_file(relative.to_string_lossy().into_owned(), options)
                    .map_err(to_zip)?;
                let content = std::fs::read(entry.path()).map_err(to_storage)?;
                archive.write_all(&content).map_err(to_storage)?;
                stats.files += 1;
            }
        }

        archive.finish().map_err(to_zip)?;
        info!(path = %output_path.display(), files = stats.files, "archive export complete");
        Ok(stats)
    }
}

fn rows_to_json(conn: &rusqlite::Connection, sql: &str) -> Result<Vec<Value>> {
    let mut statement = conn.prepare(sql).map_err(map_sql)?;
    let column_names: Vec<String> =
        statement.column_names().iter().map(|s| s.to_string()).collect();

    let rows = statement
        .query_map([], |row| {
            let mut object = serde_json::Map::new();
            for (index, name) in column_names.iter().enumerate() {
                let value = match row.get_ref(index)? {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(v) => Value::from(v),
                    rusqlite::types::ValueRef::Real(v) => Value::from(v),
                    rusqlite::types::ValueRef::Text(v) => {
                        Value::from(String::from_utf8_lossy(v).into_owned())
                    }
                    rusqlite::types::ValueRef::Blob(_) => Value::Null,
                };
                object.insert(name.clone(), value);
            }
            Ok(Value::Object(object))
        })
        .map_err(map_sql)?
        .filter_map(std::result::Result::ok)
        .collect();

    Ok(rows)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(to_storage)?;
    }
    std::fs::write(path, bytes).map_err(to_storage)
}

fn to_storage(err: impl std::fmt::Display) -> TraceError {
    TraceError::Storage(err.to_string())
}

fn to_zip(err: zip::result::ZipError) -> TraceError {
    TraceError::Storage(format!("zip: {err}"))
}
