//! Database connection manager backed by a pooled SQLite connection.
//!
//! Every connection enables foreign keys and WAL mode. Migrations are
//! versioned SQL scripts applied in order inside one transaction each;
//! `verify_schema` reports missing or unexpected tables.

use std::path::{Path, PathBuf};

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::info;
use trace_domain::{Result, TraceError};

use crate::errors::InfraError;

/// Ordered migrations; each entry applies atomically.
const MIGRATIONS: &[(i32, &str)] = &[(1, include_str!("schema.sql"))];

/// Tables the schema is expected to contain.
pub const EXPECTED_TABLES: &[&str] = &[
    "schema_version",
    "notes",
    "entities",
    "note_entities",
    "edges",
    "events",
    "screenshots",
    "text_buffers",
    "jobs",
    "aggregates",
    "embeddings",
    "deletion_log",
    "blocklist",
];

pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Schema verification outcome.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaReport {
    pub valid: bool,
    pub current_version: i32,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
}

/// Pooled SQLite manager.
pub struct DbManager {
    pool: r2d2::Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl DbManager {
    /// Open (creating directories as needed) and pool the database at
    /// `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P, pool_size: u32) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TraceError::Storage(format!("create {}: {e}", parent.display())))?;
        }

        let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;\n\
                 PRAGMA journal_mode = WAL;\n\
                 PRAGMA synchronous = NORMAL;",
            )
        });

        let pool = r2d2::Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| TraceError::Storage(format!("pool init: {e}")))?;

        info!(db_path = %path.display(), max_connections = pool.max_size(), "sqlite pool initialised");

        Ok(Self { pool, path })
    }

    /// In-memory database for tests. Pool size is forced to one so every
    /// access sees the same memory database.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = r2d2::Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| TraceError::Storage(format!("pool init: {e}")))?;
        Ok(Self { pool, path: PathBuf::from(":memory:") })
    }

    /// Acquire a connection from the pool.
    pub fn get_connection(&self) -> Result<DbConnection> {
        self.pool.get().map_err(|e| TraceError::from(InfraError::from(e)))
    }

    /// Apply every pending migration, each inside its own transaction.
    pub fn run_migrations(&self) -> Result<usize> {
        let mut conn = self.get_connection()?;

        let current = current_version(&conn);
        let mut applied = 0usize;

        for (version, sql) in MIGRATIONS {
            if *version <= current {
                continue;
            }

            let tx = conn.transaction().map_err(map_sql)?;
            tx.execute_batch(sql).map_err(map_sql)?;
            tx.execute(
                "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, datetime('now', 'localtime'))",
                params![version],
            )
            .map_err(map_sql)?;
            tx.commit().map_err(map_sql)?;

            info!(version, "applied migration");
            applied += 1;
        }

        Ok(applied)
    }

    /// Compare existing tables against the expected set.
    pub fn verify_schema(&self) -> Result<SchemaReport> {
        let conn = self.get_connection()?;

        let mut statement = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .map_err(map_sql)?;
        let existing: Vec<String> = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(map_sql)?
            .filter_map(std::result::Result::ok)
            .filter(|name| !name.starts_with("sqlite_"))
            .collect();

        let missing: Vec<String> = EXPECTED_TABLES
            .iter()
            .filter(|t| !existing.iter().any(|e| e == *t))
            .map(|t| t.to_string())
            .collect();
        let extra: Vec<String> = existing
            .iter()
            .filter(|e| !EXPECTED_TABLES.contains(&e.as_str()))
            .cloned()
            .collect();

        Ok(SchemaReport {
            valid: missing.is_empty(),
            current_version: current_version(&conn),
            missing,
            extra,
        })
    }

    /// Verify database connectivity with a trivial query.
    pub fn health_check(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", params![], |row| row.get::<_, i32>(0)).map_err(map_sql)?;
        Ok(())
    }

    /// Return the configured database path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn current_version(conn: &rusqlite::Connection) -> i32 {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", params![], |row| {
        row.get(0)
    })
    .unwrap_or(0)
}

pub(crate) fn map_sql(err: rusqlite::Error) -> TraceError {
    TraceError::from(InfraError::from(err))
}
