//! Synchronous blocklist persistence.
//!
//! Used from both the capture thread (match checks via the core service's
//! cache) and IPC handlers (CRUD), so the whole repository stays
//! synchronous.

use std::sync::Arc;

use rusqlite::{params, Row};
use trace_core::capture::ports::BlocklistStore;
use trace_domain::types::{BlockKind, BlocklistEntry};
use trace_domain::utils::time::{format_ts, parse_ts};
use trace_domain::Result;

use crate::database::manager::{map_sql, DbManager};

/// Default privacy rules seeded on first run: credential managers and
/// banking domains never get captured.
const DEFAULT_APP_BLOCKS: &[(&str, &str)] = &[
    ("com.1password.1password", "1Password"),
    ("com.agilebits.onepassword7", "1Password 7"),
    ("com.apple.Passwords", "Passwords"),
    ("com.bitwarden.desktop", "Bitwarden"),
    ("com.lastpass.LastPass", "LastPass"),
];

const DEFAULT_DOMAIN_BLOCKS: &[(&str, &str)] = &[
    ("chase.com", "Chase"),
    ("bankofamerica.com", "Bank of America"),
    ("wellsfargo.com", "Wells Fargo"),
    ("fidelity.com", "Fidelity"),
    ("schwab.com", "Charles Schwab"),
];

/// Blocklist table access.
pub struct SqliteBlocklistRepository {
    db: Arc<DbManager>,
}

impl SqliteBlocklistRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Seed the default rules when the table is empty. Returns how many
    /// entries were added.
    pub fn seed_defaults(&self) -> Result<usize> {
        let conn = self.db.get_connection()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM blocklist", [], |r| r.get(0)).map_err(map_sql)?;
        if count > 0 {
            return Ok(0);
        }
        drop(conn);

        let now = chrono::Local::now().naive_local();
        let mut seeded = 0usize;

        for (pattern, display) in DEFAULT_APP_BLOCKS {
            self.upsert_entry(&entry(BlockKind::App, pattern, display, now))?;
            seeded += 1;
        }
        for (pattern, display) in DEFAULT_DOMAIN_BLOCKS {
            self.upsert_entry(&entry(BlockKind::Domain, pattern, display, now))?;
            seeded += 1;
        }

        tracing::info!(seeded, "seeded default blocklist");
        Ok(seeded)
    }
}

fn entry(
    block_type: BlockKind,
    pattern: &str,
    display: &str,
    now: chrono::NaiveDateTime,
) -> BlocklistEntry {
    BlocklistEntry {
        blocklist_id: uuid::Uuid::new_v4().to_string(),
        block_type,
        pattern: pattern.to_string(),
        display_name: Some(display.to_string()),
        enabled: true,
        block_screenshots: true,
        block_events: true,
        created_ts: now,
        updated_ts: now,
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<BlocklistEntry> {
    let kind_raw: String = row.get("block_type")?;
    let created_raw: String = row.get("created_ts")?;
    let updated_raw: String = row.get("updated_ts")?;

    Ok(BlocklistEntry {
        blocklist_id: row.get("blocklist_id")?,
        block_type: BlockKind::parse(&kind_raw).unwrap_or(BlockKind::App),
        pattern: row.get("pattern")?,
        display_name: row.get("display_name")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        block_screenshots: row.get::<_, i64>("block_screenshots")? != 0,
        block_events: row.get::<_, i64>("block_events")? != 0,
        created_ts: parse_ts(&created_raw).unwrap_or_default(),
        updated_ts: parse_ts(&updated_raw).unwrap_or_default(),
    })
}

const COLUMNS: &str = "blocklist_id, block_type, pattern, display_name, enabled, \
                       block_screenshots, block_events, created_ts, updated_ts";

impl BlocklistStore for SqliteBlocklistRepository {
    fn list_entries(&self, include_disabled: bool) -> Result<Vec<BlocklistEntry>> {
        let conn = self.db.get_connection()?;
        let sql = if include_disabled {
            format!("SELECT {COLUMNS} FROM blocklist ORDER BY block_type, pattern")
        } else {
            format!(
                "SELECT {COLUMNS} FROM blocklist WHERE enabled = 1 ORDER BY block_type, pattern"
            )
        };

        let mut statement = conn.prepare(&sql).map_err(map_sql)?;
        let entries = statement
            .query_map([], entry_from_row)
            .map_err(map_sql)?
            .filter_map(std::result::Result::ok)
            .collect();
        Ok(entries)
    }

    fn upsert_entry(&self, entry: &BlocklistEntry) -> Result<BlocklistEntry> {
        let conn = self.db.get_connection()?;
        conn.execute(
            "INSERT INTO blocklist
             (blocklist_id, block_type, pattern, display_name, enabled,
              block_screenshots, block_events, created_ts, updated_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(block_type, pattern) DO UPDATE SET
                 display_name = COALESCE(excluded.display_name, blocklist.display_name),
                 enabled = 1,
                 updated_ts = excluded.updated_ts",
            params![
                entry.blocklist_id,
                entry.block_type.as_str(),
                entry.pattern,
                entry.display_name,
                entry.enabled as i64,
                entry.block_screenshots as i64,
                entry.block_events as i64,
                format_ts(entry.created_ts),
                format_ts(entry.updated_ts),
            ],
        )
        .map_err(map_sql)?;

        conn.query_row(
            &format!("SELECT {COLUMNS} FROM blocklist WHERE block_type = ?1 AND pattern = ?2"),
            params![entry.block_type.as_str(), entry.pattern],
            entry_from_row,
        )
        .map_err(map_sql)
    }

    fn remove_entry(&self, blocklist_id: &str) -> Result<bool> {
        let conn = self.db.get_connection()?;
        let removed = conn
            .execute("DELETE FROM blocklist WHERE blocklist_id = ?1", params![blocklist_id])
            .map_err(map_sql)?;
        Ok(removed > 0)
    }

    fn set_enabled(&self, blocklist_id: &str, enabled: bool) -> Result<bool> {
        let conn = self.db.get_connection()?;
        let updated = conn
            .execute(
                "UPDATE blocklist
                 SET enabled = ?1, updated_ts = datetime('now', 'localtime')
                 WHERE blocklist_id = ?2",
                params![enabled as i64, blocklist_id],
            )
            .map_err(map_sql)?;
        Ok(updated > 0)
    }
}
