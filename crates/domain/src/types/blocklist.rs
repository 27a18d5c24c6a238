//! Privacy blocklist entries.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TraceError};

/// What a blocklist pattern matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    App,
    Domain,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::App => "app",
            BlockKind::Domain => "domain",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "app" => Ok(BlockKind::App),
            "domain" => Ok(BlockKind::Domain),
            other => Err(TraceError::Validation(format!("unknown block type: {other}"))),
        }
    }
}

/// A blocklist rule. App patterns match the bundle id exactly; domain
/// patterns match by suffix (blocking `example.com` blocks
/// `sub.example.com`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocklistEntry {
    pub blocklist_id: String,
    pub block_type: BlockKind,
    pub pattern: String,
    pub display_name: Option<String>,
    pub enabled: bool,
    pub block_screenshots: bool,
    pub block_events: bool,
    pub created_ts: NaiveDateTime,
    pub updated_ts: NaiveDateTime,
}
