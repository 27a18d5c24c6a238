//! Note rows: rendered summaries persisted once per hour or day.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TraceError};
use crate::types::summary::HourlySummary;

/// Granularity of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    Hour,
    Day,
}

impl NoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteType::Hour => "hour",
            NoteType::Day => "day",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "hour" => Ok(NoteType::Hour),
            "day" => Ok(NoteType::Day),
            other => Err(TraceError::Validation(format!("unknown note type: {other}"))),
        }
    }
}

/// A rendered summary note. At most one row exists per
/// `(note_type = hour, start_ts)` pair; backfill relies on that key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub note_id: String,
    pub note_type: NoteType,
    pub start_ts: NaiveDateTime,
    pub end_ts: NaiveDateTime,
    /// Markdown file path relative to the data root.
    pub file_path: String,
    /// Serialized validated [`HourlySummary`].
    pub json_payload: String,
    pub created_ts: NaiveDateTime,
    pub updated_ts: NaiveDateTime,
}

impl Note {
    /// Parse the structured payload. Errors only on corrupt rows.
    pub fn payload(&self) -> Result<HourlySummary> {
        serde_json::from_str(&self.json_payload)
            .map_err(|e| TraceError::SchemaInvalid(format!("note {} payload: {e}", self.note_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_type_round_trips() {
        assert_eq!(NoteType::parse("hour").unwrap(), NoteType::Hour);
        assert_eq!(NoteType::parse("day").unwrap(), NoteType::Day);
        assert_eq!(NoteType::Hour.as_str(), "hour");
        assert!(NoteType::parse("week").is_err());
    }
}
