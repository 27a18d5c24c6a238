//! Pre-rolled usage aggregates for "top / most" queries.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TraceError};

/// Window granularity an aggregate row covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Hour => "hour",
            PeriodType::Day => "day",
            PeriodType::Week => "week",
            PeriodType::Month => "month",
            PeriodType::Year => "year",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "hour" => Ok(PeriodType::Hour),
            "day" => Ok(PeriodType::Day),
            "week" => Ok(PeriodType::Week),
            "month" => Ok(PeriodType::Month),
            "year" => Ok(PeriodType::Year),
            other => Err(TraceError::Validation(format!("unknown period type: {other}"))),
        }
    }
}

/// What an aggregate key identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKeyType {
    Category,
    Entity,
    CoActivity,
    App,
    Domain,
    Topic,
    Media,
    Artist,
    Track,
}

impl AggregateKeyType {
    pub const ALL: &'static [AggregateKeyType] = &[
        AggregateKeyType::Category,
        AggregateKeyType::Entity,
        AggregateKeyType::CoActivity,
        AggregateKeyType::App,
        AggregateKeyType::Domain,
        AggregateKeyType::Topic,
        AggregateKeyType::Media,
        AggregateKeyType::Artist,
        AggregateKeyType::Track,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKeyType::Category => "category",
            AggregateKeyType::Entity => "entity",
            AggregateKeyType::CoActivity => "co_activity",
            AggregateKeyType::App => "app",
            AggregateKeyType::Domain => "domain",
            AggregateKeyType::Topic => "topic",
            AggregateKeyType::Media => "media",
            AggregateKeyType::Artist => "artist",
            AggregateKeyType::Track => "track",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == raw)
            .ok_or_else(|| TraceError::Validation(format!("unknown aggregate key type: {raw}")))
    }
}

/// One pre-rolled usage row. Values for the same `(key_type, key)` are
/// sum-aggregatable across overlapping windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    pub period_type: PeriodType,
    pub period_start_ts: NaiveDateTime,
    pub period_end_ts: NaiveDateTime,
    pub key_type: AggregateKeyType,
    pub key: String,
    /// Usually seconds of usage; count semantics for some key types.
    pub value_num: f64,
    pub extra_json: Option<String>,
}
