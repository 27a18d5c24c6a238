//! Timestamp formatting and windowing helpers.
//!
//! All persisted timestamps are local naive ISO-8601 strings with millisecond
//! precision, so lexicographic ordering equals temporal ordering.

use std::path::PathBuf;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::errors::{Result, TraceError};

/// Format a timestamp as an ISO-8601 string (`2025-01-15T14:00:00.000`).
pub fn format_ts(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

/// Parse an ISO-8601 timestamp, accepting optional fractional seconds and a
/// bare date (midnight).
pub fn parse_ts(raw: &str) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(ts);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(ts) = date.and_hms_opt(0, 0, 0) {
            return Ok(ts);
        }
    }

    Err(TraceError::Validation(format!("unparseable timestamp: {trimmed}")))
}

/// Truncate a timestamp to its hour boundary.
pub fn floor_to_hour(ts: NaiveDateTime) -> NaiveDateTime {
    ts.date().and_hms_opt(ts.hour(), 0, 0).unwrap_or(ts)
}

/// Start of the day containing `ts`.
pub fn start_of_day(ts: NaiveDateTime) -> NaiveDateTime {
    ts.date().and_time(NaiveTime::MIN)
}

/// End of the day containing `ts` (23:59:59.999999).
pub fn end_of_day(ts: NaiveDateTime) -> NaiveDateTime {
    ts.date().and_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(ts)
}

/// Monday 00:00 of the week containing `ts`.
pub fn start_of_week(ts: NaiveDateTime) -> NaiveDateTime {
    let days_since_monday = ts.weekday().num_days_from_monday() as i64;
    start_of_day(ts - Duration::days(days_since_monday))
}

/// Sunday end-of-day of the week containing `ts`.
pub fn end_of_week(ts: NaiveDateTime) -> NaiveDateTime {
    let days_until_sunday = 6 - ts.weekday().num_days_from_monday() as i64;
    end_of_day(ts + Duration::days(days_until_sunday))
}

/// First day of the month containing `ts`, at midnight.
pub fn start_of_month(ts: NaiveDateTime) -> NaiveDateTime {
    let date = ts.date().with_day(1).unwrap_or_else(|| ts.date());
    date.and_time(NaiveTime::MIN)
}

/// Last instant of the month containing `ts`.
pub fn end_of_month(ts: NaiveDateTime) -> NaiveDateTime {
    let date = ts.date();
    let first_of_next = if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    };
    match first_of_next {
        Some(next) => end_of_day((next - Duration::days(1)).and_time(NaiveTime::MIN)),
        None => end_of_day(ts),
    }
}

/// January 1st 00:00 of the year containing `ts`.
pub fn start_of_year(ts: NaiveDateTime) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(ts.year(), 1, 1).map(|d| d.and_time(NaiveTime::MIN)).unwrap_or(ts)
}

/// Last instant of the year containing `ts`.
pub fn end_of_year(ts: NaiveDateTime) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(ts.year(), 12, 31).map(end_of_day_date).unwrap_or(ts)
}

fn end_of_day_date(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_micro_opt(23, 59, 59, 999_999).unwrap_or_else(|| date.and_time(NaiveTime::MIN))
}

/// Relative path of the hourly note file for an hour start:
/// `notes/YYYY/MM/DD/hour-YYYYMMDD-HH.md`.
pub fn hour_note_path(hour_start: NaiveDateTime) -> PathBuf {
    PathBuf::from(format!(
        "notes/{:04}/{:02}/{:02}/hour-{:04}{:02}{:02}-{:02}.md",
        hour_start.year(),
        hour_start.month(),
        hour_start.day(),
        hour_start.year(),
        hour_start.month(),
        hour_start.day(),
        hour_start.hour(),
    ))
}

/// Relative path of the daily rollup note: `notes/YYYY/MM/DD/index.md`.
pub fn day_note_path(day: NaiveDate) -> PathBuf {
    PathBuf::from(format!("notes/{:04}/{:02}/{:02}/index.md", day.year(), day.month(), day.day()))
}

/// Relative path of a screenshot blob:
/// `screenshots/YYYY/MM/DD/HHMMSSmmm_m{monitor}_{shortid}.jpg`.
pub fn screenshot_path(ts: NaiveDateTime, monitor_id: i64, short_id: &str) -> PathBuf {
    PathBuf::from(format!(
        "screenshots/{:04}/{:02}/{:02}/{:02}{:02}{:02}{:03}_m{}_{}.jpg",
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second(),
        ts.and_utc().timestamp_subsec_millis(),
        monitor_id,
        short_id,
    ))
}
