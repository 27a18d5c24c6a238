//! Natural-language time filter parsing.
//!
//! Pure function from `(query, reference)` to an inclusive time range.
//! Patterns are tried in priority order; the first hit wins. Weeks start on
//! Monday, `last month` is the previous calendar month in full, and years
//! default to the reference year when omitted.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use trace_domain::utils::time::{
    end_of_day, end_of_month, end_of_week, end_of_year, start_of_day, start_of_month,
    start_of_week, start_of_year,
};

/// A resolved time range filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeFilter {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub description: String,
    pub confidence: f64,
}

impl TimeFilter {
    fn new(start: NaiveDateTime, end: NaiveDateTime, description: impl Into<String>) -> Self {
        Self { start, end, description: description.into(), confidence: 1.0 }
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// Whether `[start, end]` overlaps this filter.
    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.start <= end && start <= self.end
    }

    /// The window as a `(start, end)` pair for store queries.
    pub fn window(&self) -> (NaiveDateTime, NaiveDateTime) {
        (self.start, self.end)
    }
}

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).expect("valid pattern"));
    };
}

pattern!(TODAY, r"\btoday\b");
pattern!(YESTERDAY, r"\byesterday\b");
pattern!(THIS_WEEK, r"\bthis\s+week\b");
pattern!(LAST_WEEK, r"\blast\s+week\b");
pattern!(THIS_MONTH, r"\bthis\s+month\b");
pattern!(LAST_MONTH, r"\blast\s+month\b");
pattern!(THIS_YEAR, r"\bthis\s+year\b");
pattern!(LAST_YEAR, r"\blast\s+year\b");
pattern!(LAST_N_DAYS, r"\b(?:(?:the\s+)?last|past)\s+(\d+)\s+days?\b");
pattern!(LAST_N_WEEKS, r"\b(?:(?:the\s+)?last|past)\s+(\d+)\s+weeks?\b");
pattern!(LAST_N_MONTHS, r"\b(?:(?:the\s+)?last|past)\s+(\d+)\s+months?\b");
pattern!(N_DAYS_AGO, r"\b(\d+)\s+days?\s+ago\b");
pattern!(N_WEEKS_AGO, r"\b(\d+)\s+weeks?\s+ago\b");
pattern!(
    LAST_WEEKDAY,
    r"\blast\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b"
);
pattern!(
    THIS_WEEKDAY,
    r"\b(?:this|on)\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b"
);
pattern!(QUARTER, r"\bq([1-4])\s*(\d{4})?\b");
pattern!(DATE_RANGE, r"\b(?:from\s+)?(.+?)\s+(?:to|through)\s+(.+)$");
pattern!(BETWEEN, r"\bbetween\s+(.+?)\s+and\s+(.+)$");
pattern!(SINCE, r"\bsince\s+(.+?)(?:\s*$|[?.!])");
pattern!(BEFORE, r"\bbefore\s+(.+?)(?:\s*$|[?.!])");
pattern!(AFTER, r"\bafter\s+(.+?)(?:\s*$|[?.!])");
pattern!(ON_DATE, r"\bon\s+(.+?)(?:\s*$|[?.!])");
pattern!(DURING, r"\bduring\s+(.+?)(?:\s*$|[?.!])");
pattern!(ISO_DATE, r"\b(\d{4}-\d{2}-\d{2})\b");
pattern!(
    MONTH_DAY_YEAR,
    r"\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sep|oct|nov|dec)\s+(\d{1,2})(?:st|nd|rd|th)?,?\s*(\d{4})?\b"
);
pattern!(
    MONTH_YEAR,
    r"\b(january|february|march|april|may|june|july|august|september|october|november|december)(?:\s+(\d{4}))?\b"
);
pattern!(YEAR_ONLY, r"\b(20\d{2})\b");

fn month_number(name: &str) -> Option<u32> {
    match &name.to_lowercase()[..3.min(name.len())] {
        "jan" => Some(1),
        "feb" => Some(2),
        "mar" => Some(3),
        "apr" => Some(4),
        "may" => Some(5),
        "jun" => Some(6),
        "jul" => Some(7),
        "aug" => Some(8),
        "sep" => Some(9),
        "oct" => Some(10),
        "nov" => Some(11),
        "dec" => Some(12),
        _ => None,
    }
}

fn weekday_from_name(name: &str) -> Option<Weekday> {
    match name.to_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Parse a single date out of a fragment: ISO, "Month D[, YYYY]",
/// short-month, "Month [YYYY]" (first of month) or bare year.
fn parse_single_date(text: &str, reference: NaiveDateTime) -> Option<NaiveDateTime> {
    let text = text.trim();

    if let Some(captures) = ISO_DATE.captures(text) {
        if let Ok(date) = NaiveDate::parse_from_str(&captures[1], "%Y-%m-%d") {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }

    if let Some(captures) = MONTH_DAY_YEAR.captures(&text.to_lowercase()) {
        let month = month_number(&captures[1])?;
        let day: u32 = captures[2].parse().ok()?;
        let year: i32 = captures
            .get(3)
            .and_then(|y| y.as_str().parse().ok())
            .unwrap_or(reference.year());
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }

    if let Some(captures) = MONTH_YEAR.captures(&text.to_lowercase()) {
        let month = month_number(&captures[1])?;
        let year: i32 = captures
            .get(2)
            .and_then(|y| y.as_str().parse().ok())
            .unwrap_or(reference.year());
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, 1) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }

    if let Some(captures) = YEAR_ONLY.captures(text) {
        if text.trim() == &captures[1] {
            let year: i32 = captures[1].parse().ok()?;
            return NaiveDate::from_ymd_opt(year, 1, 1).map(|d| d.and_time(NaiveTime::MIN));
        }
    }

    None
}

/// Parse a natural-language time reference. Returns `None` when the query
/// contains no recognizable time expression.
pub fn parse_time_filter(query: &str, reference: NaiveDateTime) -> Option<TimeFilter> {
    let query = query.to_lowercase();

    if TODAY.is_match(&query) {
        return Some(TimeFilter::new(start_of_day(reference), end_of_day(reference), "today"));
    }

    if YESTERDAY.is_match(&query) {
        let yesterday = reference - Duration::days(1);
        return Some(TimeFilter::new(
            start_of_day(yesterday),
            end_of_day(yesterday),
            "yesterday",
        ));
    }

    if THIS_WEEK.is_match(&query) {
        return Some(TimeFilter::new(
            start_of_week(reference),
            end_of_week(reference),
            "this week",
        ));
    }

    if LAST_WEEK.is_match(&query) {
        let last_week = reference - Duration::weeks(1);
        return Some(TimeFilter::new(
            start_of_week(last_week),
            end_of_week(last_week),
            "last week",
        ));
    }

    if THIS_MONTH.is_match(&query) {
        return Some(TimeFilter::new(
            start_of_month(reference),
            end_of_month(reference),
            "this month",
        ));
    }

    if LAST_MONTH.is_match(&query) {
        // The previous calendar month in full.
        let last_month_day = start_of_month(reference) - Duration::days(1);
        return Some(TimeFilter::new(
            start_of_month(last_month_day),
            end_of_month(last_month_day),
            "last month",
        ));
    }

    if THIS_YEAR.is_match(&query) {
        return Some(TimeFilter::new(
            start_of_year(reference),
            end_of_year(reference),
            "this year",
        ));
    }

    if LAST_YEAR.is_match(&query) {
        // Exact calendar decrement; a fixed day count can land back inside
        // the current year across a leap year. Feb 29 falls back to Feb 28.
        let last_year = NaiveDate::from_ymd_opt(
            reference.year() - 1,
            reference.month(),
            reference.day(),
        )
        .or_else(|| NaiveDate::from_ymd_opt(reference.year() - 1, reference.month(), 28))?
        .and_time(reference.time());
        return Some(TimeFilter::new(
            start_of_year(last_year),
            end_of_year(last_year),
            "last year",
        ));
    }

    if let Some(captures) = LAST_N_DAYS.captures(&query) {
        let n: i64 = captures[1].parse().ok()?;
        return Some(TimeFilter::new(
            start_of_day(reference - Duration::days(n)),
            end_of_day(reference),
            format!("last {n} days"),
        ));
    }

    if let Some(captures) = LAST_N_WEEKS.captures(&query) {
        let n: i64 = captures[1].parse().ok()?;
        return Some(TimeFilter::new(
            start_of_day(reference - Duration::weeks(n)),
            end_of_day(reference),
            format!("last {n} weeks"),
        ));
    }

    if let Some(captures) = LAST_N_MONTHS.captures(&query) {
        let n: i64 = captures[1].parse().ok()?;
        return Some(TimeFilter::new(
            start_of_day(reference - Duration::days(n * 30)),
            end_of_day(reference),
            format!("last {n} months"),
        ));
    }

    if let Some(captures) = N_DAYS_AGO.captures(&query) {
        let n: i64 = captures[1].parse().ok()?;
        let target = reference - Duration::days(n);
        return Some(TimeFilter::new(
            start_of_day(target),
            end_of_day(target),
            format!("{n} days ago"),
        ));
    }

    if let Some(captures) = N_WEEKS_AGO.captures(&query) {
        let n: i64 = captures[1].parse().ok()?;
        let target = reference - Duration::weeks(n);
        return Some(TimeFilter::new(
            start_of_week(target),
            end_of_week(target),
            format!("{n} weeks ago"),
        ));
    }

    if let Some(captures) = LAST_WEEKDAY.captures(&query) {
        let weekday = weekday_from_name(&captures[1])?;
        let previous_monday = start_of_week(reference) - Duration::weeks(1);
        let day = previous_monday + Duration::days(weekday.num_days_from_monday() as i64);
        return Some(TimeFilter::new(
            start_of_day(day),
            end_of_day(day),
            format!("last {} ({})", &captures[1], day.format("%Y-%m-%d")),
        ));
    }

    if let Some(captures) = THIS_WEEKDAY.captures(&query) {
        let weekday = weekday_from_name(&captures[1])?;
        let monday = start_of_week(reference);
        let day = monday + Duration::days(weekday.num_days_from_monday() as i64);
        return Some(TimeFilter::new(
            start_of_day(day),
            end_of_day(day),
            format!("{} ({})", &captures[1], day.format("%Y-%m-%d")),
        ));
    }

    if let Some(captures) = QUARTER.captures(&query) {
        let quarter: u32 = captures[1].parse().ok()?;
        let year: i32 = captures
            .get(2)
            .and_then(|y| y.as_str().parse().ok())
            .unwrap_or(reference.year());
        let start_month = (quarter - 1) * 3 + 1;
        let start = NaiveDate::from_ymd_opt(year, start_month, 1)?.and_time(NaiveTime::MIN);
        let end = end_of_month(
            NaiveDate::from_ymd_opt(year, start_month + 2, 1)?.and_time(NaiveTime::MIN),
        );
        return Some(TimeFilter::new(start, end, format!("Q{quarter} {year}")));
    }

    if let Some(captures) = DATE_RANGE.captures(&query) {
        let from = parse_single_date(&captures[1], reference);
        let to = parse_single_date(&captures[2], reference);
        if let (Some(from), Some(to)) = (from, to) {
            return Some(TimeFilter::new(
                start_of_day(from),
                end_of_day(to),
                format!("{} to {}", captures[1].trim(), captures[2].trim()),
            ));
        }
    }

    if let Some(captures) = BETWEEN.captures(&query) {
        let from = parse_single_date(&captures[1], reference);
        let to = parse_single_date(&captures[2], reference);
        if let (Some(from), Some(to)) = (from, to) {
            return Some(TimeFilter::new(
                start_of_day(from),
                end_of_day(to),
                format!("between {} and {}", captures[1].trim(), captures[2].trim()),
            ));
        }
    }

    if let Some(captures) = SINCE.captures(&query) {
        if let Some(since) = parse_single_date(&captures[1], reference) {
            return Some(TimeFilter::new(
                start_of_day(since),
                end_of_day(reference),
                format!("since {}", captures[1].trim()),
            ));
        }
    }

    if let Some(captures) = BEFORE.captures(&query) {
        if let Some(before) = parse_single_date(&captures[1], reference) {
            let start = reference - Duration::days(365);
            let mut filter = TimeFilter::new(
                start_of_day(start.min(before - Duration::days(1))),
                end_of_day(before - Duration::days(1)),
                format!("before {}", captures[1].trim()),
            );
            filter.confidence = 0.8;
            return Some(filter);
        }
    }

    if let Some(captures) = AFTER.captures(&query) {
        if let Some(after) = parse_single_date(&captures[1], reference) {
            return Some(TimeFilter::new(
                start_of_day(after + Duration::days(1)),
                end_of_day(reference),
                format!("after {}", captures[1].trim()),
            ));
        }
    }

    if let Some(captures) = ON_DATE.captures(&query) {
        if let Some(on) = parse_single_date(&captures[1], reference) {
            return Some(TimeFilter::new(
                start_of_day(on),
                end_of_day(on),
                format!("on {}", captures[1].trim()),
            ));
        }
    }

    if let Some(captures) = DURING.captures(&query) {
        if let Some(inner) = parse_time_filter(&captures[1], reference) {
            return Some(TimeFilter::new(
                inner.start,
                inner.end,
                format!("during {}", captures[1].trim()),
            ));
        }
    }

    if let Some(captures) = MONTH_DAY_YEAR.captures(&query) {
        let month = month_number(&captures[1])?;
        let day: u32 = captures[2].parse().ok()?;
        let year: i32 = captures
            .get(3)
            .and_then(|y| y.as_str().parse().ok())
            .unwrap_or(reference.year());
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            let day_start = date.and_time(NaiveTime::MIN);
            return Some(TimeFilter::new(
                day_start,
                end_of_day(day_start),
                day_start.format("%B %d, %Y").to_string(),
            ));
        }
    }

    if let Some(captures) = MONTH_YEAR.captures(&query) {
        let month = month_number(&captures[1])?;
        let year: i32 = captures
            .get(2)
            .and_then(|y| y.as_str().parse().ok())
            .unwrap_or(reference.year());
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, 1) {
            let start = date.and_time(NaiveTime::MIN);
            let month_name = &captures[1];
            let capitalized = format!(
                "{}{}",
                month_name[..1].to_uppercase(),
                &month_name[1..]
            );
            return Some(TimeFilter::new(
                start,
                end_of_month(start),
                format!("{capitalized} {year}"),
            ));
        }
    }

    if let Some(captures) = YEAR_ONLY.captures(&query) {
        let year: i32 = captures[1].parse().ok()?;
        let start = NaiveDate::from_ymd_opt(year, 1, 1)?.and_time(NaiveTime::MIN);
        return Some(TimeFilter::new(start, end_of_year(start), year.to_string()));
    }

    if let Some(date) = parse_single_date(&query, reference) {
        return Some(TimeFilter::new(
            start_of_day(date),
            end_of_day(date),
            date.format("%B %d, %Y").to_string(),
        ));
    }

    None
}
