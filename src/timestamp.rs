//! Timestamp normalization for portal observations.
//!
//! The portal emits several encodings for the same field: RFC 3339 with `Z` or an
//! explicit offset, ISO-8601 without offset, .NET-style fractional seconds longer
//! than nine digits, and US `MM/DD/YYYY` dates. Every value is normalized to a
//! `DateTime<Utc>` before any arithmetic. Values without an offset are taken as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("timestamp is missing")]
    Missing,
    #[error("unrecognized timestamp format: {0:?}")]
    Unrecognized(String),
}

type Strategy = fn(&str) -> Option<DateTime<Utc>>;

/// Parse attempts, tried in order. The first success wins.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("iso8601-offset", parse_iso_with_offset),
    ("iso8601-naive", parse_iso_naive),
    ("iso8601-truncated", parse_iso_truncated),
    ("us-datetime", parse_us_datetime),
    ("us-date", parse_us_date),
    ("sql-datetime", parse_sql_datetime),
    ("date", parse_date),
];

/// Normalize a raw portal timestamp into a UTC instant.
///
/// `None`, empty and whitespace-only input fail with [`TimestampError::Missing`].
pub fn normalize(raw: Option<&str>) -> Result<DateTime<Utc>, TimestampError> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    let Some(raw) = raw else {
        return Err(TimestampError::Missing);
    };

    STRATEGIES
        .iter()
        .find_map(|(name, parse)| {
            let parsed = parse(raw)?;
            tracing::trace!(strategy = *name, raw, "timestamp normalized");
            Some(parsed)
        })
        .ok_or_else(|| TimestampError::Unrecognized(raw.to_string()))
}

/// Convenience for a value that is known to be present.
pub fn normalize_str(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    normalize(Some(raw))
}

/// Signed hours from `earlier` to `later`.
pub fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 3_600_000.0
}

fn parse_iso_with_offset(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Offsets written without a colon (`+0000`) or missing seconds.
    ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z"]
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_iso_naive(s: &str) -> Option<DateTime<Utc>> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Drop the fractional-second digits and retry the ISO strategies. Handles
/// fractions chrono refuses, such as more than nine digits.
fn parse_iso_truncated(s: &str) -> Option<DateTime<Utc>> {
    let (head, tail) = s.split_once('.')?;
    if !head.contains('T') {
        return None;
    }
    let rest = tail.trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() == tail.len() {
        return None;
    }
    let truncated = format!("{head}{rest}");
    parse_iso_with_offset(&truncated).or_else(|| parse_iso_naive(&truncated))
}

fn parse_us_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%m/%d/%Y %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_us_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(s, "%m/%d/%Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_sql_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
