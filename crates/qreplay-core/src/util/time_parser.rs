//! Flexible time parser for CLI arguments (replay window, skip-to).
//!
//! Supports multiple formats:
//! - ISO 8601: `2021-03-04T17:00:00`, `2021-03-04T17:00:00.250Z`, `2021-03-04T17:00:00+02:00`
//! - Unix timestamp: `1614877200`
//! - Relative: `-1h`, `-30m`, `-2d`
//! - Date+time (UTC): `2021-03-04:07:00` or `2021-03-04:07:00:00`

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};

/// Error type for time parsing failures.
#[derive(Debug, Clone)]
pub struct TimeParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse time '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for TimeParseError {}

const UNRECOGNIZED: &str = "Unrecognized format. Use: ISO 8601 (2021-03-04T17:00:00.000Z), \
                            Unix timestamp (1614877200), relative (-1h, -30m, -2d), \
                            or date:time (2021-03-04:07:00)";

/// Parse a flexible time string relative to the current time.
///
/// # Supported formats
///
/// | Format | Example | Description |
/// |--------|---------|-------------|
/// | ISO 8601 | `2021-03-04T17:00:00.5Z` | Datetime, optional fraction and zone (UTC if absent) |
/// | Unix timestamp | `1614877200` | Seconds since epoch |
/// | Relative | `-1h`, `-30m`, `-2d` | Relative to now |
/// | Date+time | `2021-03-04:07:00` | UTC, colon separator |
/// | Date+time+sec | `2021-03-04:07:00:00` | UTC, with seconds |
pub fn parse_time(input: &str) -> Result<DateTime<Utc>, TimeParseError> {
    parse_time_with_base(input, Utc::now())
}

/// Parses a time expression using `base` as the reference for relative input.
pub fn parse_time_with_base(
    input: &str,
    base: DateTime<Utc>,
) -> Result<DateTime<Utc>, TimeParseError> {
    let input = input.trim();

    if let Some(ts) = try_parse_unix_timestamp(input) {
        return Ok(ts);
    }

    if let Some(delta_secs) = try_parse_relative_delta_seconds(input) {
        return TimeDelta::try_seconds(delta_secs)
            .and_then(|delta| base.checked_add_signed(delta))
            .ok_or(TimeParseError {
                input: input.to_string(),
                message: "Relative time overflow".to_string(),
            });
    }

    if let Some(ts) = try_parse_iso8601(input) {
        return Ok(ts);
    }

    if let Some(ts) = try_parse_date_colon_time(input) {
        return Ok(ts);
    }

    Err(TimeParseError {
        input: input.to_string(),
        message: UNRECOGNIZED.to_string(),
    })
}

/// Try to parse as Unix timestamp (plain integer).
fn try_parse_unix_timestamp(input: &str) -> Option<DateTime<Utc>> {
    if input.is_empty() || !input.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let secs = input.parse::<i64>().ok()?;
    DateTime::<Utc>::from_timestamp(secs, 0)
}

/// Parses relative expression and returns delta seconds (negative value).
fn try_parse_relative_delta_seconds(input: &str) -> Option<i64> {
    let rest = input.strip_prefix('-')?;
    if rest.is_empty() {
        return None;
    }

    let unit = rest.chars().last()?;
    let number_str = &rest[..rest.len() - unit.len_utf8()];
    if number_str.is_empty() {
        return None;
    }
    let number: i64 = number_str.parse().ok()?;

    let seconds = match unit {
        's' => number,
        'm' => number * 60,
        'h' => number * 3600,
        'd' => number * 86400,
        'w' => number * 604800,
        _ => return None,
    };

    Some(-seconds)
}

/// Try to parse as ISO 8601 datetime.
fn try_parse_iso8601(input: &str) -> Option<DateTime<Utc>> {
    if !input.contains('T') {
        return None;
    }

    // With timezone (Z or offset), fraction optional
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    // No timezone, assume UTC
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    None
}

/// Try to parse as date:time format (2021-03-04:07:00 or 2021-03-04:07:00:00).
fn try_parse_date_colon_time(input: &str) -> Option<DateTime<Utc>> {
    // Date format: YYYY-MM-DD (10 chars), then ':' and the time
    if !input.contains('-') || input.len() < 11 || !input.is_char_boundary(10) {
        return None;
    }

    let date_part = &input[..10];
    let time_part = input[10..].strip_prefix(':')?;

    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    let time = match time_part.len() {
        5 => NaiveTime::parse_from_str(time_part, "%H:%M").ok()?,
        8 => NaiveTime::parse_from_str(time_part, "%H:%M:%S").ok()?,
        _ => return None,
    };

    Some(Utc.from_utc_datetime(&NaiveDateTime::new(date, time)))
}
