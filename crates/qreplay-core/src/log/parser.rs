//! Query-log line grammar.
//!
//! ```text
//! TIMESTAMP HIRES_TIMESTAMP CONNECTION_ID COMMAND ARGUMENT
//! 2021-03-04T17:00:00.000000Z 2021-03-04T17:00:00.123456Z 42 Query SELECT 1
//! ```
//!
//! Fields are separated by runs of whitespace; ARGUMENT is the rest of the
//! line. Timestamps are ISO 8601 in UTC with a mandatory fractional part.
//! The grammar is fixed, so the line is scanned field by field instead of
//! going through a regular expression.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use super::entry::{Command, LogEntry};

/// Why a line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineError {
    /// The line does not match the grammar.
    Malformed(&'static str),
    /// The line matches, but a required field is empty.
    Incomplete,
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineError::Malformed(reason) => write!(f, "line did not match: {}", reason),
            LineError::Incomplete => write!(f, "line is not complete"),
        }
    }
}

/// Parse one log line into a complete entry.
pub fn parse_line(line: &str, line_number: u64) -> Result<LogEntry, LineError> {
    let line = line.trim_end_matches(['\n', '\r']);

    let (timestamp, rest) = take_field(line).ok_or(LineError::Malformed("missing timestamp"))?;
    let timestamp =
        parse_log_timestamp(timestamp).ok_or(LineError::Malformed("invalid timestamp"))?;

    let rest = take_separator(rest).ok_or(LineError::Malformed("missing hi-res timestamp"))?;
    let (hi_res, rest) = take_field(rest).ok_or(LineError::Malformed("missing hi-res timestamp"))?;
    let hi_res_timestamp =
        parse_log_timestamp(hi_res).ok_or(LineError::Malformed("invalid hi-res timestamp"))?;

    let rest = take_separator(rest).ok_or(LineError::Malformed("missing connection id"))?;
    let (connection_id, rest) =
        take_field(rest).ok_or(LineError::Malformed("missing connection id"))?;
    if !connection_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LineError::Malformed("invalid connection id"));
    }
    let connection_id = connection_id
        .parse::<u64>()
        .map_err(|_| LineError::Malformed("connection id out of range"))?;

    let rest = take_separator(rest).ok_or(LineError::Malformed("missing command"))?;
    let (command, rest) = take_field(rest).ok_or(LineError::Malformed("missing command"))?;
    if !command.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(LineError::Malformed("invalid command"));
    }
    let command = Command::parse(command);

    // A command at end of line is accepted; completeness decides below.
    let argument = match rest {
        "" => "",
        rest => take_separator(rest).ok_or(LineError::Malformed("missing argument separator"))?,
    };

    if argument.is_empty() && command != Command::Quit {
        return Err(LineError::Incomplete);
    }

    Ok(LogEntry {
        timestamp,
        hi_res_timestamp,
        connection_id,
        command,
        argument: argument.to_string(),
        line_number,
    })
}

/// Parse `YYYY-MM-DDTHH:MM:SS.fffZ` (fraction of any length, `Z` required).
pub fn parse_log_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let bytes = s.as_bytes();
    // 19 chars of date/time, '.', at least one digit, 'Z'
    if bytes.len() < 22 || bytes[19] != b'.' || bytes[bytes.len() - 1] != b'Z' {
        return None;
    }
    let shape_ok = bytes[..19].iter().enumerate().all(|(i, &b)| match i {
        4 | 7 => b == b'-',
        10 => b == b'T',
        13 | 16 => b == b':',
        _ => b.is_ascii_digit(),
    });
    let fraction_ok = bytes[20..bytes.len() - 1].iter().all(u8::is_ascii_digit);
    if !shape_ok || !fraction_ok {
        return None;
    }

    let naive = NaiveDateTime::parse_from_str(&s[..s.len() - 1], "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Splits off a non-empty run of non-whitespace characters.
fn take_field(input: &str) -> Option<(&str, &str)> {
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    if end == 0 {
        return None;
    }
    Some(input.split_at(end))
}

/// Consumes a non-empty run of whitespace.
fn take_separator(input: &str) -> Option<&str> {
    let trimmed = input.trim_start();
    if trimmed.len() == input.len() {
        return None;
    }
    Some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "2021-03-04T17:00:00.000000Z";
    const HI: &str = "2021-03-04T17:00:00.123456Z";

    #[test]
    fn test_parse_query_line() {
        let line = format!("{TS} {HI} 42 Query SELECT * FROM users WHERE id = 1\n");
        let entry = parse_line(&line, 7).unwrap();
        assert_eq!(entry.connection_id, 42);
        assert_eq!(entry.command, Command::Query);
        assert_eq!(entry.argument, "SELECT * FROM users WHERE id = 1");
        assert_eq!(entry.line_number, 7);
        assert_eq!(entry.hi_res_timestamp.timestamp_subsec_micros(), 123456);
        assert_eq!(entry.timestamp.timestamp(), 1614877200);
    }

    #[test]
    fn test_tabs_and_runs_of_whitespace() {
        let line = format!("{TS}\t{HI}   9\tExecute\t  UPDATE t SET x = 1\r\n");
        let entry = parse_line(&line, 1).unwrap();
        assert_eq!(entry.command, Command::Execute);
        assert_eq!(entry.argument, "UPDATE t SET x = 1");
    }

    #[test]
    fn test_quit_without_argument_is_complete() {
        let entry = parse_line(&format!("{TS} {HI} 3 Quit\t"), 1).unwrap();
        assert_eq!(entry.command, Command::Quit);
        assert!(entry.argument.is_empty());

        let entry = parse_line(&format!("{TS} {HI} 3 Quit"), 1).unwrap();
        assert_eq!(entry.command, Command::Quit);
    }

    #[test]
    fn test_missing_argument_is_incomplete() {
        assert_eq!(
            parse_line(&format!("{TS} {HI} 3 Query "), 1),
            Err(LineError::Incomplete)
        );
        assert_eq!(
            parse_line(&format!("{TS} {HI} 3 Execute"), 1),
            Err(LineError::Incomplete)
        );
    }

    #[test]
    fn test_malformed_lines() {
        let cases = [
            String::new(),
            "WHERE id = 5".to_string(),
            // continuation of a multi-line statement
            "  AND created_at > NOW()".to_string(),
            // missing fraction
            format!("2021-03-04T17:00:00Z {HI} 1 Query SELECT 1"),
            // missing zone
            format!("2021-03-04T17:00:00.1 {HI} 1 Query SELECT 1"),
            // non-numeric connection id
            format!("{TS} {HI} abc Query SELECT 1"),
            // command with digits
            format!("{TS} {HI} 1 Query2 SELECT 1"),
            // only one timestamp
            format!("{TS} 1 Query SELECT 1"),
        ];
        for line in &cases {
            assert!(
                matches!(parse_line(line, 1), Err(LineError::Malformed(_))),
                "expected malformed: {line:?}"
            );
        }
    }

    #[test]
    fn test_parse_log_timestamp() {
        let ts = parse_log_timestamp("2021-03-04T17:00:00.5Z").unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 500);
        assert!(parse_log_timestamp("2021-03-04 17:00:00.5Z").is_none());
        assert!(parse_log_timestamp("2021-03-04T17:00:00.Z").is_none());
        assert!(parse_log_timestamp("2021-13-04T17:00:00.5Z").is_none());
    }
}
