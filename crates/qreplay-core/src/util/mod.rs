//! Utility modules for qreplay.

mod time_parser;

pub use time_parser::{TimeParseError, parse_time, parse_time_with_base};
