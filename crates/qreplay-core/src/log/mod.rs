//! Query-log input.
//!
//! Parses the fixed-format query log (one entry per line) into [`LogEntry`]
//! values and streams them in file order. Lines that do not match the
//! grammar, or that match but are missing a required field, are reported
//! and skipped without aborting the stream.

mod entry;
pub mod parser;
mod reader;

pub use entry::{Command, LogEntry, MUTATING_OPERATIONS};
pub use parser::{LineError, parse_line, parse_log_timestamp};
pub use reader::{LogReader, ReaderStats};
