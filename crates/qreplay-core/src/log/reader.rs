//! Streaming reader over a query-log file.
//!
//! Single pass, strictly in file order. Malformed and incomplete lines are
//! reported via `tracing` and counted; only I/O failures end the stream
//! early.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tracing::warn;

use super::entry::LogEntry;
use super::parser::{LineError, parse_line};
use crate::error::ReplayError;

/// Longest line prefix echoed into diagnostics.
const MAX_DIAGNOSTIC_LINE_LEN: usize = 200;

/// Counters describing what the reader has consumed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub lines_read: u64,
    pub entries: u64,
    pub malformed: u64,
    pub incomplete: u64,
}

/// Iterator over the complete entries of a log.
pub struct LogReader<R> {
    input: R,
    buf: Vec<u8>,
    stats: ReaderStats,
    done: bool,
}

impl LogReader<BufReader<File>> {
    /// Open a log file for reading.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> LogReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            buf: Vec::new(),
            stats: ReaderStats::default(),
            done: false,
        }
    }

    /// Returns the counters for lines consumed so far.
    pub fn stats(&self) -> ReaderStats {
        self.stats
    }
}

impl<R: BufRead> Iterator for LogReader<R> {
    type Item = Result<LogEntry, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.input.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.stats.lines_read += 1;
                    let line_number = self.stats.lines_read;
                    // Invalid UTF-8 is replaced rather than failing the whole stream
                    let line = String::from_utf8_lossy(&self.buf);

                    match parse_line(&line, line_number) {
                        Ok(entry) => {
                            self.stats.entries += 1;
                            return Some(Ok(entry));
                        }
                        Err(err) => {
                            match err {
                                LineError::Malformed(_) => self.stats.malformed += 1,
                                LineError::Incomplete => self.stats.incomplete += 1,
                            }
                            warn!(
                                line = line_number,
                                text = %truncate(line.trim_end(), MAX_DIAGNOSTIC_LINE_LEN),
                                "{}",
                                err
                            );
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(ReplayError::Io(e)));
                }
            }
        }
        None
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
