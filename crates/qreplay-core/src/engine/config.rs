//! Replay settings and their defaults.
//!
//! Pool sizes default to 300 readers and 100 writers. The window defaults to
//! the whole log, from the epoch to now.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::ReplayError;

pub const DEFAULT_READER_POOL_SIZE: usize = 300;
pub const DEFAULT_WRITER_POOL_SIZE: usize = 100;
pub const DEFAULT_METRICS_FILE: &str = "query-metrics.jsonl";

/// Everything a replay needs besides its database connectors.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConfig {
    pub log_path: PathBuf,
    pub metrics_path: PathBuf,
    /// Entries strictly after this time are replayed at original pace.
    pub start_time: DateTime<Utc>,
    /// The first entry strictly after this time ends the replay.
    pub end_time: DateTime<Utc>,
    /// Entries before this time are ignored entirely.
    pub skip_to: Option<DateTime<Utc>>,
    pub reader_pool_size: usize,
    pub writer_pool_size: usize,
    /// Redraw the progress line on stdout.
    pub progress: bool,
}

impl ReplayConfig {
    /// Replays the whole log: start at the epoch, end now.
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            metrics_path: PathBuf::from(DEFAULT_METRICS_FILE),
            start_time: DateTime::<Utc>::UNIX_EPOCH,
            end_time: Utc::now(),
            skip_to: None,
            reader_pool_size: DEFAULT_READER_POOL_SIZE,
            writer_pool_size: DEFAULT_WRITER_POOL_SIZE,
            progress: true,
        }
    }

    pub fn with_window(mut self, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    pub fn with_skip_to(mut self, skip_to: Option<DateTime<Utc>>) -> Self {
        self.skip_to = skip_to;
        self
    }

    pub fn with_metrics_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_path = path.into();
        self
    }

    pub fn with_pool_sizes(mut self, readers: usize, writers: usize) -> Self {
        self.reader_pool_size = readers;
        self.writer_pool_size = writers;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn validate(&self) -> Result<(), ReplayError> {
        if self.reader_pool_size == 0 {
            return Err(ReplayError::Config(
                "reader pool size must be at least 1".to_string(),
            ));
        }
        if self.writer_pool_size == 0 {
            return Err(ReplayError::Config(
                "writer pool size must be at least 1".to_string(),
            ));
        }
        if self.end_time < self.start_time {
            return Err(ReplayError::Config(format!(
                "end time {} is before start time {}",
                self.end_time, self.start_time
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_defaults() {
        let config = ReplayConfig::new("mysql.log");
        assert_eq!(config.reader_pool_size, 300);
        assert_eq!(config.writer_pool_size, 100);
        assert_eq!(config.metrics_path, PathBuf::from("query-metrics.jsonl"));
        assert_eq!(config.start_time, DateTime::<Utc>::UNIX_EPOCH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let now = Utc::now();
        assert!(ReplayConfig::new("a.log").with_pool_sizes(0, 1).validate().is_err());
        assert!(ReplayConfig::new("a.log").with_pool_sizes(1, 0).validate().is_err());
        assert!(
            ReplayConfig::new("a.log")
                .with_window(now, now - TimeDelta::seconds(1))
                .validate()
                .is_err()
        );
        assert!(ReplayConfig::new("a.log").with_window(now, now).validate().is_ok());
    }
}
