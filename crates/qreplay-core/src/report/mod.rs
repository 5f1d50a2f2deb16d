//! Post-run analysis of a metrics log.
//!
//! Records are grouped into fixed-width bins by their original log
//! timestamp. Throughput is attributed separately, to the bin holding the
//! moment each query actually started (log timestamp plus queue latency).

mod stats;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, warn};

pub use stats::{Distribution, percentile};

use crate::engine::MetricRecord;
use crate::error::ReplayError;

/// Statistics of one time bin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinReport {
    pub start: DateTime<Utc>,
    /// Records whose log timestamp falls in this bin.
    pub queries: u64,
    pub errors: u64,
    pub queue_latency: Option<Distribution>,
    pub execution_time: Option<Distribution>,
    /// Counts per command word.
    pub operations: BTreeMap<String, u64>,
    /// Counts per lower-cased first word of the SQL.
    pub actions: BTreeMap<String, u64>,
    /// Queries started in this bin, per second.
    pub tps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub bin_size: u64,
    pub records: u64,
    pub errors: u64,
    /// Lines that were not valid metric records.
    pub malformed: u64,
    pub bins: Vec<BinReport>,
}

#[derive(Default)]
struct BinAccumulator {
    queries: u64,
    errors: u64,
    latencies: Vec<f64>,
    execution_times: Vec<f64>,
    operations: BTreeMap<String, u64>,
    actions: BTreeMap<String, u64>,
    started: u64,
}

impl MetricsReport {
    pub fn from_path(path: impl AsRef<Path>, bin_size: u64) -> Result<Self, ReplayError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), bin_size)
    }

    /// Reads JSON-lines metric records and aggregates them per bin of
    /// `bin_size` seconds.
    pub fn from_reader<R: BufRead>(reader: R, bin_size: u64) -> Result<Self, ReplayError> {
        if bin_size == 0 {
            return Err(ReplayError::Config("bin size must be at least 1 second".to_string()));
        }
        let width = bin_size as i64;

        let mut bins: BTreeMap<i64, BinAccumulator> = BTreeMap::new();
        let (mut records, mut errors, mut malformed) = (0u64, 0u64, 0u64);

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: MetricRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(line = index + 1, error = %e, "skipping malformed metric line");
                    malformed += 1;
                    continue;
                }
            };
            records += 1;

            let logged_at = epoch_seconds(record.entry_timestamp);
            let bin = bins.entry(bin_start(logged_at, width)).or_default();
            bin.queries += 1;
            if record.is_error {
                bin.errors += 1;
                errors += 1;
            }
            bin.latencies.push(record.query_queue_latency);
            bin.execution_times.push(record.execution_time);
            *bin.operations.entry(record.operation).or_default() += 1;
            if let Some(word) = record.query.split_whitespace().next() {
                *bin.actions.entry(word.to_lowercase()).or_default() += 1;
            }

            let started_at = logged_at + record.query_queue_latency;
            bins.entry(bin_start(started_at, width)).or_default().started += 1;
        }

        let bins = bins
            .into_iter()
            .map(|(start, mut acc)| BinReport {
                start: DateTime::from_timestamp(start, 0).unwrap_or_default(),
                queries: acc.queries,
                errors: acc.errors,
                queue_latency: Distribution::from_samples(&mut acc.latencies),
                execution_time: Distribution::from_samples(&mut acc.execution_times),
                operations: acc.operations,
                actions: acc.actions,
                tps: acc.started as f64 / bin_size as f64,
            })
            .collect::<Vec<_>>();

        debug!(records, bins = bins.len(), malformed, "metrics report built");
        Ok(Self {
            bin_size,
            records,
            errors,
            malformed,
            bins,
        })
    }
}

fn epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_micros()) / 1_000_000.0
}

fn bin_start(seconds: f64, width: i64) -> i64 {
    (seconds.floor() as i64).div_euclid(width) * width
}

fn format_distribution(d: Option<&Distribution>) -> String {
    match d {
        Some(d) => format!("{:>9.4} {:>9.4} {:>9.4}", d.average, d.p95, d.p99),
        None => format!("{:>9} {:>9} {:>9}", "-", "-", "-"),
    }
}

fn format_counts(counts: &BTreeMap<String, u64>) -> String {
    counts
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} records, {} errors, {} malformed lines, bin size {}s",
            self.records, self.errors, self.malformed, self.bin_size
        )?;
        writeln!(
            f,
            "{:<20} {:>7} {:>6} {:>9} | {:>9} {:>9} {:>9} | {:>9} {:>9} {:>9} | actions",
            "bin", "queries", "errors", "tps", "lat avg", "lat p95", "lat p99", "exec avg",
            "exec p95", "exec p99"
        )?;
        for bin in &self.bins {
            writeln!(
                f,
                "{:<20} {:>7} {:>6} {:>9.2} | {} | {} | {}",
                bin.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                bin.queries,
                bin.errors,
                bin.tps,
                format_distribution(bin.queue_latency.as_ref()),
                format_distribution(bin.execution_time.as_ref()),
                format_counts(&bin.actions),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn line(ts: &str, latency: f64, operation: &str, query: &str, is_error: bool) -> String {
        let record = MetricRecord {
            entry_timestamp: DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc),
            query_queue_latency: latency,
            operation: operation.to_string(),
            query: query.to_string(),
            execution_time: 0.01,
            is_error,
            error: is_error.then(|| "boom".to_string()),
            executed_as_query: Some(true),
        };
        serde_json::to_string(&record).unwrap() + "\n"
    }

    #[test]
    fn test_bins_by_entry_timestamp() {
        let input = [
            line("2021-03-04T17:00:01Z", 0.0, "Query", "SELECT 1", false),
            line("2021-03-04T17:00:09Z", 0.0, "Query", "select 2", false),
            line("2021-03-04T17:00:12Z", 0.0, "Execute", "UPDATE t SET x = 1", true),
        ]
        .concat();

        let report = MetricsReport::from_reader(Cursor::new(input), 10).unwrap();
        assert_eq!(report.records, 3);
        assert_eq!(report.errors, 1);
        assert_eq!(report.bins.len(), 2);

        let first = &report.bins[0];
        assert_eq!(first.start.to_rfc3339(), "2021-03-04T17:00:00+00:00");
        assert_eq!(first.queries, 2);
        assert_eq!(first.actions.get("select"), Some(&2));
        assert_eq!(first.operations.get("Query"), Some(&2));

        let second = &report.bins[1];
        assert_eq!(second.errors, 1);
        assert_eq!(second.actions.get("update"), Some(&1));
        assert_eq!(second.operations.get("Execute"), Some(&1));
    }

    #[test]
    fn test_tps_attributed_to_start_bin() {
        // logged in the first bin, started 15s late
        let input = [
            line("2021-03-04T17:00:01Z", 15.0, "Query", "SELECT 1", false),
            line("2021-03-04T17:00:02Z", 0.0, "Query", "SELECT 1", false),
        ]
        .concat();

        let report = MetricsReport::from_reader(Cursor::new(input), 10).unwrap();
        assert_eq!(report.bins.len(), 2);
        assert_eq!(report.bins[0].queries, 2);
        assert!((report.bins[0].tps - 0.1).abs() < 1e-9);

        // exists only because a query started in it
        assert_eq!(report.bins[1].queries, 0);
        assert!(report.bins[1].queue_latency.is_none());
        assert!((report.bins[1].tps - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_latency_distribution() {
        let input: String = (1..=5)
            .map(|i| line("2021-03-04T17:00:00Z", i as f64, "Query", "SELECT 1", false))
            .collect();

        let report = MetricsReport::from_reader(Cursor::new(input), 3600).unwrap();
        let latency = report.bins[0].queue_latency.unwrap();
        assert!((latency.average - 3.0).abs() < 1e-9);
        assert!((latency.p95 - 4.8).abs() < 1e-9);
        assert!((latency.p99 - 4.96).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_lines_are_counted() {
        let input = [
            "not json\n".to_string(),
            "\n".to_string(),
            line("2021-03-04T17:00:00Z", 0.0, "Query", "SELECT 1", false),
        ]
        .concat();

        let report = MetricsReport::from_reader(Cursor::new(input), 60).unwrap();
        assert_eq!(report.malformed, 1);
        assert_eq!(report.records, 1);
        assert!(report.to_string().contains("1 records"));
    }

    #[test]
    fn test_zero_bin_size_rejected() {
        assert!(MetricsReport::from_reader(Cursor::new(""), 0).is_err());
    }
}
