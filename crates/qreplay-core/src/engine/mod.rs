//! Replay engine.
//!
//! A single ingest thread reads the log, asks the [`PhaseTracker`] what to
//! do with each entry, waits when the original traffic was slower than the
//! replay, and hands admitted entries to the router. Workers execute them
//! and report to the [`MetricsSink`].

mod clock;
mod config;
mod metrics;
mod phase;
mod replay;
mod router;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DEFAULT_METRICS_FILE, DEFAULT_READER_POOL_SIZE, DEFAULT_WRITER_POOL_SIZE, ReplayConfig,
};
pub use metrics::{MetricRecord, MetricsSink, SinkTotals};
pub use phase::{Decision, Phase, PhaseAnchor, PhaseTracker, SharedAnchor};
pub use replay::{ReplayEngine, ReplaySummary};

/// Queue item. `Shutdown` tells the consumer to exit once everything
/// queued before it has been handled.
#[derive(Debug)]
pub enum Message<T> {
    Work(T),
    Shutdown,
}
