//! Per-query metric records and the thread that persists them.
//!
//! Workers never touch the output file. They send [`MetricRecord`]s over a
//! channel to a single sink thread, which appends one JSON object per line
//! and redraws a one-line progress summary on stdout.

use std::io::{self, Write};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::Message;
use crate::error::ReplayError;

/// Minimum interval between progress redraws.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of one replayed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Original log timestamp of the entry.
    pub entry_timestamp: DateTime<Utc>,
    /// Seconds the replay ran behind (positive) or ahead of the original
    /// schedule when the entry was picked up.
    pub query_queue_latency: f64,
    /// Command word (`Query`, `Execute`, ...).
    pub operation: String,
    pub query: String,
    /// Seconds spent in the database call.
    pub execution_time: f64,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `None` for `Prepare`. For `Execute`, whether no template matched.
    /// Always `true` for anything else.
    pub executed_as_query: Option<bool>,
}

/// Counts reported by the sink when it shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkTotals {
    pub processed: u64,
    pub errors: u64,
}

/// Handle to the running sink thread.
pub struct MetricsSink {
    sender: Sender<Message<MetricRecord>>,
    handle: JoinHandle<Result<SinkTotals, ReplayError>>,
}

impl MetricsSink {
    /// Starts the sink thread writing JSON lines to `out`.
    pub fn spawn<W>(out: W, progress: bool) -> Result<Self, ReplayError>
    where
        W: Write + Send + 'static,
    {
        let (sender, receiver) = channel::unbounded();
        let handle = thread::Builder::new()
            .name("metrics-sink".to_string())
            .spawn(move || drain(receiver, out, progress))?;
        Ok(Self { sender, handle })
    }

    /// A sender for workers. Clones share the same queue.
    pub fn sender(&self) -> Sender<Message<MetricRecord>> {
        self.sender.clone()
    }

    /// Signals end of input, waits for every queued record to be written,
    /// and returns the totals.
    ///
    /// Must be called only after all worker senders are done.
    pub fn finish(self) -> Result<SinkTotals, ReplayError> {
        // The receiver only disappears if the thread already exited; join reports why
        let _ = self.sender.send(Message::Shutdown);
        self.handle
            .join()
            .map_err(|_| ReplayError::WorkerPanicked("metrics-sink".to_string()))?
    }
}

fn drain<W: Write>(
    receiver: Receiver<Message<MetricRecord>>,
    mut out: W,
    progress: bool,
) -> Result<SinkTotals, ReplayError> {
    let mut totals = SinkTotals::default();
    let mut write_error: Option<ReplayError> = None;
    let mut last_draw: Option<Instant> = None;
    let mut last_record: Option<MetricRecord> = None;

    while let Ok(Message::Work(record)) = receiver.recv() {
        totals.processed += 1;
        if record.is_error {
            totals.errors += 1;
        }

        if write_error.is_none()
            && let Err(e) = write_record(&mut out, &record)
        {
            // Keep draining so workers never stall; the failure is returned at the end
            error!(error = %e, "failed to write metrics; further records are discarded");
            write_error = Some(e);
        }

        if progress && last_draw.is_none_or(|t| t.elapsed() >= PROGRESS_INTERVAL) {
            draw_progress(&totals, &record);
            last_draw = Some(Instant::now());
        }
        last_record = Some(record);
    }

    if progress && let Some(record) = &last_record {
        draw_progress(&totals, record);
        println!();
    }

    if let Some(e) = write_error {
        return Err(e);
    }
    out.flush()?;
    debug!(processed = totals.processed, errors = totals.errors, "metrics sink drained");
    Ok(totals)
}

fn write_record<W: Write>(out: &mut W, record: &MetricRecord) -> Result<(), ReplayError> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")?;
    Ok(())
}

fn draw_progress(totals: &SinkTotals, record: &MetricRecord) {
    let mut stdout = io::stdout().lock();
    let _ = write!(
        stdout,
        "\rTotal queries run: {}    Errors: {}    Current latency: {:.3}s    Current timestamp: {}    ",
        totals.processed,
        totals.errors,
        record.query_queue_latency,
        record.entry_timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    let _ = stdout.flush();
}
