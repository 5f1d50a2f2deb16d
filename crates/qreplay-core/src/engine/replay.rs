//! The replay driver.
//!
//! One ingest loop reads the log in file order on the calling thread. For
//! each entry it asks the [`PhaseTracker`] for a decision, sleeps on the
//! engine clock when the original traffic was slower than the replay, and
//! hands admitted entries to the router. Ingestion ends at the end of the
//! log, when the replay window closes, on a stop request, or on a log read
//! error.
//!
//! Shutdown order matters: the router sends its sentinels and joins every
//! worker first, and only then does the metrics sink get its own sentinel.
//! Every metric a worker produced is therefore written before the sink
//! exits.

use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use super::clock::{Clock, SystemClock};
use super::config::ReplayConfig;
use super::metrics::MetricsSink;
use super::phase::{Decision, Phase, PhaseTracker};
use super::router::Router;
use super::worker::WorkerContext;
use crate::db::{ConnectionProvider, Connector};
use crate::error::ReplayError;
use crate::log::{LogReader, ReaderStats};

/// Upper bound on a single sleep, so a stop request is noticed promptly.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Counters of a finished replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySummary {
    /// Entries handed to a worker. Equals the number of metric records.
    pub admitted: u64,
    /// Entries evaluated but not admitted, including the one that ended the run.
    pub dropped: u64,
    /// Entries before the skip-to point.
    pub skipped: u64,
    pub processed: u64,
    pub errors: u64,
    pub reader: ReaderStats,
    pub final_phase: Phase,
    /// Ingestion ended because of a stop request.
    pub interrupted: bool,
    /// Worker connections opened.
    pub connections: usize,
    pub elapsed: Duration,
}

pub struct ReplayEngine<K: Connector> {
    config: ReplayConfig,
    provider: Arc<ConnectionProvider<K>>,
    clock: Arc<dyn Clock>,
    stop: Arc<AtomicBool>,
}

impl<K: Connector> ReplayEngine<K> {
    pub fn new(config: ReplayConfig, provider: ConnectionProvider<K>) -> Self {
        Self {
            config,
            provider: Arc::new(provider),
            clock: Arc::new(SystemClock),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Setting the flag ends ingestion as if the replay window had closed.
    /// Already queued entries still run.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Replays the configured log file into the configured metrics file.
    pub fn run(self) -> Result<ReplaySummary, ReplayError> {
        self.config.validate()?;
        let reader = LogReader::open(&self.config.log_path)?;
        let out = BufWriter::new(File::create(&self.config.metrics_path)?);
        info!(
            log = %self.config.log_path.display(),
            metrics = %self.config.metrics_path.display(),
            "starting replay"
        );
        self.run_with(reader, out)
    }

    /// Replays entries from `reader`, writing metric lines to `out`.
    pub fn run_with<R, W>(self, mut reader: LogReader<R>, out: W) -> Result<ReplaySummary, ReplayError>
    where
        R: BufRead,
        W: Write + Send + 'static,
    {
        self.config.validate()?;
        let started = Instant::now();

        let mut tracker = PhaseTracker::new(
            self.config.start_time,
            self.config.end_time,
            self.config.skip_to,
            self.clock.now(),
        );
        let sink = MetricsSink::spawn(out, self.config.progress)?;
        let mut router = Router::new(
            WorkerContext {
                provider: Arc::clone(&self.provider),
                anchor: tracker.anchor(),
                clock: Arc::clone(&self.clock),
                metrics: sink.sender(),
            },
            self.config.reader_pool_size,
            self.config.writer_pool_size,
        );

        let (mut admitted, mut dropped, mut skipped) = (0u64, 0u64, 0u64);
        let mut interrupted = false;
        let mut ingest_error: Option<ReplayError> = None;

        for item in reader.by_ref() {
            if self.stop_requested() {
                interrupted = true;
                break;
            }
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    error!(error = %e, "log read failed");
                    ingest_error = Some(e);
                    break;
                }
            };

            match tracker.observe(&entry, self.clock.now()) {
                Decision::Skip => skipped += 1,
                Decision::Drop => dropped += 1,
                Decision::Stop => {
                    dropped += 1;
                    break;
                }
                Decision::Admit { wait } => {
                    if let Some(wait) = wait
                        && !self.wait(wait)
                    {
                        interrupted = true;
                        break;
                    }
                    if let Err(e) = router.route(entry) {
                        ingest_error = Some(e);
                        break;
                    }
                    admitted += 1;
                }
            }
        }

        if interrupted {
            warn!(admitted, "stop requested; draining queued entries");
        } else {
            info!(admitted, phase = %tracker.phase(), "ingestion finished");
        }

        // Workers must be gone before the sink sees its sentinel
        let workers = router.shutdown();
        let totals = sink.finish();
        if let Some(e) = ingest_error {
            return Err(e);
        }
        workers?;
        let totals = totals?;

        Ok(ReplaySummary {
            admitted,
            dropped,
            skipped,
            processed: totals.processed,
            errors: totals.errors,
            reader: reader.stats(),
            final_phase: tracker.phase(),
            interrupted,
            connections: self.provider.issued(),
            elapsed: started.elapsed(),
        })
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Sleeps for `duration` on the engine clock. Returns false if a stop
    /// was requested first.
    fn wait(&self, duration: Duration) -> bool {
        let deadline = self.clock.now() + duration;
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = self.clock.now();
            if now >= deadline {
                return true;
            }
            self.clock.sleep((deadline - now).min(STOP_POLL_INTERVAL));
        }
    }
}
