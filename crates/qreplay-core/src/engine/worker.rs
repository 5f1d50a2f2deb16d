//! Worker threads: each owns at most one connection and replays the
//! entries routed to it, one metric per entry.

use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{Receiver, Sender};
use tracing::{debug, warn};

use super::Message;
use super::clock::Clock;
use super::metrics::MetricRecord;
use super::phase::SharedAnchor;
use crate::db::{Connection, ConnectionProvider, Connector, DbError, WorkerId};
use crate::log::{Command, LogEntry};
use crate::statement::StatementCache;

/// State shared by every worker of a replay.
pub(crate) struct WorkerContext<K: Connector> {
    pub provider: Arc<ConnectionProvider<K>>,
    pub anchor: SharedAnchor,
    pub clock: Arc<dyn Clock>,
    pub metrics: Sender<Message<MetricRecord>>,
}

impl<K: Connector> Clone for WorkerContext<K> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            anchor: Arc::clone(&self.anchor),
            clock: Arc::clone(&self.clock),
            metrics: self.metrics.clone(),
        }
    }
}

pub(crate) struct Worker<K: Connector> {
    id: WorkerId,
    ctx: WorkerContext<K>,
    conn: Option<K::Conn>,
    /// Writers only. Readers receive plain SELECT queries.
    statements: Option<StatementCache<K::Conn>>,
}

impl<K: Connector> Worker<K> {
    pub fn reader(index: usize, ctx: WorkerContext<K>) -> Self {
        Self {
            id: WorkerId::Reader(index),
            ctx,
            conn: None,
            statements: None,
        }
    }

    pub fn writer(bucket: usize, ctx: WorkerContext<K>) -> Self {
        Self {
            id: WorkerId::Writer(bucket),
            ctx,
            conn: None,
            statements: Some(StatementCache::new()),
        }
    }

    /// Consumes entries until a shutdown sentinel arrives or every sender
    /// is gone.
    pub fn run(mut self, queue: Receiver<Message<LogEntry>>) {
        let mut replayed = 0u64;
        while let Ok(Message::Work(entry)) = queue.recv() {
            let record = self.replay(&entry);
            replayed += 1;
            if self.ctx.metrics.send(Message::Work(record)).is_err() {
                warn!(worker = %self.id, "metrics sink gone; stopping worker");
                break;
            }
        }
        debug!(worker = %self.id, replayed, "worker finished");
    }

    fn replay(&mut self, entry: &LogEntry) -> MetricRecord {
        let latency = self
            .ctx
            .anchor
            .read()
            .latency(entry.hi_res_timestamp, self.ctx.clock.now());

        let started = Instant::now();
        let (result, executed_as_query) = self.dispatch(entry);
        let execution_time = started.elapsed().as_secs_f64();

        if let Err(e) = &result {
            debug!(worker = %self.id, line = entry.line_number, error = %e, "statement failed");
        }

        MetricRecord {
            entry_timestamp: entry.timestamp,
            query_queue_latency: latency,
            operation: entry.command.to_string(),
            query: entry.argument.clone(),
            execution_time,
            is_error: result.is_err(),
            error: result.err().map(|e| e.message),
            executed_as_query,
        }
    }

    fn dispatch(&mut self, entry: &LogEntry) -> (Result<(), DbError>, Option<bool>) {
        // What gets recorded when no template lookup happens
        let fallback_flag = (entry.command != Command::Prepare).then_some(true);

        if self.conn.is_none() {
            match self.ctx.provider.checkout(self.id) {
                Ok(conn) => self.conn = Some(conn),
                Err(e) => {
                    warn!(worker = %self.id, error = %e, "connection unavailable");
                    return (
                        Err(DbError::new(format!("connection unavailable: {}", e))),
                        fallback_flag,
                    );
                }
            }
        }
        let Some(conn) = self.conn.as_mut() else {
            return (Err(DbError::new("connection unavailable")), fallback_flag);
        };

        match (&entry.command, self.statements.as_mut()) {
            (Command::Prepare, Some(cache)) => (cache.prepare(conn, &entry.argument), None),
            (Command::Execute, Some(cache)) => {
                let executed = cache.execute(conn, &entry.argument);
                (executed.result, Some(executed.path.executed_as_query()))
            }
            _ => (conn.query(&entry.argument), fallback_flag),
        }
    }
}
