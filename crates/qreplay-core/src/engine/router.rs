//! Routes admitted entries to worker pools.
//!
//! ```text
//!  SELECT queries ──▶ shared queue ──────▶ reader-0 .. reader-N ──┐
//!                                                                  ├─▶ metrics sink
//!  other entries ───▶ queue[conn_id % M] ─▶ writer-k ──────────────┘
//! ```
//!
//! Readers share one queue and may run in any order. Each writer bucket has
//! its own FIFO queue, so statements of one source connection replay in log
//! order. Workers are spawned the first time they are needed.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, info};

use super::Message;
use super::worker::{Worker, WorkerContext};
use crate::db::{Connector, WorkerId};
use crate::error::ReplayError;
use crate::log::LogEntry;

struct WriterHandle {
    queue: Sender<Message<LogEntry>>,
    thread: JoinHandle<()>,
}

pub(crate) struct Router<K: Connector> {
    ctx: WorkerContext<K>,
    reader_pool_size: usize,
    writer_pool_size: usize,
    reader_queue: Sender<Message<LogEntry>>,
    reader_rx: Receiver<Message<LogEntry>>,
    readers: Vec<JoinHandle<()>>,
    writers: BTreeMap<usize, WriterHandle>,
}

impl<K: Connector> Router<K> {
    pub fn new(ctx: WorkerContext<K>, reader_pool_size: usize, writer_pool_size: usize) -> Self {
        let (reader_queue, reader_rx) = channel::unbounded();
        Self {
            ctx,
            reader_pool_size,
            writer_pool_size,
            reader_queue,
            reader_rx,
            readers: Vec::new(),
            writers: BTreeMap::new(),
        }
    }

    /// Writer bucket for a source connection id.
    pub fn writer_bucket(&self, connection_id: u64) -> usize {
        (connection_id % self.writer_pool_size as u64) as usize
    }

    /// Enqueues one admitted entry. Never blocks.
    pub fn route(&mut self, entry: LogEntry) -> Result<(), ReplayError> {
        if entry.is_select_query() {
            if self.readers.len() < self.reader_pool_size {
                self.spawn_reader()?;
            }
            return self
                .reader_queue
                .send(Message::Work(entry))
                .map_err(|_| ReplayError::WorkerPanicked("reader pool".to_string()));
        }

        let bucket = self.writer_bucket(entry.connection_id);
        let writer = match self.writers.entry(bucket) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => slot.insert(Self::spawn_writer(&self.ctx, bucket)?),
        };
        writer
            .queue
            .send(Message::Work(entry))
            .map_err(|_| ReplayError::WorkerPanicked(WorkerId::Writer(bucket).to_string()))
    }

    fn spawn_reader(&mut self) -> Result<(), ReplayError> {
        let index = self.readers.len();
        let worker = Worker::reader(index, self.ctx.clone());
        let queue = self.reader_rx.clone();
        let thread = thread::Builder::new()
            .name(WorkerId::Reader(index).to_string())
            .spawn(move || worker.run(queue))?;
        debug!(reader = index, "reader spawned");
        self.readers.push(thread);
        Ok(())
    }

    fn spawn_writer(ctx: &WorkerContext<K>, bucket: usize) -> Result<WriterHandle, ReplayError> {
        let (queue, rx) = channel::unbounded();
        let worker = Worker::writer(bucket, ctx.clone());
        let thread = thread::Builder::new()
            .name(WorkerId::Writer(bucket).to_string())
            .spawn(move || worker.run(rx))?;
        debug!(writer = bucket, "writer spawned");
        Ok(WriterHandle { queue, thread })
    }

    /// Sends one sentinel per live worker, then waits for every queue to
    /// drain and every worker to exit.
    pub fn shutdown(self) -> Result<(), ReplayError> {
        info!(
            readers = self.readers.len(),
            writers = self.writers.len(),
            "waiting for workers to drain"
        );

        // A worker that already died has dropped its receiver; join reports it
        for _ in 0..self.readers.len() {
            let _ = self.reader_queue.send(Message::Shutdown);
        }
        for writer in self.writers.values() {
            let _ = writer.queue.send(Message::Shutdown);
        }

        let mut panicked = Vec::new();
        for (index, thread) in self.readers.into_iter().enumerate() {
            if thread.join().is_err() {
                panicked.push(WorkerId::Reader(index).to_string());
            }
        }
        for (bucket, writer) in self.writers {
            if writer.thread.join().is_err() {
                panicked.push(WorkerId::Writer(bucket).to_string());
            }
        }

        if panicked.is_empty() {
            Ok(())
        } else {
            Err(ReplayError::WorkerPanicked(panicked.join(", ")))
        }
    }
}
