//! Per-worker connection ownership.
//!
//! Each worker identity gets exactly one connection, opened lazily the first
//! time the worker needs it and owned by that worker for the rest of the
//! run. The table of issued identities is the only shared state; its mutex
//! is held just long enough to reserve or release an identity, never while
//! a connection is being opened.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Connection, Connector, DbError};
use crate::error::ReplayError;

/// Logical worker identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerId {
    /// Reader-pool worker (SELECT queries).
    Reader(usize),
    /// Writer-pool worker for one connection-id bucket.
    Writer(usize),
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerId::Reader(i) => write!(f, "reader-{}", i),
            WorkerId::Writer(i) => write!(f, "writer-{}", i),
        }
    }
}

/// Hands out one connection per worker identity.
///
/// Writers always use the primary. Reader `i` is bound to replica
/// `i % replicas.len()`, or to the primary when no replicas are configured.
pub struct ConnectionProvider<K: Connector> {
    primary: K,
    replicas: Vec<K>,
    /// Worker identity -> target description.
    issued: Mutex<HashMap<WorkerId, String>>,
}

impl<K: Connector> ConnectionProvider<K> {
    pub fn new(primary: K, replicas: Vec<K>) -> Self {
        Self {
            primary,
            replicas,
            issued: Mutex::new(HashMap::new()),
        }
    }

    /// The connector a worker is bound to.
    pub fn connector_for(&self, worker: WorkerId) -> &K {
        match worker {
            WorkerId::Reader(i) if !self.replicas.is_empty() => {
                &self.replicas[i % self.replicas.len()]
            }
            _ => &self.primary,
        }
    }

    /// Opens and pings one connection per configured target.
    ///
    /// Called before replay starts; any failure is fatal.
    pub fn check_reachable(&self) -> Result<(), ReplayError> {
        for connector in std::iter::once(&self.primary).chain(self.replicas.iter()) {
            let target = connector.target();
            let mut conn = connector.connect().map_err(|e| ReplayError::Connect {
                target: target.clone(),
                message: e.message.clone(),
            })?;
            conn.ping().map_err(|e| ReplayError::Connect {
                target: target.clone(),
                message: e.message,
            })?;
            info!(target = %target, "database reachable");
        }
        Ok(())
    }

    /// Opens the connection owned by `worker`.
    ///
    /// The identity is reserved first so two checkouts for the same worker
    /// cannot both succeed; a failed connect releases the reservation so a
    /// later call can retry.
    pub fn checkout(&self, worker: WorkerId) -> Result<K::Conn, DbError> {
        let connector = self.connector_for(worker);
        let target = connector.target();

        {
            let mut issued = self.issued.lock();
            if issued.contains_key(&worker) {
                return Err(DbError::new(format!(
                    "connection already issued to {}",
                    worker
                )));
            }
            issued.insert(worker, target.clone());
        }

        let result = connector.connect().and_then(|mut conn| {
            // fail early if the session is unusable
            conn.ping()?;
            Ok(conn)
        });

        match result {
            Ok(conn) => {
                debug!(worker = %worker, target = %target, "connection issued");
                Ok(conn)
            }
            Err(e) => {
                self.issued.lock().remove(&worker);
                Err(e)
            }
        }
    }

    /// Number of connections currently issued.
    pub fn issued(&self) -> usize {
        self.issued.lock().len()
    }
}
