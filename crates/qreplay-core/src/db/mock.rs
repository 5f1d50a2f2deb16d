//! In-memory database backend for testing the engine without a server.
//!
//! Every operation is appended to a shared event log that tests can inspect
//! after a replay. Clones of a [`MockConnector`] share that log.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{Connection, Connector, DbError};

/// Kind of operation recorded by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Query,
    Prepare,
    Execute,
}

/// One recorded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEvent {
    /// Sequential id of the mock connection (per connector).
    pub connection: usize,
    pub target: String,
    pub op: MockOp,
    /// SQL text; for `Execute`, the text the statement was prepared from.
    pub sql: String,
    pub args: Vec<Option<String>>,
}

#[derive(Default)]
struct MockState {
    next_connection: AtomicUsize,
    unreachable: AtomicBool,
    fail_on: Mutex<Vec<String>>,
    events: Mutex<Vec<MockEvent>>,
}

/// Connector producing [`MockConnection`]s.
#[derive(Clone)]
pub struct MockConnector {
    target: String,
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            state: Arc::new(MockState::default()),
        }
    }

    /// Queries and executions whose SQL contains `pattern` fail.
    pub fn fail_on(self, pattern: &str) -> Self {
        self.state.fail_on.lock().push(pattern.to_string());
        self
    }

    /// Makes `connect()` fail until reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// All operations recorded so far, in completion order.
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.events.lock().clone()
    }

    pub fn connections_opened(&self) -> usize {
        self.state.next_connection.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    type Conn = MockConnection;

    fn connect(&self) -> Result<MockConnection, DbError> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(DbError::new(format!("{}: connection refused", self.target)));
        }
        let id = self.state.next_connection.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id,
            target: self.target.clone(),
            state: Arc::clone(&self.state),
        })
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

/// Prepared statement handle of the mock backend.
#[derive(Debug, Clone)]
pub struct MockStatement {
    pub sql: String,
}

pub struct MockConnection {
    id: usize,
    target: String,
    state: Arc<MockState>,
}

impl MockConnection {
    fn record(&self, op: MockOp, sql: &str, args: &[Option<String>]) -> Result<(), DbError> {
        self.state.events.lock().push(MockEvent {
            connection: self.id,
            target: self.target.clone(),
            op,
            sql: sql.to_string(),
            args: args.to_vec(),
        });

        if op != MockOp::Prepare
            && let Some(pattern) = self
                .state
                .fail_on
                .lock()
                .iter()
                .find(|p| sql.contains(p.as_str()))
        {
            return Err(DbError::new(format!("mock failure matching '{}'", pattern)));
        }
        Ok(())
    }
}

impl Connection for MockConnection {
    type Statement = MockStatement;

    fn query(&mut self, sql: &str) -> Result<(), DbError> {
        self.record(MockOp::Query, sql, &[])
    }

    fn prepare(&mut self, sql: &str) -> Result<MockStatement, DbError> {
        self.record(MockOp::Prepare, sql, &[])?;
        Ok(MockStatement {
            sql: sql.to_string(),
        })
    }

    fn execute(
        &mut self,
        statement: &MockStatement,
        args: &[Option<String>],
    ) -> Result<(), DbError> {
        self.record(MockOp::Execute, &statement.sql, args)
    }

    fn ping(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}
