//! Database access for replay workers.
//!
//! The engine only talks to the [`Connection`] / [`Connector`] traits. The
//! PostgreSQL backend lives in [`postgres`], an in-memory backend for tests
//! in [`mock`]. [`ConnectionProvider`] hands each worker its own connection.

pub mod mock;
mod postgres;
mod provider;
mod url;

pub use self::postgres::{PgConnection, PgConnector, format_postgres_error, rewrite_placeholders};
pub use provider::{ConnectionProvider, WorkerId};
pub use url::{DatabaseUrl, SslMode};

/// A failed database operation. Recorded on the metric, never propagated
/// past a worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DbError {
    pub message: String,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One physical connection, owned by exactly one worker.
pub trait Connection: Send {
    /// Server-side prepared statement handle.
    type Statement: Send;

    /// Run ad hoc SQL, discarding any rows.
    fn query(&mut self, sql: &str) -> Result<(), DbError>;

    /// Prepare a statement using `?` placeholders.
    fn prepare(&mut self, sql: &str) -> Result<Self::Statement, DbError>;

    /// Execute a prepared statement. `None` binds SQL NULL.
    fn execute(
        &mut self,
        statement: &Self::Statement,
        args: &[Option<String>],
    ) -> Result<(), DbError>;

    /// Cheap round trip used to fail fast after connecting.
    fn ping(&mut self) -> Result<(), DbError> {
        self.query("SELECT 1")
    }
}

/// Opens connections to one database target.
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection + 'static;

    fn connect(&self) -> Result<Self::Conn, DbError>;

    /// Human-readable target description (no credentials).
    fn target(&self) -> String;
}
