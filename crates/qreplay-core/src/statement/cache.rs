use std::collections::HashMap;

use tracing::{trace, warn};

use super::matcher::{TemplateMatcher, extract_arguments};
use crate::db::{Connection, DbError};

/// A template prepared on one connection.
pub struct StatementTemplate<S> {
    pub sql: String,
    /// `None` only if the template was too large to compile; such a
    /// template never matches and executions fall back to plain queries.
    pub matcher: Option<TemplateMatcher>,
    pub handle: S,
}

/// How an `Execute` entry was replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Matched a template and ran the prepared handle with recovered arguments.
    Prepared,
    /// No template matched; the SQL ran as a plain query.
    Query,
}

impl ExecutionPath {
    pub fn executed_as_query(self) -> bool {
        self == ExecutionPath::Query
    }
}

/// Outcome of [`StatementCache::execute`]. The path is known even when the
/// database call fails.
#[derive(Debug)]
pub struct Executed {
    pub path: ExecutionPath,
    pub result: Result<(), DbError>,
}

/// Prepared statements of a single connection, in insertion order.
///
/// Owned by the worker that owns the connection; never shared.
pub struct StatementCache<C: Connection> {
    templates: Vec<StatementTemplate<C::Statement>>,
    by_sql: HashMap<String, usize>,
}

impl<C: Connection> Default for StatementCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> StatementCache<C> {
    pub fn new() -> Self {
        Self {
            templates: Vec::new(),
            by_sql: HashMap::new(),
        }
    }

    /// Prepare `sql` on `conn` unless this exact text is already known.
    pub fn prepare(&mut self, conn: &mut C, sql: &str) -> Result<(), DbError> {
        if self.by_sql.contains_key(sql) {
            trace!(sql, "template already prepared");
            return Ok(());
        }

        let handle = conn.prepare(sql)?;
        let matcher = match TemplateMatcher::compile(sql) {
            Ok(m) => {
                trace!(sql, placeholders = m.placeholders(), "template prepared");
                Some(m)
            }
            Err(e) => {
                warn!(error = %e, "template matcher not compiled; executions will run as queries");
                None
            }
        };

        self.by_sql.insert(sql.to_string(), self.templates.len());
        self.templates.push(StatementTemplate {
            sql: sql.to_string(),
            matcher,
            handle,
        });
        Ok(())
    }

    /// Replay a substituted statement.
    ///
    /// The first template (in insertion order) whose matcher accepts `sql`
    /// runs with the recovered arguments; otherwise `sql` runs as a plain
    /// query.
    pub fn execute(&mut self, conn: &mut C, sql: &str) -> Executed {
        match self.find_match(sql) {
            Some((index, args)) => {
                let template = &self.templates[index];
                trace!(template = %template.sql, args = args.len(), "execute matched template");
                Executed {
                    path: ExecutionPath::Prepared,
                    result: conn.execute(&template.handle, &args),
                }
            }
            None => Executed {
                path: ExecutionPath::Query,
                result: conn.query(sql),
            },
        }
    }

    /// Index of the first matching template and its recovered arguments.
    pub fn find_match(&self, sql: &str) -> Option<(usize, Vec<Option<String>>)> {
        self.templates.iter().enumerate().find_map(|(index, template)| {
            let captures = template.matcher.as_ref()?.captures(sql)?;
            Some((index, extract_arguments(&captures)))
        })
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
