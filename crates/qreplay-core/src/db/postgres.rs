//! PostgreSQL backend built on the synchronous `postgres` client.
//!
//! Statements in the log use `?` placeholders; they are rewritten to
//! `$1..$n` at prepare time. Recovered arguments are plain text, so they are
//! bound in text format and the server infers their types, the same way it
//! would for literals in the original statement.

use std::time::Duration;

use bytes::BytesMut;
use postgres::types::{Format, IsNull, ToSql, Type, to_sql_checked};
use postgres::{Client, Config, NoTls, Statement};
use postgres_native_tls::MakeTlsConnector;

use super::url::{DatabaseUrl, SslMode};
use super::{Connection, Connector, DbError};
use crate::error::ReplayError;
use crate::statement::split_placeholders;

/// Connect attempts give up after this long so startup fails fast.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const APPLICATION_NAME: &str = "qreplay";

/// Opens PostgreSQL connections to one target.
pub struct PgConnector {
    url: DatabaseUrl,
    config: Config,
    tls: Option<MakeTlsConnector>,
}

impl PgConnector {
    pub fn new(url: DatabaseUrl) -> Result<Self, ReplayError> {
        let mut config = Config::new();
        config
            .host(&url.host)
            .port(url.port)
            .user(&url.user)
            .password(&url.password)
            .dbname(&url.database)
            .application_name(APPLICATION_NAME)
            .connect_timeout(CONNECT_TIMEOUT);

        let tls = match url.ssl_mode {
            SslMode::Disable => {
                config.ssl_mode(postgres::config::SslMode::Disable);
                None
            }
            SslMode::Prefer | SslMode::Require => {
                let mode = if url.ssl_mode == SslMode::Require {
                    postgres::config::SslMode::Require
                } else {
                    postgres::config::SslMode::Prefer
                };
                config.ssl_mode(mode);
                let connector = native_tls::TlsConnector::new()
                    .map_err(|e| ReplayError::Config(format!("TLS setup failed: {}", e)))?;
                Some(MakeTlsConnector::new(connector))
            }
        };

        Ok(Self { url, config, tls })
    }

    pub fn url(&self) -> &DatabaseUrl {
        &self.url
    }
}

impl Connector for PgConnector {
    type Conn = PgConnection;

    fn connect(&self) -> Result<PgConnection, DbError> {
        let client = match &self.tls {
            Some(tls) => self.config.connect(tls.clone()),
            None => self.config.connect(NoTls),
        }
        .map_err(|e| DbError::new(format_postgres_error(&e)))?;

        Ok(PgConnection { client })
    }

    fn target(&self) -> String {
        format!("{}:{}/{}", self.url.host, self.url.port, self.url.database)
    }
}

/// A worker-owned PostgreSQL session.
pub struct PgConnection {
    client: Client,
}

impl Connection for PgConnection {
    type Statement = Statement;

    fn query(&mut self, sql: &str) -> Result<(), DbError> {
        self.client
            .batch_execute(sql)
            .map_err(|e| DbError::new(format_postgres_error(&e)))
    }

    fn prepare(&mut self, sql: &str) -> Result<Statement, DbError> {
        self.client
            .prepare(&rewrite_placeholders(sql))
            .map_err(|e| DbError::new(format_postgres_error(&e)))
    }

    fn execute(&mut self, statement: &Statement, args: &[Option<String>]) -> Result<(), DbError> {
        let args: Vec<TextArg<'_>> = args.iter().map(|a| TextArg(a.as_deref())).collect();
        let params: Vec<&(dyn ToSql + Sync)> =
            args.iter().map(|a| a as &(dyn ToSql + Sync)).collect();

        self.client
            .execute(statement, &params)
            .map(|_| ())
            .map_err(|e| DbError::new(format_postgres_error(&e)))
    }
}

/// Argument sent in text format; accepted for any parameter type.
#[derive(Debug)]
struct TextArg<'a>(Option<&'a str>);

impl ToSql for TextArg<'_> {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            Some(value) => {
                out.extend_from_slice(value.as_bytes());
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// Rewrites `?` placeholders to `$1..$n`, leaving quoted text untouched.
///
/// Uses the same scan as template matching, so the server statement always
/// has as many parameters as the matcher has captures.
pub fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    for (index, piece) in split_placeholders(sql).into_iter().enumerate() {
        if index > 0 {
            out.push('$');
            out.push_str(&index.to_string());
        }
        out.push_str(piece);
    }
    out
}

/// Formats a PostgreSQL error into a concise message.
pub fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}
