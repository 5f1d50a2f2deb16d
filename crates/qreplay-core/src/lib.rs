//! qreplay-core — query-log replay engine.
//!
//! Provides:
//! - `log` — log line grammar, `LogEntry`, streaming `LogReader`
//! - `statement` — prepared-statement emulation (template matching, bound-argument recovery)
//! - `db` — connection traits, PostgreSQL backend, per-worker `ConnectionProvider`
//! - `engine` — phase state machine, reader/writer pools, metrics sink, `ReplayEngine`
//! - `report` — post-run analysis of the metrics log
//! - `util` — helper utilities (CLI time parsing)

pub mod db;
pub mod engine;
pub mod error;
pub mod log;
pub mod report;
pub mod statement;
pub mod util;

pub use error::ReplayError;
