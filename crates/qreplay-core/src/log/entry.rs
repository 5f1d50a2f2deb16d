use chrono::{DateTime, Utc};

/// Statement kinds (first word of the argument) that change database state.
///
/// Matched case-insensitively. `prepare` covers textual `PREPARE ... FROM`
/// statements sent as plain queries.
pub const MUTATING_OPERATIONS: &[&str] = &["prepare", "create", "call", "update", "insert", "delete"];

/// Command column of a log line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Prepare,
    Execute,
    Query,
    Quit,
    /// Any other command word (`Connect`, `Init`, `Close`, ...), kept verbatim.
    Other(String),
}

impl Command {
    /// Maps the command word exactly as it appears in the log.
    pub fn parse(word: &str) -> Self {
        match word {
            "Prepare" => Command::Prepare,
            "Execute" => Command::Execute,
            "Query" => Command::Query,
            "Quit" => Command::Quit,
            other => Command::Other(other.to_string()),
        }
    }

    /// Returns the original spelling of the command.
    pub fn as_str(&self) -> &str {
        match self {
            Command::Prepare => "Prepare",
            Command::Execute => "Execute",
            Command::Query => "Query",
            Command::Quit => "Quit",
            Command::Other(word) => word,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One complete, parsed log line. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Wall-clock time the statement was logged.
    pub timestamp: DateTime<Utc>,
    /// High-resolution timestamp used for relative-offset math.
    pub hi_res_timestamp: DateTime<Utc>,
    /// Source client connection; groups statements that must stay ordered.
    pub connection_id: u64,
    pub command: Command,
    /// SQL or statement text. Empty only for `Quit`.
    pub argument: String,
    /// 1-based line number in the source file.
    pub line_number: u64,
}

impl LogEntry {
    /// First whitespace-separated word of the argument.
    pub fn first_word(&self) -> Option<&str> {
        self.argument.split_whitespace().next()
    }

    /// True if the argument starts with one of [`MUTATING_OPERATIONS`].
    pub fn is_mutating(&self) -> bool {
        self.first_word().is_some_and(|word| {
            MUTATING_OPERATIONS
                .iter()
                .any(|op| op.eq_ignore_ascii_case(word))
        })
    }

    /// True for ad hoc `SELECT` queries, which can run on any connection.
    pub fn is_select_query(&self) -> bool {
        self.command == Command::Query
            && self
                .argument
                .get(..6)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("select"))
    }
}
