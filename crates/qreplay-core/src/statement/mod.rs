//! Prepared-statement emulation.
//!
//! The query log records `Prepare` with the template text (`?` placeholders)
//! but `Execute` only with the final, fully substituted SQL. To replay an
//! execution as a real prepared-statement call, each template gets a
//! matcher that recognizes substituted statements and recovers the bound
//! values from them.

mod cache;
mod matcher;

pub use cache::{Executed, ExecutionPath, StatementCache};
pub use matcher::{TemplateMatcher, extract_arguments, split_placeholders};
